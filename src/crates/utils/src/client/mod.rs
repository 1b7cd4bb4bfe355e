//! HTTP client used for snapshot fetches and chat requests.
//!
//! [`HttpClient`] wraps `reqwest` with:
//! - headers sent on every request (the bearer credential lives here)
//! - retry with exponential backoff on connect errors, timeouts and 5xx
//! - JSON helpers that turn non-2xx answers into [`UtilsError::StatusError`]
//!
//! # Example
//!
//! ```rust,ignore
//! use utils::client::{ClientConfig, HttpClient};
//!
//! let client = HttpClient::new(ClientConfig::new().with_bearer_token("secret"))?;
//! let body: serde_json::Value = client.get_json("http://localhost:8000/api/tasks/1").await?;
//! ```

use crate::error::{Result, UtilsError};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response body kept in a [`UtilsError::StatusError`].
const MAX_ERROR_BODY: usize = 512;

/// Connection and retry settings for [`HttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Whole-request timeout, including reading the body
    pub timeout: Duration,
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Growth factor of the retry delay; values below 1 are treated as 1
    pub backoff_multiplier: f32,
    /// `User-Agent` header value
    pub user_agent: String,
    /// Headers sent with every request
    pub default_headers: Vec<(String, String)>,
}

impl ClientConfig {
    /// Settings with a 30 s timeout and three retries.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            user_agent: concat!("kbsync/", env!("CARGO_PKG_VERSION")).to_string(),
            default_headers: Vec::new(),
        }
    }

    /// Set the whole-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many times a failed request is retried.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first retry delay and its growth factor.
    pub fn with_retry_delay(mut self, delay: Duration, multiplier: f32) -> Self {
        self.retry_delay = delay;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((key.into(), value.into()));
        self
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token))
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn retry_delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32);
        self.retry_delay.mul_f32(factor)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `reqwest` client plus retry policy.
#[derive(Debug, Clone)]
pub struct HttpClient {
    config: ClientConfig,
    client: Client,
}

impl HttpClient {
    /// Build the underlying `reqwest` client from `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| UtilsError::ClientError(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Settings this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// GET `url` and decode a JSON body, failing on non-2xx statuses.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = ensure_success(self.request(Method::GET, url).await?).await?;
        Ok(response.json::<T>().await?)
    }

    /// POST `body` as JSON. The status is not checked.
    pub async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<Response> {
        let req = self.prepare(self.client.post(url)).json(body);
        self.send_with_retry(req).await
    }

    /// Send a body-less request. The status is not checked.
    pub async fn request(&self, method: Method, url: &str) -> Result<Response> {
        let req = self.prepare(self.client.request(method, url));
        self.send_with_retry(req).await
    }

    fn prepare(&self, req: RequestBuilder) -> RequestBuilder {
        self.config
            .default_headers
            .iter()
            .fold(req, |req, (key, value)| req.header(key, value))
    }

    async fn send_with_retry(&self, req: RequestBuilder) -> Result<Response> {
        let mut retry = 0;

        loop {
            let attempt = req
                .try_clone()
                .ok_or_else(|| UtilsError::ClientError("request body cannot be retried".to_string()))?;

            match attempt.send().await {
                Ok(response) => {
                    if !response.status().is_server_error() || retry >= self.config.max_retries {
                        return Ok(response);
                    }
                    debug!(
                        status = response.status().as_u16(),
                        retry,
                        "server error, retrying request"
                    );
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if !retryable || retry >= self.config.max_retries {
                        return Err(UtilsError::HttpError(e));
                    }
                    warn!(error = %e, retry, "request failed, retrying");
                }
            }

            tokio::time::sleep(self.config.retry_delay_for(retry)).await;
            retry += 1;
        }
    }
}

/// Turn a non-2xx response into [`UtilsError::StatusError`].
pub async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(UtilsError::StatusError {
        status: status.as_u16(),
        url,
        body,
    })
}
