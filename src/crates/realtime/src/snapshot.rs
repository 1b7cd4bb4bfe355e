//! REST snapshot source
//!
//! `GET {api_base_url}/tasks/{task_id}` returning a [`TaskSnapshot`], either
//! bare or wrapped in a `{"data": ...}` envelope.

use crate::poller::SnapshotSource;
use crate::types::TaskSnapshot;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use utils::{ClientConfig, HttpClient};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotBody {
    Wrapped { data: TaskSnapshot },
    Bare(TaskSnapshot),
}

impl SnapshotBody {
    fn into_snapshot(self) -> TaskSnapshot {
        match self {
            SnapshotBody::Wrapped { data } => data,
            SnapshotBody::Bare(snapshot) => snapshot,
        }
    }
}

/// Fetches snapshots from the task API.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: HttpClient,
    base_url: String,
}

impl HttpSnapshotSource {
    /// Create a source for `base_url`, authenticating with `token` if given.
    pub fn new(base_url: impl Into<String>, token: Option<&str>) -> Result<Self> {
        let mut config = ClientConfig::default();
        if let Some(token) = token {
            config = config.with_bearer_token(token);
        }
        Ok(Self::with_client(base_url, HttpClient::new(config)?))
    }

    /// Create a source over an existing client
    pub fn with_client(base_url: impl Into<String>, client: HttpClient) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL of the snapshot resource for `task_id`; the id is percent-encoded
    pub fn task_url(&self, task_id: &str) -> String {
        format!("{}/tasks/{}", self.base_url, urlencoding::encode(task_id))
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, task_id: &str) -> Result<TaskSnapshot> {
        let url = self.task_url(task_id);
        debug!(task_id, %url, "fetching task snapshot");
        let body: SnapshotBody = self.client.get_json(&url).await?;
        Ok(body.into_snapshot())
    }
}
