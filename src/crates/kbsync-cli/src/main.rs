//! # kbsync
//!
//! Follow knowledge-base tasks live and ask streamed questions.

mod config;
mod render;

use anyhow::{bail, Context};
use chat_stream::{ChatRequest, ChatStreamClient, ChatTurn, RevealConfig, TurnReveal};
use clap::{Parser, Subcommand};
use config::CliConfig;
use futures::StreamExt;
use realtime::{ConnectionState, RealtimeClient, TaskStatus, TokioClock};
use render::{connection_line, progress_line, AnswerPrinter};
use std::io::Write;
use std::path::PathBuf;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kbsync")]
#[command(about = "Live task progress and streamed answers from a knowledge-base server", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (YAML, JSON or TOML)
    #[arg(short, long, global = true, env = "KBSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show live progress of a task until it finishes
    Watch {
        /// Task identifier
        task_id: String,
    },

    /// Ask a question and print the streamed answer
    Ask {
        /// The question
        question: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,

        /// Print text as it arrives instead of typing it out
        #[arg(long)]
        instant: bool,

        /// Skip thinking and analysis sections
        #[arg(long)]
        hide_thinking: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(rust_log))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Watch { task_id } => watch(config, &task_id).await,
        Commands::Ask {
            question,
            conversation,
            instant,
            hide_thinking,
        } => {
            let mut request = ChatRequest::new(question);
            if let Some(conversation) = conversation {
                request = request.in_conversation(conversation);
            }
            ask(config, request, instant, hide_thinking).await
        }
    }
}

async fn watch(config: CliConfig, task_id: &str) -> anyhow::Result<()> {
    let client = RealtimeClient::from_config(config.realtime)?;
    let subscription = client.subscribe(task_id);

    let mut progress = WatchStream::new(subscription.progress());
    let mut states = WatchStream::new(subscription.watch_state());
    let mut last_line = String::new();

    let outcome = loop {
        tokio::select! {
            Some(view) = progress.next() => {
                let line = progress_line(&view);
                if line != last_line {
                    println!("{}", line);
                    last_line = line;
                }
                if view.is_terminal() {
                    break Some(view);
                }
            }
            Some(state) = states.next() => {
                debug!(%state, "connection state");
                if let Some(note) = connection_line(state) {
                    eprintln!("{}", note);
                }
                if state == ConnectionState::Failed {
                    info!("press Ctrl-C to stop; polling continues");
                }
            }
            _ = tokio::signal::ctrl_c() => break None,
        }
    };

    subscription.dispose();

    match outcome {
        Some(view) if view.status == TaskStatus::Failed => {
            bail!(
                "task {} failed: {}",
                task_id,
                view.error_message.unwrap_or_else(|| "no details".to_string())
            )
        }
        _ => Ok(()),
    }
}

async fn ask(
    config: CliConfig,
    request: ChatRequest,
    instant: bool,
    hide_thinking: bool,
) -> anyhow::Result<()> {
    let client = ChatStreamClient::new(&config.chat)?;
    let mut events = client
        .ask(&request)
        .await
        .with_context(|| format!("request to {} failed", client.url()))?;

    let reveal_config = if instant {
        RevealConfig::instant()
    } else {
        config.chat.reveal
    };
    let mut turn = ChatTurn::new("turn");
    let mut reveal = TurnReveal::new(reveal_config, TokioClock::shared());
    let mut printer = AnswerPrinter::new(hide_thinking);
    let mut ticker = tokio::time::interval(config.chat.tick_interval());
    let mut stream_done = false;
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = events.next(), if !stream_done => {
                match event {
                    Some(event) => {
                        turn.apply(event);
                        stream_done = turn.is_terminal();
                    }
                    None => {
                        turn.end_of_stream();
                        stream_done = true;
                    }
                }
                reveal.sync(&turn);
            }
            _ = ticker.tick() => {
                reveal.tick();
                let out = printer.render(&reveal.visible_blocks());
                if !out.is_empty() {
                    write!(stdout, "{}", out)?;
                    stdout.flush()?;
                }
                if stream_done && reveal.is_complete() {
                    break;
                }
            }
        }
    }
    writeln!(stdout)?;

    match turn.error_message() {
        Some(message) => bail!("answer incomplete: {}", message),
        None => Ok(()),
    }
}
