use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use boundq::{Backend, BackingStore, Queue, QueueConfig, QueueError, ShutdownFlag, Timeout};
use std::error::Error;
use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

const RETRY_PAUSE: Duration = Duration::from_millis(1_000);

#[derive(Parser)]
#[command(about = "Attach to a queue and write messages into it")]
struct Opts {
    #[arg(short = 'c', long = "config", default_value = "boundq-writer.toml")]
    config: String,
    /// Cut over-long messages to fit a slot instead of skipping them.
    #[arg(long)]
    truncate: bool,
    /// Messages to send. Lines from stdin are sent when none are given.
    messages: Vec<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct WriterConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = Opts::parse();
    let cfg: WriterConfig = confy::load_path(&opts.config)?;
    tracing::info!(config = ?cfg.queue, "writer starting");
    let shutdown = ShutdownFlag::install()?;

    let path = cfg.queue.path();
    match cfg.queue.backend {
        Backend::Shmem => run(Queue::attach(&path)?, &cfg.queue, &opts, &shutdown),
        Backend::File => run(Queue::attach_file_backed(&path)?, &cfg.queue, &opts, &shutdown),
    }
}

fn run<S: BackingStore>(
    mut queue: Queue<S>,
    cfg: &QueueConfig,
    opts: &Opts,
    shutdown: &ShutdownFlag,
) -> Result<(), Box<dyn Error>> {
    queue.signal_ready()?;

    let messages: Box<dyn Iterator<Item = io::Result<String>>> = if opts.messages.is_empty() {
        Box::new(io::stdin().lock().lines())
    } else {
        Box::new(opts.messages.clone().into_iter().map(Ok))
    };

    let mut sent = 0usize;
    for message in messages {
        if shutdown.is_closing() {
            tracing::info!("shutdown requested");
            break;
        }
        let message = message?;
        let message = if opts.truncate {
            boundq::truncate_message(&message)
        } else {
            message.as_str()
        };
        if send(&queue, message, cfg.write_timeout())? {
            sent += 1;
        }
    }

    tracing::info!(sent, status = ?queue.status().ok(), "writer done");
    queue.close();
    Ok(())
}

/// Writes one message, retrying once on a full queue. Messages that still
/// cannot be placed, or that the queue refuses, are logged and skipped.
fn send<S: BackingStore>(queue: &Queue<S>, message: &str, timeout: Timeout) -> Result<bool, QueueError> {
    let mut retried = false;
    loop {
        match queue.write(message, timeout) {
            Ok(()) => {
                tracing::info!(text = message, "sent");
                return Ok(true);
            }
            Err(QueueError::WouldBlock) if !retried => {
                tracing::warn!(text = message, "queue full, retrying");
                retried = true;
                thread::sleep(RETRY_PAUSE);
            }
            Err(e @ QueueError::MessageTooLong { .. }) | Err(e @ QueueError::InvalidMessage) => {
                tracing::warn!(text = message, error = %e, "message rejected");
                return Ok(false);
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(text = message, error = %e, "message skipped");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
    }
}
