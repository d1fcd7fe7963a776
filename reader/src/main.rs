use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use boundq::{Backend, BackingStore, Queue, QueueConfig, ShutdownFlag};
use std::cmp;
use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

const MIN_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(about = "Create a queue and consume messages from it")]
struct Opts {
    #[arg(short = 'c', long = "config", default_value = "boundq-reader.toml")]
    config: String,
    /// Stop after this many messages.
    #[arg(short = 'n', long = "count")]
    count: Option<usize>,
    /// Remove resources left behind by a previous run before creating.
    #[arg(long)]
    reset: bool,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ReaderConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = Opts::parse();
    let cfg: ReaderConfig = confy::load_path(&opts.config)?;
    tracing::info!(config = ?cfg.queue, "reader starting");
    let shutdown = ShutdownFlag::install()?;

    let path = cfg.queue.path();
    if opts.reset {
        Queue::unlink(&path)?;
    }
    match cfg.queue.backend {
        Backend::Shmem => run(
            Queue::create(&path, cfg.queue.capacity)?,
            &cfg.queue,
            &opts,
            &shutdown,
        ),
        Backend::File => {
            // A file left by an earlier run still holds its messages.
            let queue = if path.exists() {
                Queue::open_file_backed(&path)?
            } else {
                Queue::create_file_backed(&path, cfg.queue.capacity)?
            };
            run(queue, &cfg.queue, &opts, &shutdown)
        }
    }
}

fn run<S: BackingStore>(
    mut queue: Queue<S>,
    cfg: &QueueConfig,
    opts: &Opts,
    shutdown: &ShutdownFlag,
) -> Result<(), Box<dyn Error>> {
    tracing::info!(identity = %queue.identity(), "waiting for a writer");
    if !queue.wait_ready(cfg.ready_timeout())? {
        tracing::warn!("no writer signaled readiness, reading anyway");
    }

    let start = Instant::now();
    let mut received = 0usize;
    let mut backoff = MIN_BACKOFF;
    while !shutdown.is_closing() && opts.count.map_or(true, |n| received < n) {
        match queue.read(cfg.read_timeout())? {
            Some(message) => {
                received += 1;
                backoff = MIN_BACKOFF;
                println!("{}", message);
            }
            None => {
                tracing::debug!(?backoff, "queue empty");
                thread::sleep(backoff);
                backoff = cmp::min(backoff * 2, MAX_BACKOFF);
            }
        }
    }

    tracing::info!(
        received,
        elapsed = ?start.elapsed(),
        violations = queue.consistency_violations(),
        "reader done"
    );
    queue.close();
    Ok(())
}
