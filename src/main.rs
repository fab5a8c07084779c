mod cache;
mod config;
mod event;
mod http;
mod net;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::cache::{CacheStore, MemoryStore, SqliteStore};
use crate::config::Config;
use crate::event::{EventPump, WorkerEvent};
use crate::http::Request;
use crate::net::HttpFetcher;
use crate::worker::{CachePolicyRouter, InProcessHost, WorkerHandler, WorkerHost};

#[derive(Parser, Debug)]
#[command(name = "mihrab")]
#[command(about = "Offline-first cache router for a web app shell and its data APIs")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mihrab/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory instead of on disk
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the configured app-shell manifest
  Install,
  /// Purge stale cache generations and take over open clients
  Activate,
  /// Route one or more URLs through the cache policies
  Fetch {
    #[arg(required = true)]
    urls: Vec<Url>,

    /// Print response bodies to stdout
    #[arg(long)]
    body: bool,
  },
  /// List cache generations and entry counts
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Arc::new(Config::load(args.config.as_deref())?);

  if args.ephemeral {
    run(args.command, config, Arc::new(MemoryStore::new())).await
  } else {
    run(args.command, config, Arc::new(SqliteStore::open()?)).await
  }
}

async fn run<S: CacheStore + 'static>(
  command: Command,
  config: Arc<Config>,
  store: Arc<S>,
) -> Result<()> {
  match command {
    Command::Status => print_status(&config, store.as_ref()),
    Command::Install => {
      let worker = Worker::start(config, store)?;
      worker.send(WorkerEvent::Install)?;
      worker.finish().await
    }
    Command::Activate => {
      let worker = Worker::start(config, store)?;
      worker.send(WorkerEvent::Activate)?;
      worker.finish().await
    }
    Command::Fetch { urls, body } => {
      let worker = Worker::start(config, store)?;

      let mut replies = Vec::with_capacity(urls.len());
      for url in urls {
        let (reply, rx) = oneshot::channel();
        worker.send(WorkerEvent::Fetch {
          request: Request::get(url.clone()),
          reply,
        })?;
        replies.push((url, rx));
      }

      for (url, rx) in replies {
        match rx.await {
          Ok(Ok(response)) => {
            println!("{} {} ({} bytes)", response.status, url, response.body.len());
            if body {
              use std::io::Write;
              std::io::stdout()
                .write_all(&response.body)
                .map_err(|e| eyre!("Failed to write body: {}", e))?;
            }
          }
          Ok(Err(e)) => println!("ERR {}: {}", url, e),
          Err(_) => println!("ERR {}: worker dropped the request", url),
        }
      }

      worker.finish().await
    }
  }
}

/// A running worker: the policy router behind an event pump.
struct Worker {
  tx: mpsc::UnboundedSender<WorkerEvent>,
  task: JoinHandle<Result<()>>,
}

impl Worker {
  fn start<S: CacheStore + 'static>(config: Arc<Config>, store: Arc<S>) -> Result<Self> {
    let fetcher = Arc::new(HttpFetcher::new()?);
    let host = Arc::new(InProcessHost::new());
    let router = CachePolicyRouter::new(config, store, fetcher, host as Arc<dyn WorkerHost>)?;

    let (tx, pump) = EventPump::new(Arc::new(router) as Arc<dyn WorkerHandler>);
    let task = tokio::spawn(pump.run());

    Ok(Self { tx, task })
  }

  fn send(&self, event: WorkerEvent) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|e| eyre!("Failed to queue event: {}", e))
  }

  /// Drop the sender and let the pump drain.
  async fn finish(self) -> Result<()> {
    drop(self.tx);
    self
      .task
      .await
      .map_err(|e| eyre!("Event pump panicked: {}", e))?
  }
}

fn print_status<S: CacheStore>(config: &Config, store: &S) -> Result<()> {
  let keys = store.keys()?;
  if keys.is_empty() {
    println!("No cache generations.");
    return Ok(());
  }

  let keep = [
    config.cache.precache_name.as_str(),
    config.cache.runtime_name.as_str(),
  ];
  for name in keys {
    let count = store.count(&name)?;
    let marker = if keep.contains(&name.as_str()) {
      ""
    } else {
      " (stale)"
    };
    println!("{}  {} entries{}", name, count, marker);
  }

  Ok(())
}
