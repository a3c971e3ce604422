mod cache;
mod config;
mod logging;
mod net;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

use cache::{CacheStore, SqliteStore};
use net::{HttpFetcher, Request, RequestMode};
use worker::{ActivationReport, EventOutcome, ServiceWorker, WorkerEvent};

#[derive(Parser, Debug)]
#[command(name = "tilekeep")]
#[command(about = "Offline cache for map applications: shell assets, pages and tiles")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tilekeep/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Directory for the log file (default: $XDG_STATE_HOME/tilekeep)
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the shell cache for the configured generation and activate it
  Install,
  /// Delete caches of other generations
  Activate,
  /// Answer one request the way the worker would
  Fetch {
    url: String,
    #[arg(long, value_enum, default_value_t = RequestMode::SameOrigin)]
    mode: RequestMode,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Deliver a JSON control message, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// List cache partitions
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;

  let log_dir = match args.log_dir {
    Some(dir) => dir,
    None => logging::default_log_dir()?,
  };
  let _log_guard = logging::init_logging(&log_dir)?;

  let store = Arc::new(SqliteStore::open(&config.database_path()?)?);
  let fetcher = Arc::new(HttpFetcher::new(
    &config.app.base_url,
    &config.user_agent(),
    config.timeout(),
  )?);
  let worker = ServiceWorker::new(&config, Arc::clone(&store), fetcher)?;

  match args.command {
    Command::Install => {
      let outcome = worker.handle(WorkerEvent::Install).await?;
      if let EventOutcome::Installed {
        install,
        activation,
      } = outcome
      {
        println!("installed {} assets into {}", install.assets, install.shell_cache);
        if let Some(activation) = activation {
          print_activation(&activation);
        }
      }
    }
    Command::Activate => {
      let report = worker.activate().await?;
      print_activation(&report);
    }
    Command::Fetch {
      url,
      mode,
      method,
      output,
    } => {
      let request = Request::parse(&url)?.with_mode(mode).with_method(&method);
      let served = worker.fetch(&request).await;
      let response = &served.response;

      println!(
        "{} {} ({}, {}, {} bytes{})",
        response.status,
        response.status_text,
        served.source.as_str(),
        response.kind.as_str(),
        response.body.len(),
        response
          .header("content-type")
          .map(|ct| format!(", {}", ct))
          .unwrap_or_default()
      );

      if let Some(path) = output {
        std::fs::write(&path, &response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      }

      // Let tile revalidation finish before the process exits
      worker.drain().await;
    }
    Command::Message { json } => match worker.handle(WorkerEvent::Message(json)).await? {
      EventOutcome::Signalled(Some(report)) => print_activation(&report),
      EventOutcome::Signalled(None) => println!("state: {}", worker.state()),
      _ => println!("message ignored"),
    },
    Command::Caches => {
      let generation = worker.generation();
      for info in store.partition_info()? {
        let marker = if generation.owns(&info.name) { "*" } else { " " };
        println!(
          "{} {:<32} {:>8} entries  created {}",
          marker,
          info.name,
          info.entries,
          info.created_at.format("%Y-%m-%d %H:%M:%S")
        );
      }
    }
  }

  Ok(())
}

fn print_activation(report: &ActivationReport) {
  for name in &report.deleted {
    println!("deleted {}", name);
  }
  for name in &report.failed {
    println!("could not delete {}", name);
  }
  println!("active");
}
