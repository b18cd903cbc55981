mod cache;
mod config;
mod db;
mod dispatch;
mod error;
mod lifecycle;
mod net;
mod notify;
mod queue;
mod strategy;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use crate::net::{Destination, Method, Request, Response};
use crate::notify::NotificationClick;
use crate::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "offline-shell")]
#[command(about = "Offline-first request caching and mutation replay for a web app shell")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-shell/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin; overrides the config file
  #[arg(long)]
  origin: Option<Url>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch the shell assets into the current cache namespace
  Install,
  /// Delete stale cache namespaces and take control of requests
  Activate,
  /// Send a request through the worker
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Treat the request as a top-level navigation
    #[arg(long)]
    navigate: bool,

    /// Resource type (style, script, image, font, document)
    #[arg(long)]
    destination: Option<Destination>,

    /// Bearer token sent with the request
    #[arg(long, env = "OFFLINE_SHELL_TOKEN", hide_env_values = true)]
    token: Option<String>,
  },
  /// Look a URL up in the current cache namespace only
  Cached { url: String },
  /// Queue a JSON mutation for later replay
  Enqueue {
    payload: String,

    #[arg(long, env = "OFFLINE_SHELL_TOKEN", hide_env_values = true)]
    token: Option<String>,
  },
  /// Deliver a sync signal (default: the queue's sync tag)
  Sync {
    #[arg(long)]
    tag: Option<String>,
  },
  /// List mutations waiting for replay
  Queue,
  /// List cache namespaces
  Namespaces,
  /// Deliver a push message
  Push { text: Option<String> },
  /// Deliver a notification click
  Click {
    #[arg(long, default_value = "")]
    tag: String,

    /// Clicked action; omit for the notification body
    #[arg(long)]
    action: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.verbose)?;

  let config = config::Config::load(args.config.as_deref(), args.origin)?;
  let worker = Worker::open(&config)?;

  let result = run(&worker, &config, args.command).await;

  // Revalidations and other detached work finish before the process exits.
  worker.wait_until_idle().await;
  for e in worker.background_errors() {
    eprintln!("background task {} failed: {}", e.task, e.message);
  }

  result
}

/// File logging under the data directory, plus stderr when verbose.
fn init_tracing(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "offline-shell.log"));
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(verbose.then(|| fmt::layer().with_writer(std::io::stderr)))
    .init();

  Ok(guard)
}

async fn run(worker: &Worker, config: &config::Config, command: Command) -> Result<()> {
  match command {
    Command::Install => {
      let stored = worker.on_install().await?;
      println!("installed {} shell assets into {}", stored, worker.current_namespace());
    }
    Command::Activate => {
      let deleted = worker.on_activate().await?;
      println!("activated {}", worker.current_namespace());
      for namespace in deleted {
        println!("  deleted {}", namespace);
      }
    }
    Command::Fetch {
      url,
      method,
      data,
      navigate,
      destination,
      token,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let url = config.resolve(&url)?;

      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::new(method.clone(), url)
      };
      request.method = method;
      if let Some(destination) = destination {
        request = request.with_destination(destination);
      }
      if let Some(data) = data {
        request = request
          .with_header("content-type", "application/json")
          .with_body(data);
      }
      if let Some(token) = token.filter(|t| !t.is_empty()) {
        request = request.with_header("authorization", format!("Bearer {}", token));
      }

      println!("route: {}", worker.classify(&request));
      print_response(&worker.dispatch(&request).await?);
    }
    Command::Cached { url } => {
      print_response(&worker.cached(&Request::get(config.resolve(&url)?))?);
    }
    Command::Enqueue { payload, token } => {
      let payload = serde_json::from_str(&payload).map_err(|e| eyre!("Invalid JSON payload: {}", e))?;
      let item = worker.enqueue(payload, token.as_deref().unwrap_or_default())?;
      println!("queued {}", item.id);
    }
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| worker.sync_tag().to_string());
      match worker.on_sync(&tag).await? {
        Some(report) => println!(
          "replayed {}, retained {}, skipped {}",
          report.replayed, report.retained, report.skipped
        ),
        None => println!("ignored sync tag {}", tag),
      }
    }
    Command::Queue => {
      let items = worker.pending()?;
      println!("{} pending for {}", items.len(), worker.queue_endpoint());
      for item in items {
        println!("  {}  {}  {}", item.id, item.created_at.to_rfc3339(), item.payload);
      }
    }
    Command::Namespaces => {
      for namespace in worker.namespaces()? {
        let marker = if namespace == worker.current_namespace() { "*" } else { " " };
        println!("{} {}", marker, namespace);
      }
    }
    Command::Push { text } => {
      if worker.on_push(text.as_deref().map(str::as_bytes)).await.is_none() {
        println!("push dropped");
      }
    }
    Command::Click { tag, action } => {
      let opened = worker
        .on_notification_click(&NotificationClick { tag, action })
        .await?;
      if !opened {
        println!("notification closed");
      }
    }
  }

  Ok(())
}

fn print_response(response: &Response) {
  println!("status: {} ({:?})", response.status, response.source);
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", String::from_utf8_lossy(&response.body));
}
