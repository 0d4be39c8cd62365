mod agent;
mod cache;
mod config;
mod host;
mod http;
mod logging;
mod network;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use agent::{OfflineCacheAgent, WorkerHandler};
use cache::{CacheStore, MemoryStore, SqliteStore};
use config::Config;
use host::{LocalClients, Runtime};
use http::{Request, RequestMode};
use network::{HttpNetwork, Network, OfflineNetwork};

#[derive(Parser, Debug)]
#[command(name = "radar-offline")]
#[command(about = "Offline cache agent for the Radar Detector web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/radar-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache database path (overrides storage.path)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Keep caches in memory for this run only
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the current cache generation with the app shell
  Install,
  /// Delete stale cache generations once the current one is installed
  Activate,
  /// Install, then activate
  Up,
  /// Fetch a URL through the agent
  Fetch {
    url: String,
    /// Treat the request as a top-level page load
    #[arg(long, conflicts_with = "method")]
    navigate: bool,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Simulate a lost connection
    #[arg(long)]
    offline: bool,
    /// Write the response body to stdout
    #[arg(long)]
    body: bool,
  },
  /// List cache generations and their entries
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;

  let store: Arc<dyn CacheStore> = if args.ephemeral {
    Arc::new(MemoryStore::new())
  } else {
    let path = args.db.clone().or_else(|| config.storage.path.clone());
    Arc::new(SqliteStore::open(path.as_deref())?)
  };

  let offline = matches!(args.command, Command::Fetch { offline: true, .. });
  let network: Arc<dyn Network> = if offline {
    Arc::new(OfflineNetwork)
  } else {
    Arc::new(HttpNetwork::new(&config.network)?)
  };

  let agent = OfflineCacheAgent::new(
    config.agent.clone(),
    Arc::clone(&store),
    Arc::clone(&network),
    LocalClients::new(),
  );

  match args.command {
    Command::Install => agent.on_install().await,
    Command::Activate => agent.on_activate().await,
    Command::Up => {
      let mut runtime = Runtime::new(agent, network);
      runtime.start().await?;
      println!("{} is {}", config.agent.cache_name, runtime.state());
      Ok(())
    }
    Command::Fetch {
      url,
      navigate,
      method,
      body,
      ..
    } => {
      let url = agent.config().resolve(&url)?.to_string();
      let request = if navigate {
        Request::navigate(url)
      } else {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
          .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
        Request::new(url, method, RequestMode::NoCors)
      };

      let runtime = Runtime::resume(agent, network).await?;
      let served = runtime.fetch(&request).await?;

      if let Some(write) = served.cache_write {
        write.settled().await;
      }

      match served.response {
        Some(response) => {
          eprintln!(
            "{} {} ({:?}, {} bytes)",
            response.status,
            response.status_text,
            served.source,
            response.body.len()
          );
          if body {
            std::io::stdout()
              .write_all(&response.body)
              .map_err(|e| eyre!("Failed to write body: {}", e))?;
          }
        }
        None => eprintln!("no response ({:?})", served.source),
      }
      Ok(())
    }
    Command::Caches => {
      for name in store.keys()? {
        let marker = if name == config.agent.cache_name { "*" } else { " " };
        let status = store
          .status(&name)?
          .map(|s| s.as_str())
          .unwrap_or("unknown");
        let requests = store.requests(&name)?;
        println!("{} {} [{}] ({} entries)", marker, name, status, requests.len());
        for request in requests {
          println!("    {} {}", request.method, request.url);
        }
      }
      Ok(())
    }
  }
}
