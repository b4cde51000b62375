//! Media request dispatcher.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌────────────────────────────────────────────────────┐
//!                        │                   DISPATCHER                       │
//!                        │                                                    │
//!   Client "M3"          │  ┌─────────┐   ┌──────────┐   ┌────────────────┐   │
//!   ─────────────────────┼─▶│   net   │──▶│ dispatch │──▶│ load_balancer  │   │
//!                        │  │listener │   │ handler  │   │ virtual finish │   │
//!                        │  └─────────┘   └──────────┘   └───────┬────────┘   │
//!                        │                                       │            │
//!                        │                                       ▼            │
//!   Client response      │  ┌──────────┐                 ┌────────────────┐   │
//!   ◀────────────────────┼──│ response │◀────────────────│    backend     │◀──┼── Backend
//!                        │  │  relay   │                 │   connection   │   │   server
//!                        │  └──────────┘                 └────────────────┘   │
//!                        │                                                    │
//!                        │  config · observability · resilience · lifecycle   │
//!                        └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use media_dispatcher::config::{load_config, DispatcherConfig};
use media_dispatcher::lifecycle::startup;
use media_dispatcher::observability::logging;

#[derive(Parser)]
#[command(name = "media-dispatcher")]
#[command(about = "Routes media requests to the backend that will finish them first", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Built-in defaults are used if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => DispatcherConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        backends = config.backends.len(),
        strategy = ?config.scheduler.strategy,
        "media-dispatcher starting"
    );

    startup::run(config).await?;
    Ok(())
}
