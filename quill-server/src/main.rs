//! Quill collaboration relay.
//!
//! Reads `QUILL_*` settings (and `.env`), applies command line overrides,
//! then serves until Ctrl-C.

use anyhow::Context;
use clap::Parser;
use log::info;
use quill_collab::{RelayServer, ServerConfig};

/// Relay command line arguments.
#[derive(Parser, Debug)]
#[command(name = "quill-server")]
#[command(about = "Real-time collaboration relay for the Quill editor")]
struct Args {
    /// Address to listen on, overrides QUILL_BIND_ADDR
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Log filter used when RUST_LOG is unset, overrides QUILL_LOG_LEVEL
    #[arg(short, long, value_name = "FILTER")]
    log_level: Option<String>,

    /// Liveness ping interval in seconds, 0 disables
    #[arg(long, value_name = "SECS")]
    heartbeat: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(secs) = self.heartbeat {
            config.heartbeat_interval_secs = Some(secs);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::from_env().context("reading QUILL_* configuration")?;
    args.apply(&mut config);

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    info!("Starting Quill relay on {}", config.bind_addr);
    match config.heartbeat_interval() {
        Some(interval) => info!("Heartbeat every {interval:?}"),
        None => info!("Heartbeat disabled"),
    }

    let server = RelayServer::new(config);
    tokio::select! {
        result = server.run() => result.context("relay server stopped")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
