use bridge::AppState;
use bridge::config::{self, BridgeConfig, DeviceLinkBackend};
use clap::Parser;
use device_link::LoopbackHub;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ws-bridge", version, about = "WebSocket to device-link bridge")]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind`.
    #[arg(long, value_parser = parse_bind)]
    bind: Option<SocketAddr>,

    /// Log filter directive, overrides `logging.level`.
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn parse_bind(value: &str) -> Result<SocketAddr, String> {
    config::parse_bind(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => match config::load_config_from_path(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => BridgeConfig::default(),
    };
    if let Some(bind) = cli.bind {
        cfg.server.bind = bind;
    }
    if let Some(level) = cli.log_level {
        cfg.logging.level = level;
    }

    let filter = EnvFilter::try_new(&cfg.logging.level).unwrap_or_else(|e| {
        eprintln!("invalid log level '{}': {e}; using info", cfg.logging.level);
        EnvFilter::new(config::DEFAULT_LOG_LEVEL)
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "ws-bridge starting");

    let state = match cfg.device_link.backend {
        DeviceLinkBackend::Loopback => {
            let hub = LoopbackHub::new();
            AppState::new(Arc::new(hub.clone()), Arc::new(hub))
        }
    };

    if let Err(e) = bridge::serve(&cfg.server, state, shutdown_signal()).await {
        error!(error = %e, "ws-bridge failed");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutdown: SIGINT received"),
            _ = sigterm.recv() => info!("shutdown: SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown: Ctrl-C received");
    }
}
