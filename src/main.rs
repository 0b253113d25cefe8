use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camkeeper::config::{AppConfig, BackendKind};
use camkeeper::web;
use camkeeper::Coordinator;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// camkeeper command line arguments
#[derive(Parser, Debug)]
#[command(name = "camkeeper")]
#[command(version, about = "Power-aware camera coordinator with MJPEG streaming and still capture", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Directory for captured images (overrides config)
    #[arg(short = 'd', long, value_name = "DIR")]
    capture_dir: Option<PathBuf>,

    /// V4L2 device node; selects the V4L2 backend
    #[arg(long, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting camkeeper v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    let bind_addr: SocketAddr =
        format!("{}:{}", config.web.bind_address, config.web.port).parse()?;

    let coordinator = Coordinator::from_config(config).await?;
    coordinator.boot().await;
    coordinator.spawn_monitors();

    let app = web::create_router(coordinator.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("HTTP server listening on http://{}", bind_addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
    }

    coordinator.shutdown().await;
    tracing::info!("camkeeper stopped");
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(address) = &args.address {
        config.web.bind_address = address.clone();
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }
    if let Some(dir) = &args.capture_dir {
        config.storage.directory = dir.clone();
    }
    if let Some(device) = &args.device {
        config.device.backend = BackendKind::V4l2;
        config.device.path = device.clone();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Initialize logging with the given level and verbosity
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camkeeper=error,tower_http=error",
        LogLevel::Warn => "camkeeper=warn,tower_http=warn",
        LogLevel::Info => "camkeeper=info,tower_http=info",
        LogLevel::Verbose => "camkeeper=debug,tower_http=info",
        LogLevel::Debug => "camkeeper=debug,tower_http=debug",
        LogLevel::Trace => "camkeeper=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
