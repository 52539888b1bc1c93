use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden::config::{AppConfig, LoggingConfig};
use warden::error::Result;
use warden::service::Warden;
use warden::session::WsTransport;

#[derive(Parser)]
#[command(name = "warden", about = "Supervision server for remote DAQ process trees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervision server
    Serve {
        /// Configuration directory
        #[arg(long, default_value = "config")]
        config: String,
    },
    /// Validate and print the effective configuration
    CheckConfig {
        /// Configuration directory
        #[arg(long, default_value = "config")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => run_serve(&config).await?,
        Commands::CheckConfig { config } => {
            init_logging(&LoggingConfig::default());
            run_check_config(&config)?;
        }
    }

    Ok(())
}

async fn run_serve(config_dir: &str) -> Result<()> {
    let config = AppConfig::load_from(config_dir)?;
    init_logging(&config.logging);
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Configuration error: {}", e);
        }
        return Err(warden::WardenError::Internal("invalid configuration".to_string()));
    }

    info!("Connecting to broker at {}", config.server.ws_url);
    let transport = Arc::new(WsTransport::new(&config.server.ws_url)?);
    let service = Warden::new(config, transport, None);

    service.start().await?;
    info!("Supervision server running, press Ctrl+C to stop");

    shutdown_signal().await;
    info!("Shutdown signal received");

    service.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

fn run_check_config(config_dir: &str) -> Result<()> {
    let config = AppConfig::load_from(config_dir)?;
    match config.validate() {
        Ok(()) => {
            info!("Configuration is valid");
            info!("  server.ws_url = {}", config.server.ws_url);
            info!("  server.topics.supervision = {}", config.server.topics.supervision);
            info!("  server.topics.request = {}", config.server.topics.request);
            info!("  delivery.queue_capacity = {}", config.delivery.queue_capacity);
            info!(
                "  delivery.slow_consumer_threshold_secs = {}",
                config.delivery.slow_consumer_threshold_secs
            );
            info!(
                "  connection.reconnect_backoff_secs = {}",
                config.connection.reconnect_backoff_secs
            );
            info!(
                "  connection.request_timeout_secs = {}",
                config.connection.request_timeout_secs
            );
            info!("  supervision.scan_interval_secs = {}", config.supervision.scan_interval_secs);
            info!("  supervision.test_mode = {}", config.supervision.test_mode);
            Ok(())
        }
        Err(errors) => {
            for e in &errors {
                error!("Configuration error: {}", e);
            }
            Err(warden::WardenError::Internal("invalid configuration".to_string()))
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warden=debug", logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
