//! Typoguard - typosquatting and phishing guard
//!
//! A local forward proxy that warns before you land on a lookalike of a site
//! you use, and before you hand a known password to a different site.

mod app;
mod error;
mod guard;
mod http;
mod proxy;

pub use error::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::Config;
use crate::guard::{DecisionEngine, JsonFileStore, RegistryStore, TrustRegistry};
use crate::proxy::ProxyServer;

/// Typosquatting and phishing guard proxy
#[derive(Parser, Debug)]
#[command(name = "typoguard")]
#[command(author, version, about = "Typosquatting and phishing guard proxy", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TYPOGUARD_CONFIG")]
    config: Option<String>,

    /// Proxy port (overrides the configuration file)
    #[arg(short, long, env = "TYPOGUARD_PROXY_PORT")]
    proxy_port: Option<u16>,

    /// Directory holding the registry file
    #[arg(long, env = "TYPOGUARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Disable password-strength warnings
    #[arg(long)]
    no_password_policy: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TYPOGUARD_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, env = "TYPOGUARD_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, env = "TYPOGUARD_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle special commands first
    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting typoguard");

    let config = load_config(&cli)?;

    if cli.validate_config {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        handle_signals(signal_tx).await;
    });

    let result = run(config, shutdown_rx).await;

    tracing::info!("typoguard shut down");

    result
}

/// Initialize the logging system
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let file_appender = if log_path.contains('/') || log_path.contains('\\') {
            let path = Path::new(log_path);
            let dir = path.parent().unwrap_or(Path::new("."));
            let filename = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("typoguard.log");
            RollingFileAppender::new(Rotation::DAILY, dir, filename)
        } else {
            let log_dir = Config::data_dir()
                .map(|d| d.join("logs"))
                .unwrap_or_else(|_| PathBuf::from("."));
            std::fs::create_dir_all(&log_dir).ok();
            RollingFileAppender::new(Rotation::DAILY, log_dir, log_path)
        };

        if cli.log_json {
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false);
            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).init();
        }
    } else if cli.log_json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    Ok(())
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(port) = cli.proxy_port {
        config.proxy.default_port = port;
    }
    if let Some(dir) = &cli.data_dir {
        config.general.data_dir = Some(dir.clone());
    }
    if cli.no_password_policy {
        config.guard.password_policy = false;
    }

    if let Err(e) = config.validate() {
        anyhow::bail!("{}", GuardError::from(e).user_message());
    }

    Ok(config)
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    let config = Config::default();
    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

    println!("{}", toml);
    Ok(())
}

/// Handle shutdown signals
async fn handle_signals(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to register signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(windows)]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to register Ctrl+C handler: {}", e);
            return;
        }
        tracing::info!("Received Ctrl+C, initiating shutdown");
    }

    let _ = shutdown_tx.send(());
}

/// Load the registry, serve until shutdown, then save the registry
async fn run(config: Config, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let store = JsonFileStore::new(config.registry_path()?);
    let websites = match store.load() {
        Ok(websites) => websites,
        Err(e) => {
            tracing::error!(error = %e, "{}", e.user_message());
            Vec::new()
        }
    };
    let registry = TrustRegistry::from_websites(websites);
    tracing::info!(records = registry.len(), "Trust registry ready");

    let engine = Arc::new(
        DecisionEngine::from_config(&config.guard, registry)
            .map_err(|e| anyhow::anyhow!(e.user_message()))?,
    );

    let server = ProxyServer::new(&config.proxy, config.proxy.default_port, engine.clone());
    let addr = server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!(GuardError::from(e).user_message()))?;
    tracing::info!("Point your browser's HTTP proxy at {}", addr);

    let auto_save = config.general.auto_save_interval;
    if auto_save > 0 {
        let mut ticker = tokio::time::interval(Duration::from_secs(auto_save));
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => save_registry(&store, &engine),
                _ = shutdown_rx.recv() => break,
            }
        }
    } else {
        let _ = shutdown_rx.recv().await;
    }

    if server.is_running() {
        server.stop();
    }
    save_registry(&store, &engine);

    Ok(())
}

fn save_registry(store: &impl RegistryStore, engine: &DecisionEngine) {
    if let Err(e) = store.save(&engine.snapshot()) {
        tracing::error!(error = %e, "{}", e.user_message());
    }
}
