//! Driveport Gateway
//!
//! Serves the browser front end for a Driveport file-storage backend.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use clap::{Args, Parser, Subcommand};
use gateway::backend::{BackendClient, ConnectionPool, TcpConnector};
use gateway::config::GatewayConfig;
use gateway::web::{router, AppState};
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Driveport - browser gateway for a remote file-storage service.
#[derive(Parser, Debug)]
#[command(name = "driveport")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP gateway
    Serve(ServeArgs),

    /// Print version information
    Version,
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Backend host
    #[arg(long)]
    pub backend_host: Option<String>,

    /// Backend port
    #[arg(long)]
    pub backend_port: Option<u16>,

    /// Skip verification of the backend certificate
    #[arg(long, short)]
    pub insecure: bool,

    /// TLS certificate (PEM) for the HTTP listener
    #[arg(long, value_name = "FILE", requires = "key")]
    pub cert: Option<PathBuf>,

    /// TLS private key (PEM) for the HTTP listener
    #[arg(long, value_name = "FILE", requires = "cert")]
    pub key: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.backend_host {
            config.backend.host = host;
        }
        if let Some(port) = self.backend_port {
            config.backend.port = port;
        }
        if self.insecure {
            config.backend.insecure_skip_verify = true;
        }
        if self.cert.is_some() {
            config.server.tls_cert = self.cert;
            config.server.tls_key = self.key;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::load_default()?,
    };

    // Subscriber first so override warnings are not lost
    init_tracing(&config.startup_log_level(cli.verbose));
    if let Some(path) = &cli.config {
        tracing::info!("Using config file: {:?}", path);
    }

    // Apply environment variable overrides
    config.apply_env_overrides();

    match cli.command {
        Commands::Version => {
            println!("driveport {}", env!("CARGO_PKG_VERSION"));
            println!("Platform: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
            Ok(())
        }
        Commands::Serve(args) => {
            args.apply(&mut config);
            config.validate()?;
            serve(config).await
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("TLS crypto provider already installed");
    }

    let config = Arc::new(config);
    let connector = Arc::new(
        TcpConnector::from_config(&config.backend).context("Failed to set up backend connector")?,
    );
    let client = Arc::new(BackendClient::new(ConnectionPool::new(
        connector,
        config.backend.pool_max_idle,
    )));
    let app = router(AppState::new(client, config.clone()));

    let addr: SocketAddr = tokio::net::lookup_host(config.server.address())
        .await
        .with_context(|| format!("Failed to resolve {}", config.server.address()))?
        .next()
        .with_context(|| format!("No address for {}", config.server.address()))?;

    tracing::info!(
        listen = %addr,
        backend = %config.backend.address(),
        backend_tls = config.backend.tls,
        pool_max_idle = config.backend.pool_max_idle,
        "Driveport gateway starting"
    );

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    match config.server.tls_pair() {
        Some((cert, key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key)
                .await
                .with_context(|| format!("Failed to load TLS certificate {}", cert.display()))?;
            tracing::info!("Serving HTTPS on {}", addr);
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            tracing::warn!("No TLS certificate configured; serving plain HTTP on {}", addr);
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    tracing::info!("Driveport gateway stopped");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
