//! # Driveport Gateway Library
//!
//! This crate puts a browser-facing HTTP front end in front of a remote
//! file-storage backend that speaks the framed protocol from the
//! [`protocol`] crate.
//!
//! ## Overview
//!
//! Each browser action becomes one backend exchange:
//!
//! - **Drive list**: `info` rendered as a list of drives
//! - **Directories**: `stat` then `listdir`, sorted into a directory page
//! - **Files**: `stat` then a chunked `readfiles` transfer streamed into the
//!   response body without buffering the whole file
//! - **Sessions**: `login` and `logout`, with the session carried in cookies
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        HTTP routes (web)                      │
//! │   session cookies ─▶ interpret status ─▶ view ─▶ render       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐        ┌──────────────────────────┐  │
//! │  │  BackendClient     │        │  ChunkStreamBridge       │  │
//! │  │  one request cycle │        │  header/chunks/footer    │  │
//! │  └────────────────────┘        └──────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  ConnectionPool ─▶ Connector (TCP + TLS)               │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gateway::backend::{BackendClient, ConnectionPool, TcpConnector};
//! use gateway::config::GatewayConfig;
//! use gateway::web::{router, AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(GatewayConfig::load_default()?);
//!     let connector = Arc::new(TcpConnector::from_config(&config.backend)?);
//!     let client = Arc::new(BackendClient::new(ConnectionPool::new(
//!         connector,
//!         config.backend.pool_max_idle,
//!     )));
//!
//!     let app = router(AppState::new(client, config.clone()));
//!     let listener = tokio::net::TcpListener::bind(config.server.address()).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, overrides and validation
//! - [`backend`]: Connections and request/response exchanges
//! - [`bridge`]: Chunked transfer state machine
//! - [`interpret`]: Backend status code handling
//! - [`session`]: Session cookies
//! - [`view`]: Page models and name ordering
//! - [`render`]: HTML output
//! - [`web`]: Routes and handlers

pub mod backend;
pub mod bridge;
pub mod config;
pub mod error;
pub mod interpret;
pub mod render;
pub mod session;
pub mod view;
pub mod web;

pub use backend::{BackendClient, ConnectionPool, Connector, ExchangeError, TcpConnector};
pub use bridge::{ChunkSink, ChunkStreamBridge, TransferFailure, TransferStage, TransferSummary};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use interpret::{interpret, Verdict};
pub use session::Session;
pub use web::{router, AppState};
