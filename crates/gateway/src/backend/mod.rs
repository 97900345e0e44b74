//! Backend exchange: connections to the file server and single request cycles.
//!
//! Every browser request gets its own exchange. An exchange acquires a
//! connection (fresh by default, see [`ConnectionPool`]), performs exactly one
//! request/response cycle or opens one chunked transfer, and gives the
//! connection up when the cycle ends. Each blocking step is bounded by its own
//! deadline; there is no retry at this layer.

pub mod client;
pub mod connector;
pub mod pool;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use protocol::{FramedStream, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub use client::BackendClient;
pub use connector::TcpConnector;
pub use pool::ConnectionPool;

/// Failures of a backend exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The backend could not be reached or the connection was lost.
    #[error("backend connection failed: {0}")]
    Connection(String),

    /// One step of the exchange exceeded its deadline.
    #[error("backend timed out during {step}")]
    Timeout {
        /// The step that ran out of time.
        step: &'static str,
    },

    /// A reply could not be decoded.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// A reply decoded fine but arrived where the protocol does not allow it.
    #[error("backend protocol violation: {0}")]
    ProtocolViolation(String),
}

impl From<ProtocolError> for ExchangeError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::ConnectionClosed(_) | ProtocolError::Transport(_) => {
                ExchangeError::Connection(err.to_string())
            }
            ProtocolError::Timeout(_) => ExchangeError::Timeout { step: "transport" },
            ProtocolError::Serialization(_)
            | ProtocolError::Deserialization(_)
            | ProtocolError::FrameTooLarge { .. }
            | ProtocolError::InvalidFrameMagic { .. }
            | ProtocolError::UnsupportedVersion { .. } => ExchangeError::Malformed(err.to_string()),
        }
    }
}

/// Byte stream a backend connection runs over.
pub trait BackendIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> BackendIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased backend byte stream.
pub type BoxedIo = Box<dyn BackendIo>;

/// A framed backend connection.
pub type BackendConnection = FramedStream<BoxedIo>;

/// Opens byte streams to the backend.
///
/// Implementations establish the transport only; deadlines are applied by the
/// caller.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<BoxedIo, ExchangeError>> + Send + '_>>;
}

/// Run one protocol step under its own deadline.
pub(crate) async fn timed<T, F>(step: &'static str, limit: Duration, fut: F) -> Result<T, ExchangeError>
where
    F: Future<Output = protocol::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(ExchangeError::from),
        Err(_) => Err(ExchangeError::Timeout { step }),
    }
}
