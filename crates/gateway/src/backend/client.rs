//! Request/response exchanges against the backend.

use std::sync::Arc;
use std::time::Duration;

use protocol::{FramedStream, Message, Request, Response};

use super::{timed, BackendConnection, ConnectionPool, Connector, ExchangeError};
use crate::bridge::ChunkStreamBridge;

/// Issues backend commands, one exchange per call.
///
/// Cloning is not needed; share it behind an `Arc`.
pub struct BackendClient {
    pool: ConnectionPool,
}

impl BackendClient {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Client that dials a fresh connection for every exchange.
    pub fn unpooled(connector: Arc<dyn Connector>) -> Self {
        Self::new(ConnectionPool::unpooled(connector))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Perform one request/response cycle.
    ///
    /// `step_timeout` bounds each of connect, send and receive separately. On
    /// success the connection goes back to the pool (or is closed when
    /// unpooled); on any failure it is dropped.
    pub async fn send(&self, request: Request, step_timeout: Duration) -> Result<Response, ExchangeError> {
        let command = request.command().to_string();
        let io = self.pool.acquire(step_timeout).await?;
        let mut conn = FramedStream::new(io);

        match exchange(&mut conn, request, step_timeout).await {
            Ok(response) => {
                tracing::debug!(%command, code = response.code, "Backend exchange complete");
                self.pool.release(conn.into_inner()).await;
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(%command, error = %e, "Backend exchange failed");
                Err(e)
            }
        }
    }

    /// Start a chunked transfer.
    ///
    /// The request is sent before returning; the bridge is then waiting for
    /// the transfer header. Streaming connections are never pooled.
    pub async fn open_transfer(
        &self,
        request: Request,
        step_timeout: Duration,
    ) -> Result<ChunkStreamBridge, ExchangeError> {
        let io = self.pool.acquire(step_timeout).await?;
        let mut bridge = ChunkStreamBridge::new(FramedStream::new(io), step_timeout);
        bridge.start(request).await?;
        Ok(bridge)
    }
}

async fn exchange(
    conn: &mut BackendConnection,
    request: Request,
    step_timeout: Duration,
) -> Result<Response, ExchangeError> {
    timed("send request", step_timeout, conn.send(Message::Request(request))).await?;

    match timed("receive response", step_timeout, conn.recv()).await? {
        Message::Response(response) => Ok(response),
        other => Err(ExchangeError::ProtocolViolation(format!(
            "expected a response, got {}",
            other.kind()
        ))),
    }
}
