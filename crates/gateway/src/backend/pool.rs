//! Optional reuse of idle backend connections.
//!
//! With `max_idle == 0` (the default) every exchange dials a fresh connection
//! and drops it afterwards. A positive `max_idle` keeps up to that many
//! connections that finished a clean request/response cycle. A connection that
//! saw any error is never returned here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::{BoxedIo, Connector, ExchangeError};

/// Hands out backend connections.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    max_idle: usize,
    idle: Mutex<Vec<BoxedIo>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, max_idle: usize) -> Self {
        Self {
            connector,
            max_idle,
            idle: Mutex::new(Vec::with_capacity(max_idle)),
        }
    }

    /// A pool that never keeps connections.
    pub fn unpooled(connector: Arc<dyn Connector>) -> Self {
        Self::new(connector, 0)
    }

    /// Take an idle connection or dial a new one within `connect_timeout`.
    pub async fn acquire(&self, connect_timeout: Duration) -> Result<BoxedIo, ExchangeError> {
        if let Some(io) = self.idle.lock().await.pop() {
            tracing::trace!("Reusing idle backend connection");
            return Ok(io);
        }

        match tokio::time::timeout(connect_timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout { step: "connect" }),
        }
    }

    /// Give back a connection that completed a clean cycle.
    pub async fn release(&self, io: BoxedIo) {
        if self.max_idle == 0 {
            return;
        }
        let mut idle = self.idle.lock().await;
        if idle.len() < self.max_idle {
            idle.push(io);
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    pub fn max_idle(&self) -> usize {
        self.max_idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector {
        dialed: AtomicUsize,
    }

    impl Connector for CountingConnector {
        fn connect(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<BoxedIo, ExchangeError>> + Send + '_>> {
            Box::pin(async move {
                self.dialed.fetch_add(1, Ordering::SeqCst);
                let (io, _peer) = tokio::io::duplex(64);
                Ok(Box::new(io) as BoxedIo)
            })
        }
    }

    struct StalledConnector;

    impl Connector for StalledConnector {
        fn connect(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<BoxedIo, ExchangeError>> + Send + '_>> {
            Box::pin(std::future::pending::<Result<BoxedIo, ExchangeError>>())
        }
    }

    fn counting() -> Arc<CountingConnector> {
        Arc::new(CountingConnector {
            dialed: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_unpooled_dials_every_time() {
        let connector = counting();
        let pool = ConnectionPool::unpooled(connector.clone());

        for _ in 0..3 {
            let io = pool.acquire(Duration::from_secs(1)).await.unwrap();
            pool.release(io).await;
        }

        assert_eq!(connector.dialed.load(Ordering::SeqCst), 3);
        assert_eq!(pool.idle_count().await, 0);
    }

    #[tokio::test]
    async fn test_pooled_reuses_released_connections() {
        let connector = counting();
        let pool = ConnectionPool::new(connector.clone(), 1);

        let io = pool.acquire(Duration::from_secs(1)).await.unwrap();
        pool.release(io).await;
        let io = pool.acquire(Duration::from_secs(1)).await.unwrap();
        pool.release(io).await;

        assert_eq!(connector.dialed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count().await, 1);
    }

    #[tokio::test]
    async fn test_pool_caps_idle_connections() {
        let connector = counting();
        let pool = ConnectionPool::new(connector.clone(), 2);

        let a = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let b = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let c = pool.acquire(Duration::from_secs(1)).await.unwrap();
        pool.release(a).await;
        pool.release(b).await;
        pool.release(c).await;

        assert_eq!(pool.idle_count().await, 2);
    }

    #[tokio::test]
    async fn test_connect_deadline() {
        let pool = ConnectionPool::unpooled(Arc::new(StalledConnector));
        let err = pool.acquire(Duration::from_millis(20)).await.err().unwrap();
        assert!(matches!(err, ExchangeError::Timeout { step: "connect" }));
    }
}
