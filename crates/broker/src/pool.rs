//! Bounded connection pool
//!
//! One pool abstraction serves both the local dedup database and the
//! remote name directory. Connections live in a bounded queue;
//! acquisition retries with a fixed backoff a small number of times and
//! then surfaces [`BrokerError::PoolExhausted`], keeping request
//! latency predictable under pressure instead of queueing unboundedly.

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{BrokerError, BrokerResult};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of pooled connections
    pub size: usize,
    /// Acquisition attempts before giving up
    pub retries: u32,
    /// Fixed delay between acquisition attempts
    pub retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 16,
            retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl PoolConfig {
    /// Defaults for the remote name directory: higher-latency
    /// connections warrant a larger pool
    pub fn directory() -> Self {
        Self {
            size: 32,
            ..Self::default()
        }
    }
}

/// A fixed set of connections handed out through a bounded queue
pub struct ConnectionPool<C> {
    tx: flume::Sender<C>,
    rx: flume::Receiver<C>,
    retries: u32,
    retry_delay: Duration,
}

impl<C> ConnectionPool<C> {
    /// Build a pool over an already-created set of connections
    pub fn new(connections: Vec<C>, config: &PoolConfig) -> Self {
        let (tx, rx) = flume::bounded(connections.len().max(1));
        for connection in connections {
            let _ = tx.send(connection);
        }
        Self {
            tx,
            rx,
            retries: config.retries,
            retry_delay: config.retry_delay,
        }
    }

    /// Take a connection out of the pool.
    ///
    /// Bounded retry: waits `retry_delay` between attempts and gives up
    /// with `PoolExhausted` after `retries` tries.
    pub async fn acquire(&self) -> BrokerResult<C> {
        for attempt in 1..=self.retries {
            match self.rx.try_recv() {
                Ok(connection) => return Ok(connection),
                Err(_) => {
                    debug!(attempt, "waiting for a free connection");
                    if attempt < self.retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        warn!("no free connection after {} attempts", self.retries);
        Err(BrokerError::PoolExhausted)
    }

    /// Return a connection to the pool. The caller may not use the
    /// connection after returning it.
    pub fn release(&self, connection: C) {
        let _ = self.tx.try_send(connection);
    }
}

impl<C> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("available", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config(size: usize) -> PoolConfig {
        PoolConfig {
            size,
            retries: 2,
            retry_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = ConnectionPool::new(vec![1u32, 2], &quick_config(2));

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a, b);

        pool.release(a);
        pool.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhaustion_after_bounded_retry() {
        let pool = ConnectionPool::new(vec![1u32], &quick_config(1));

        let held = pool.acquire().await.unwrap();
        assert!(matches!(
            pool.acquire().await,
            Err(BrokerError::PoolExhausted)
        ));

        pool.release(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_directory_defaults() {
        let config = PoolConfig::directory();
        assert_eq!(config.size, 32);
        assert_eq!(config.retries, 3);
    }
}
