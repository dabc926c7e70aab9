use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CodeGenError;

pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// A connection the pool knows how to open and dispose. Implemented for each
/// engine's native connection; tests supply an in-memory fake.
#[async_trait]
pub trait PoolableConnection: Send + Sized + 'static {
    async fn open(connection_string: &str) -> Result<Self, CodeGenError>;
    async fn dispose(self) -> Result<(), CodeGenError>;
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatistics {
    pub total: usize,
    pub available: usize,
    pub max: usize,
}

struct PoolState<C> {
    idle: HashMap<String, VecDeque<C>>,
    total: usize,
}

/// Bounded FIFO pool of live connections, one idle queue per connection
/// string. All queue/counter mutation happens under the mutex; opening and
/// disposing connections happens outside it.
pub struct ConnectionPool<C: PoolableConnection> {
    state: Mutex<PoolState<C>>,
    max: usize,
}

impl<C: PoolableConnection> ConnectionPool<C> {
    pub fn new(max: usize) -> Result<Self, CodeGenError> {
        if max == 0 {
            return Err(CodeGenError::config(
                "connection pool size must be greater than zero",
            ));
        }
        Ok(ConnectionPool {
            state: Mutex::new(PoolState {
                idle: HashMap::new(),
                total: 0,
            }),
            max,
        })
    }

    pub fn with_default_size() -> Self {
        // max > 0 by construction
        Self::new(DEFAULT_MAX_CONNECTIONS).expect("default pool size is non-zero")
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Returns a connection ready for use: a queued one if available, a
    /// freshly opened one while under the ceiling, or a pool-exhausted error.
    pub async fn acquire(&self, connection_string: &str) -> Result<C, CodeGenError> {
        {
            let mut state = self.state.lock().expect("pool mutex poisoned");
            if let Some(conn) = state
                .idle
                .get_mut(connection_string)
                .and_then(|queue| queue.pop_front())
            {
                log::debug!("Reusing pooled connection (total: {})", state.total);
                return Ok(conn);
            }
            if state.total >= self.max {
                log::error!(
                    "Connection pool exhausted: {} of {} connections in use",
                    state.total,
                    self.max
                );
                return Err(CodeGenError::PoolExhausted { max: self.max });
            }
            state.total += 1;
        }

        // Network I/O outside the lock; roll the count back on failure.
        match C::open(connection_string).await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                let mut state = self.state.lock().expect("pool mutex poisoned");
                state.total -= 1;
                Err(e)
            }
        }
    }

    /// Returns a connection to its idle queue, or disposes it when the queue
    /// is already at capacity. Disposal errors are swallowed.
    pub async fn release(&self, connection_string: &str, conn: C) {
        let overflow = {
            let mut state = self.state.lock().expect("pool mutex poisoned");
            let queue = state.idle.entry(connection_string.to_string()).or_default();
            if queue.len() < self.max {
                queue.push_back(conn);
                None
            } else {
                state.total -= 1;
                Some(conn)
            }
        };
        if let Some(conn) = overflow {
            if let Err(e) = conn.dispose().await {
                log::warn!("Failed to dispose overflow connection: {}", e);
            }
        }
    }

    /// Drains and disposes every queued connection and resets the live count.
    pub async fn clear(&self) {
        let drained: Vec<C> = {
            let mut state = self.state.lock().expect("pool mutex poisoned");
            state.total = 0;
            state
                .idle
                .drain()
                .flat_map(|(_, queue)| queue.into_iter())
                .collect()
        };
        for conn in drained {
            if let Err(e) = conn.dispose().await {
                log::warn!("Failed to dispose pooled connection: {}", e);
            }
        }
    }

    pub fn statistics(&self) -> PoolStatistics {
        let state = self.state.lock().expect("pool mutex poisoned");
        PoolStatistics {
            total: state.total,
            available: state.idle.values().map(|q| q.len()).sum(),
            max: self.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
    static DISPOSED: AtomicUsize = AtomicUsize::new(0);

    struct FakeConnection {
        id: usize,
    }

    #[async_trait]
    impl PoolableConnection for FakeConnection {
        async fn open(connection_string: &str) -> Result<Self, CodeGenError> {
            if connection_string.contains("refused") {
                return Err(CodeGenError::connectivity("connection refused"));
            }
            Ok(FakeConnection {
                id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            })
        }

        async fn dispose(self) -> Result<(), CodeGenError> {
            DISPOSED.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_zero_max_rejected_at_construction() {
        assert!(ConnectionPool::<FakeConnection>::new(0).is_err());
    }

    #[tokio::test]
    async fn test_acquire_release_reuses_same_connection() {
        // max=1: second acquire before release must fail; after release the
        // original connection comes back out of the queue.
        let pool = ConnectionPool::<FakeConnection>::new(1).unwrap();
        let conn = pool.acquire("server=a").await.unwrap();
        let first_id = conn.id;

        let second = pool.acquire("server=a").await;
        assert!(matches!(second, Err(CodeGenError::PoolExhausted { max: 1 })));

        pool.release("server=a", conn).await;
        let reused = pool.acquire("server=a").await.unwrap();
        assert_eq!(reused.id, first_id);
    }

    #[tokio::test]
    async fn test_open_failure_rolls_back_count() {
        let pool = ConnectionPool::<FakeConnection>::new(2).unwrap();
        assert!(pool.acquire("refused").await.is_err());
        let stats = pool.statistics();
        assert_eq!(stats.total, 0);
        // The slot is free again
        let conn = pool.acquire("server=b").await.unwrap();
        pool.release("server=b", conn).await;
    }

    #[tokio::test]
    async fn test_queues_are_per_connection_string() {
        let pool = ConnectionPool::<FakeConnection>::new(4).unwrap();
        let a = pool.acquire("server=a").await.unwrap();
        let b = pool.acquire("server=b").await.unwrap();
        let a_id = a.id;
        pool.release("server=a", a).await;
        pool.release("server=b", b).await;

        // Acquiring for "a" must not hand back b's connection
        let again = pool.acquire("server=a").await.unwrap();
        assert_eq!(again.id, a_id);
    }

    #[tokio::test]
    async fn test_clear_disposes_idle_connections() {
        let pool = ConnectionPool::<FakeConnection>::new(3).unwrap();
        let a = pool.acquire("server=a").await.unwrap();
        let b = pool.acquire("server=a").await.unwrap();
        pool.release("server=a", a).await;
        pool.release("server=a", b).await;

        let before = DISPOSED.load(Ordering::SeqCst);
        pool.clear().await;
        assert_eq!(DISPOSED.load(Ordering::SeqCst), before + 2);

        let stats = pool.statistics();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.available, 0);
    }

    #[tokio::test]
    async fn test_statistics_snapshot() {
        let pool = ConnectionPool::<FakeConnection>::new(5).unwrap();
        let a = pool.acquire("server=a").await.unwrap();
        let b = pool.acquire("server=a").await.unwrap();
        pool.release("server=a", b).await;
        let stats = pool.statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.max, 5);
        pool.release("server=a", a).await;
    }
}
