//! Shared constants for timeouts, pool sizing, and concurrency bounds.

use std::time::Duration;

/// Connect timeout applied to every outbound HTTP client.
pub const DEFAULT_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request timeout applied to every outbound HTTP client.
pub const DEFAULT_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the graph driver connection pool.
pub const MAX_STORE_POOL_SIZE: usize = 50;

/// How long to wait for a pooled store connection before failing.
pub const STORE_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(30);

/// Window inside which a failed store transaction may be retried.
pub const STORE_TX_RETRY_WINDOW: Duration = Duration::from_secs(15);

/// At most this many retrieval searches are in flight at once.
pub const MAX_CONCURRENT_SEARCHES: usize = 3;

/// Wall-clock budget for the direct analytics query path.
pub const DIRECT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Checkpoint ring retains at most this many snapshots.
pub const CHECKPOINT_RING_CAPACITY: usize = 10;

/// Rollback stack retains at most this many snapshots.
pub const ROLLBACK_STACK_CAPACITY: usize = 5;

/// Stage execution attempts: one initial try plus two retries.
pub const MAX_STAGE_ATTEMPTS: u32 = 3;

/// Base backoff between stage attempts; multiplied by the attempt number.
pub const STAGE_RETRY_BACKOFF: Duration = Duration::from_millis(1000);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_bound_matches_policy() {
        assert!(MAX_STORE_POOL_SIZE <= 50);
    }

    #[test]
    fn test_retry_window_shorter_than_acquisition() {
        assert!(STORE_TX_RETRY_WINDOW <= STORE_ACQUISITION_TIMEOUT);
    }

    #[test]
    fn test_ring_larger_than_rollback_stack() {
        assert!(CHECKPOINT_RING_CAPACITY >= ROLLBACK_STACK_CAPACITY);
    }
}
