//! Bounded blocking I/O.
//!
//! Config loads, directory creation and control-surface writes run on the
//! blocking pool under a deadline. A call that misses the deadline keeps
//! running in the background but its result is discarded.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoundedError {
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Run `f` on the blocking pool, giving up after `limit`.
pub async fn run_bounded<T, F>(limit: Duration, f: F) -> Result<T, BoundedError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BoundedError::Join(e.to_string())),
        Err(_) => Err(BoundedError::TimedOut(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_limit() {
        let value = run_bounded(Duration::from_secs(1), || 41 + 1).await;
        assert_eq!(value, Ok(42));
    }

    #[tokio::test]
    async fn test_times_out() {
        let result = run_bounded(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
        })
        .await;
        assert_eq!(result, Err(BoundedError::TimedOut(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_panic_is_join_error() {
        let result: Result<(), _> = run_bounded(Duration::from_secs(1), || panic!("boom")).await;
        assert!(matches!(result, Err(BoundedError::Join(_))));
    }
}
