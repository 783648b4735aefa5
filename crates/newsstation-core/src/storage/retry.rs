//! Retry of archive operations that hit transient SQLite errors

use std::future::Future;
use std::time::Duration;

/// Maximum number of retries after the first attempt
pub const MAX_RETRIES: u32 = 5;

const BASE_DELAY_MS: u64 = 100;

/// Whether a SQLite error is worth retrying.
///
/// Covers SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_BUSY_SNAPSHOT (1032) and the
/// SQLITE_IOERR family (10 plus its extended read/write/fsync/lock codes).
pub fn is_transient_error(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    let Some(code) = db_err.code().and_then(|c| c.parse::<i32>().ok()) else {
        return false;
    };
    let primary = code & 0xff;
    matches!(primary, 5 | 6 | 10)
}

/// Exponential backoff: 100ms, 200ms, 400ms, ...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt.saturating_sub(1)))
}

/// Run an archive operation, retrying transient failures with exponential backoff
pub async fn with_retry<F, Fut, T>(operation: F) -> std::result::Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if is_transient_error(&e) && attempts < MAX_RETRIES => {
                attempts += 1;
                let delay = backoff_delay(attempts);
                tracing::debug!(
                    error = %e,
                    attempt = attempts,
                    max_retries = MAX_RETRIES,
                    delay_ms = delay.as_millis(),
                    "Archive busy, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(1), Duration::from_millis(100));
        assert_eq!(backoff_delay(2), Duration::from_millis(200));
        assert_eq!(backoff_delay(5), Duration::from_millis(1600));
    }

    #[test]
    fn test_non_database_errors_are_not_transient() {
        assert!(!is_transient_error(&sqlx::Error::RowNotFound));
        assert!(!is_transient_error(&sqlx::Error::PoolTimedOut));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: std::result::Result<(), _> = with_retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;

        assert!(matches!(result, Err(sqlx::Error::RowNotFound)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let value = with_retry(|| async { Ok::<_, sqlx::Error>(42) }).await.unwrap();
        assert_eq!(value, 42);
    }
}
