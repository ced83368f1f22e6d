//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - A timed-out dispatch is recorded as a breaker failure, never retried

use std::future::Future;
use std::time::Duration;

use crate::proxy::error::DispatchError;

/// Run an outbound dispatch under a deadline.
pub async fn with_deadline<F, T>(deadline: Duration, dispatch: F) -> Result<T, DispatchError>
where
    F: Future<Output = Result<T, DispatchError>>,
{
    match tokio::time::timeout(deadline, dispatch).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let result = with_deadline(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DispatchError>(())
        })
        .await;
        assert!(matches!(result, Err(DispatchError::Timeout(d)) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_passes_through_result() {
        let result = with_deadline(Duration::from_secs(1), async { Ok::<_, DispatchError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
