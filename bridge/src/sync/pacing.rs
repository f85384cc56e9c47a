use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::types::error::{BridgeError, Result};

/// Sleep for `duration` unless `cancel` fires first.
///
/// Every suspension in the core goes through here so that shutdown never
/// waits out a poll interval or a backoff.
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(BridgeError::Cancelled);
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(BridgeError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Backoff after the `attempt`-th failed fetch (1-based): 2s, 4s, 8s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_completes() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        pause(&cancel, Duration::from_secs(5)).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let result = pause(&cancel, Duration::from_secs(3600)).await;

        assert!(matches!(result, Err(BridgeError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_pause_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(pause(&cancel, Duration::from_secs(1)).await.is_err());
    }
}
