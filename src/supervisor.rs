//! Retry pacing and bounded waits
//!
//! Lookup-style waits pace their re-dumps with [`backoff_delay`], an
//! increasing ladder that settles at one second. [`wait_until`] is the
//! bounded condition poll used for side-channel files.

use std::time::Duration;

/// Backoff ladder for lookup-style waits: 25ms, 100ms, 500ms, 1s, 2s,
/// then steady 1s.
const BACKOFF_LADDER_MS: [u64; 5] = [25, 100, 500, 1000, 2000];

/// Delay to sleep before retry attempt number `attempt` (0-based)
pub fn backoff_delay(attempt: usize) -> Duration {
    let ms = BACKOFF_LADDER_MS
        .get(attempt)
        .copied()
        .unwrap_or(1000);
    Duration::from_millis(ms)
}

/// Poll `condition` until it returns true or `timeout` elapses.
///
/// Returns whether the condition became true. Used for short bounded waits
/// such as "did the crash log file appear yet".
pub async fn wait_until<F>(mut condition: F, timeout: Duration, interval: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_settles_at_one_second() {
        assert_eq!(backoff_delay(0), Duration::from_millis(25));
        assert_eq!(backoff_delay(4), Duration::from_millis(2000));
        assert_eq!(backoff_delay(5), Duration::from_millis(1000));
        assert_eq!(backoff_delay(50), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn wait_until_observes_condition() {
        let mut n = 0;
        let ok = wait_until(
            || {
                n += 1;
                n >= 3
            },
            Duration::from_millis(500),
            Duration::from_millis(1),
        )
        .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn wait_until_gives_up_at_the_deadline() {
        let ok = wait_until(
            || false,
            Duration::from_millis(20),
            Duration::from_millis(1),
        )
        .await;
        assert!(!ok);
    }
}
