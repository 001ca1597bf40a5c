//! Reconnection delay strategies.

use rand::Rng;
use std::time::Duration;

/// Attempts made before a reconnection is abandoned
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Maps a 1-based attempt number to the delay before that attempt
pub trait Backoff: Send + Sync {
    /// Delay before `attempt`
    fn delay(&self, attempt: u32) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// Quadratic backoff with jitter: `n * (2000n + rand(0..4000))` ms.
///
/// The first attempt waits between 2 and 6 seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBackoff;

impl Backoff for DefaultBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let n = u64::from(attempt.max(1));
        let jitter = rand::thread_rng().gen_range(0..4000u64);
        Duration::from_millis(n * (n * 2000 + jitter))
    }
}

/// Constant delay between attempts
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_bounds() {
        for _ in 0..100 {
            let first = DefaultBackoff.delay(1);
            assert!(first >= Duration::from_secs(2));
            assert!(first < Duration::from_secs(6));

            let third = DefaultBackoff.delay(3);
            assert!(third >= Duration::from_secs(18));
            assert!(third < Duration::from_secs(30));
        }
    }

    #[test]
    fn test_closure_backoff() {
        let backoff = |attempt: u32| Duration::from_millis(100 * u64::from(attempt));
        assert_eq!(backoff.delay(3), Duration::from_millis(300));
        assert_eq!(FixedBackoff(Duration::from_millis(500)).delay(9), Duration::from_millis(500));
    }
}
