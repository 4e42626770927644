//! Retry backoff: exponential with jitter, capped.
//!
//! delay(attempt) = min(60s, 2^attempt * 1s + jitter), jitter in 0..500ms.

use std::time::Duration;

use rand::Rng;

pub const BACKOFF_BASE_MS: u64 = 1_000;
pub const BACKOFF_CAP_MS: u64 = 60_000;
pub const JITTER_MS: u64 = 500;

/// Deterministic form: caller supplies the jitter. Non-decreasing in
/// `attempt` for a fixed jitter, and never above the cap.
pub fn retry_delay(attempt: u32, jitter_ms: u64) -> Duration {
    let jitter_ms = jitter_ms.min(JITTER_MS.saturating_sub(1));
    // 2^7 s already exceeds the cap; clamp before shifting to dodge overflow.
    let exp = if attempt >= 7 {
        BACKOFF_CAP_MS
    } else {
        BACKOFF_BASE_MS << attempt
    };
    let ms = exp.saturating_add(jitter_ms).min(BACKOFF_CAP_MS);
    Duration::from_millis(ms)
}

/// Production form: random jitter.
pub fn jittered_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
    retry_delay(attempt, jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_monotone_nondecreasing() {
        for jitter in [0, 250, 499] {
            let mut prev = Duration::ZERO;
            for attempt in 1..=5 {
                let delay = retry_delay(attempt, jitter);
                assert!(delay >= prev, "attempt {attempt} regressed");
                prev = delay;
            }
        }
    }

    #[test]
    fn delay_is_bounded_by_cap() {
        for attempt in 1..=64 {
            assert!(retry_delay(attempt, JITTER_MS).as_millis() as u64 <= BACKOFF_CAP_MS);
        }
    }

    #[test]
    fn early_attempts_are_exponential() {
        assert_eq!(retry_delay(1, 0), Duration::from_millis(2_000));
        assert_eq!(retry_delay(2, 0), Duration::from_millis(4_000));
        assert_eq!(retry_delay(3, 0), Duration::from_millis(8_000));
        assert_eq!(retry_delay(3, 123), Duration::from_millis(8_123));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        assert_eq!(
            retry_delay(u32::MAX, 0),
            Duration::from_millis(BACKOFF_CAP_MS)
        );
    }

    #[test]
    fn jittered_delay_stays_in_envelope() {
        for attempt in 1..=5 {
            let delay = jittered_delay(attempt).as_millis() as u64;
            let floor = retry_delay(attempt, 0).as_millis() as u64;
            assert!(delay >= floor);
            assert!(delay <= BACKOFF_CAP_MS);
        }
    }
}
