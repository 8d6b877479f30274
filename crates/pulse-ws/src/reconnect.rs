//! Reconnection backoff.
//!
//! Attempts are unbounded; the policy only decides how long to wait before
//! the next one.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay schedule between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    Fixed { delay_ms: u64 },
    /// `base * 2^(attempt-1)`, capped at `max_delay_ms`.
    Exponential { base_delay_ms: u64, max_delay_ms: u64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Fixed { delay_ms: 3_000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(flatten)]
    pub strategy: BackoffStrategy,
    /// Jitter as a fraction of the delay (0.1 = ±10%). 0 disables it.
    #[serde(default)]
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
            jitter_factor: 0.0,
        }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential {
                base_delay_ms: base.as_millis() as u64,
                max_delay_ms: max.as_millis() as u64,
            },
            jitter_factor: 0.0,
        }
    }

    /// Set the jitter factor, clamped to `[0, 1]`. Non-finite values disable jitter.
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = if jitter_factor.is_finite() {
            jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Delay before the given attempt (1-based, counted since the last open).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.base_delay(attempt))
    }

    /// Delay without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffStrategy::Exponential {
                base_delay_ms,
                max_delay_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(20);
                let delay = base_delay_ms.saturating_mul(1u64 << exponent);
                Duration::from_millis(delay.min(max_delay_ms))
            }
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor.is_nan() || self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let base_ms = delay.as_millis() as f64;
        let range = base_ms * self.jitter_factor.min(1.0);
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_millis((base_ms + jitter).max(1.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_flat_three_seconds() {
        let policy = BackoffPolicy::default();
        for attempt in [1, 2, 10, 1000] {
            assert_eq!(policy.delay_for(attempt), Duration::from_secs(3));
        }
    }

    #[test]
    fn test_exponential_is_capped() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(5), Duration::from_secs(16));
        assert_eq!(policy.base_delay(6), Duration::from_secs(30));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(1000)).with_jitter(0.1);
        for _ in 0..100 {
            let d = policy.delay_for(1).as_millis();
            assert!((900..=1100).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_non_finite_jitter_disabled() {
        for factor in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let policy = BackoffPolicy::fixed(Duration::from_secs(3)).with_jitter(factor);
            assert_eq!(policy.jitter_factor, 0.0);
            assert_eq!(policy.delay_for(1), Duration::from_secs(3));
        }

        let mut raw = BackoffPolicy::fixed(Duration::from_secs(3));
        raw.jitter_factor = f64::NAN;
        assert_eq!(raw.delay_for(1), Duration::from_secs(3));
    }

    #[test]
    fn test_serde_shape() {
        let policy: BackoffPolicy = serde_json::from_str(
            r#"{"strategy":"exponential","base_delay_ms":500,"max_delay_ms":8000,"jitter_factor":0.2}"#,
        )
        .unwrap();
        assert_eq!(
            policy.strategy,
            BackoffStrategy::Exponential {
                base_delay_ms: 500,
                max_delay_ms: 8000
            }
        );

        let fixed: BackoffPolicy =
            serde_json::from_str(r#"{"strategy":"fixed","delay_ms":3000}"#).unwrap();
        assert_eq!(fixed, BackoffPolicy::default());
    }
}
