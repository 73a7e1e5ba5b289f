use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff for reopening a lost device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 10_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Wait before `attempt` (1-based): `min(base * 2^(attempt-1), max)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }

    /// Every delay the policy would wait, in order
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).map(move |attempt| self.delay_for_attempt(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles_then_caps() {
        let delays: Vec<u64> = ReconnectPolicy::default()
            .schedule()
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![500, 1000, 2000, 4000, 8000, 10_000, 10_000, 10_000, 10_000, 10_000]
        );
    }

    #[test]
    fn test_large_attempts_saturate() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
    }
}
