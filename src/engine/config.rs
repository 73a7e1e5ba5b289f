use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::error::PlayerError;
use super::priority::Priority;
use crate::hal::types::SampleFormat;
use crate::resilience::ReconnectPolicy;

/// Tuning for one player; every field has a working default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Buffer latency requested from the device
    pub latency_target_ms: u32,
    /// Extra latency from the device waiting for a partly filled buffer before it starts.
    /// Measured on USB DACs, not derived from the negotiated parameters.
    pub startup_fill_ms: u32,
    /// Frames per write
    pub quantum_frames: usize,
    /// Encoding used when no bit depth override is given
    pub output_format: SampleFormat,
    pub allow_resample: bool,
    /// Consecutive unrecovered write failures before the device is reopened
    pub failure_threshold: u32,
    pub reconnect: ReconnectPolicy,
    pub stop_join_timeout_ms: u64,
    pub pause_poll_ms: u64,
    pub idle_poll_ms: u64,
    pub starved_poll_ms: u64,
    pub thread_priority: Priority,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            latency_target_ms: 50,
            startup_fill_ms: 150,
            quantum_frames: 1024,
            output_format: SampleFormat::S32LE,
            allow_resample: true,
            failure_threshold: 5,
            reconnect: ReconnectPolicy::default(),
            stop_join_timeout_ms: 5000,
            pause_poll_ms: 10,
            idle_poll_ms: 10,
            starved_poll_ms: 1,
            thread_priority: Priority::Max,
        }
    }
}

impl PlayerConfig {
    pub fn from_json(value: Value) -> Result<Self, PlayerError> {
        let config: PlayerConfig =
            serde_json::from_value(value).map_err(|e| PlayerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.quantum_frames == 0 {
            return Err(PlayerError::InvalidConfig("quantum_frames must be positive".into()));
        }
        if self.latency_target_ms == 0 {
            return Err(PlayerError::InvalidConfig("latency_target_ms must be positive".into()));
        }
        if self.failure_threshold == 0 {
            return Err(PlayerError::InvalidConfig("failure_threshold must be positive".into()));
        }
        if self.reconnect.max_ms < self.reconnect.base_ms {
            return Err(PlayerError::InvalidConfig(
                "reconnect.max_ms must not be below reconnect.base_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn latency_target(&self) -> Duration {
        Duration::from_millis(self.latency_target_ms as u64)
    }

    pub fn startup_fill(&self) -> Duration {
        Duration::from_millis(self.startup_fill_ms as u64)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn starved_poll(&self) -> Duration {
        Duration::from_millis(self.starved_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.latency_target(), Duration::from_millis(50));
        assert_eq!(config.startup_fill(), Duration::from_millis(150));
        assert_eq!(config.quantum_frames, 1024);
        assert_eq!(config.output_format, SampleFormat::S32LE);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reconnect.max_attempts, 10);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PlayerConfig::from_json(json!({
            "startup_fill_ms": 80,
            "reconnect": {"base_ms": 5}
        }))
        .unwrap();
        assert_eq!(config.startup_fill_ms, 80);
        assert_eq!(config.reconnect.base_ms, 5);
        assert_eq!(config.reconnect.max_ms, 10_000);
        assert_eq!(config.quantum_frames, 1024);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            PlayerConfig::from_json(json!({"quantum_frames": 0})),
            Err(PlayerError::InvalidConfig(_))
        ));
        assert!(PlayerConfig::from_json(json!({"output_format": "U8"})).is_err());
    }
}
