use thiserror::Error;

use super::state::PlayerState;
use crate::hal::pcm::PcmError;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("audio device '{0}' not found")]
    DeviceNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: PlayerState,
    },

    #[error("player is not initialized")]
    NotInitialized,

    #[error("player has been disposed")]
    Disposed,

    #[error("failed to {op} '{device}'")]
    Pcm {
        op: &'static str,
        device: String,
        #[source]
        source: PcmError,
    },

    #[error("device '{device}' lost; gave up after {attempts} reconnection attempts")]
    ReconnectExhausted { device: String, attempts: u32 },

    #[error("failed to spawn playback thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

impl PlayerError {
    pub(crate) fn pcm(op: &'static str, device: &str, source: PcmError) -> Self {
        Self::Pcm {
            op,
            device: device.to_string(),
            source,
        }
    }

    /// Native status code behind a device failure
    pub fn pcm_code(&self) -> Option<i32> {
        match self {
            Self::Pcm { source, .. } => Some(source.code()),
            _ => None,
        }
    }
}
