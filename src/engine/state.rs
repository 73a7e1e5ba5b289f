use serde::{Deserialize, Serialize};

/// Player lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerState {
    #[default]
    Uninitialized,
    Stopped,
    Playing,
    Paused,
    Error,
}

impl PlayerState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &PlayerState) -> bool {
        use PlayerState::*;

        matches!(
            (self, target),
            // initialize
            (Uninitialized, Stopped) |
            (Stopped, Stopped) |
            (Error, Stopped) |

            (Stopped, Playing) |
            (Playing, Paused) |
            (Paused, Playing) |

            // stop
            (Playing, Stopped) |
            (Paused, Stopped) |

            (_, Error)
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Stopped => "Stopped",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Error => "Error",
        }
    }

    /// A playback thread exists in these states
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}
