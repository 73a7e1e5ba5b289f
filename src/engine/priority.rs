use serde::{Deserialize, Serialize};
use thread_priority::{ThreadPriority, ThreadPriorityValue};

/// Scheduling priority requested for the playback thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    /// Leave the OS default in place
    Normal,
    /// Raised within the normal scheduling class
    High,
    /// Highest priority the process is allowed to take
    #[default]
    Max,
}

impl Priority {
    fn thread_priority(&self) -> Option<ThreadPriority> {
        match self {
            Priority::Normal => None,
            Priority::High => Some(ThreadPriority::Crossplatform(ThreadPriorityValue::try_from(75u8).ok()?)),
            Priority::Max => Some(ThreadPriority::Max),
        }
    }

    /// Apply to the calling thread; failure is logged and otherwise ignored
    pub fn apply_to_current_thread(&self) -> bool {
        let Some(priority) = self.thread_priority() else {
            return true;
        };
        match thread_priority::set_current_thread_priority(priority) {
            Ok(()) => {
                tracing::debug!(priority = ?self, "raised playback thread priority");
                true
            }
            Err(e) => {
                tracing::warn!(priority = ?self, error = ?e, "could not raise playback thread priority");
                false
            }
        }
    }
}
