use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::state::PlayerState;

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayerState),
    ErrorOccurred {
        message: String,
        cause: Option<String>,
    },
    /// Device lost; `attempt` starts at 1 and `delay` is the wait before it
    Reconnecting { attempt: u32, delay: Duration },
}

/// Fan-out of player events to subscriber channels.
///
/// Delivery happens on the emitting thread, so a subscriber sees events in firing order
/// and an event caused by a control call is queued before that call returns.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: PlayerEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropped receivers unsubscribe
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
