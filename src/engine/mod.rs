pub mod config;
pub mod error;
pub mod events;
pub mod player;
pub mod priority;
pub mod state;

mod playback;

pub use config::PlayerConfig;
pub use error::PlayerError;
pub use events::{EventBus, PlayerEvent};
pub use player::{OutputSpec, Player};
pub use priority::Priority;
pub use state::PlayerState;
