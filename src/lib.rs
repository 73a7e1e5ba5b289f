pub mod engine;
pub mod hal;
pub mod resilience;
