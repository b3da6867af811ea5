pub mod error;
pub mod event_bus;
pub mod mapping;
pub mod progress;
pub mod state;
