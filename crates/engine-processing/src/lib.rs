pub mod error;
pub mod queue;
