pub mod actor;
pub mod adapter;
pub mod context;
pub mod controller;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod lock;
pub mod sequencer;

#[cfg(test)]
mod tests;
