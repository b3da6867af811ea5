pub mod batch;
pub mod log;
pub mod mapping;
pub mod settings;
pub mod task;
