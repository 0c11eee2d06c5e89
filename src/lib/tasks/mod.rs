pub mod queue;
pub mod types;
