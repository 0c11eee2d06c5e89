pub mod docker;
pub mod stuck;
pub mod types;
