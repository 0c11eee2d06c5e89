pub mod api;
pub mod reporter;
pub mod system;
pub mod types;
