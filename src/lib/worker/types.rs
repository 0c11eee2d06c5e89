use tokio::sync::Mutex;

use crate::lib::runtime::types::{ContainerRuntime, RuntimeError};
use crate::lib::status::types::StatusSink;
use crate::lib::store::store::DesiredStateStore;
use std::sync::Arc;

/// Runs one container task at a time against the runtime.
pub struct ContainerManager {
    pub store: Arc<DesiredStateStore>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub status: Arc<dyn StatusSink>,
    pub host_ip: String,
    /// Held by every operation that removes a container.
    pub delete_lock: Mutex<()>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Registry {0} is not configured")]
    RegistryNotFound(i32),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
