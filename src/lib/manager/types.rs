use async_trait::async_trait;

use crate::lib::runtime::types::{ContainerRuntime, RuntimeError};
use crate::lib::status::types::{LinkStatus, StatusSink};
use crate::lib::store::{store::DesiredStateStore, types::Registry};
use crate::lib::tasks::queue::TaskQueue;
use crate::lib::worker::types::ContainerManager;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub host_ip: String,
    pub monitor_interval: Duration,
    pub registry_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            host_ip: "127.0.0.1".to_string(),
            monitor_interval: Duration::from_secs(10),
            registry_interval: Duration::from_secs(60),
        }
    }
}

/// Owns the task queue and the reconciliation workers.
pub struct ProcessManager {
    pub store: Arc<DesiredStateStore>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub queue: Arc<TaskQueue>,
    pub container_manager: Arc<ContainerManager>,
    pub status: Arc<dyn StatusSink>,
    pub controller: Arc<dyn ControllerLink>,
    pub registry_probe: Arc<dyn RegistryProbe>,
    pub config: ManagerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;

/// Whether the remote controller can currently be reached.
pub trait ControllerLink: Send + Sync {
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct ControllerState {
    connected: AtomicBool,
}

impl ControllerState {
    pub fn new(connected: bool) -> Self {
        ControllerState {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl ControllerLink for ControllerState {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid registry url: {0}")]
    InvalidUrl(String),
}

/// Checks whether a registry accepts the configured credentials.
#[async_trait]
pub trait RegistryProbe: Send + Sync {
    async fn probe(&self, registry: &Registry) -> Result<LinkStatus, ProbeError>;
}
