use serde::Serialize;
use std::{collections::HashMap, fmt};

use super::system::HostStats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MicroserviceState {
    Queued,
    Pulling,
    Creating,
    Created,
    Starting,
    Running,
    Updating,
    Restarting,
    StuckInRestart,
    Exiting,
    Failed,
    MarkedForDeletion,
    Deleting,
    Deleted,
    Stopping,
    Stopped,
    #[default]
    Unknown,
}

impl MicroserviceState {
    /// Maps the engine's raw lifecycle string.
    pub fn from_engine(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "created" => MicroserviceState::Created,
            "running" => MicroserviceState::Running,
            "restarting" => MicroserviceState::Restarting,
            "paused" => MicroserviceState::Stopped,
            "removing" => MicroserviceState::Deleting,
            "exited" => MicroserviceState::Exiting,
            "dead" => MicroserviceState::Failed,
            _ => MicroserviceState::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        *self == MicroserviceState::Running
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MicroserviceState::Queued => "QUEUED",
            MicroserviceState::Pulling => "PULLING",
            MicroserviceState::Creating => "CREATING",
            MicroserviceState::Created => "CREATED",
            MicroserviceState::Starting => "STARTING",
            MicroserviceState::Running => "RUNNING",
            MicroserviceState::Updating => "UPDATING",
            MicroserviceState::Restarting => "RESTARTING",
            MicroserviceState::StuckInRestart => "STUCK_IN_RESTART",
            MicroserviceState::Exiting => "EXITING",
            MicroserviceState::Failed => "FAILED",
            MicroserviceState::MarkedForDeletion => "MARKED_FOR_DELETION",
            MicroserviceState::Deleting => "DELETING",
            MicroserviceState::Deleted => "DELETED",
            MicroserviceState::Stopping => "STOPPING",
            MicroserviceState::Stopped => "STOPPED",
            MicroserviceState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MicroserviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MicroserviceStatus {
    pub state: MicroserviceState,
    pub container_id: Option<String>,
    /// Epoch milliseconds.
    pub start_time: Option<i64>,
    pub cpu_usage: f64,
    pub memory_usage: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Connected,
    FailedLogin,
    FailedVerification,
}

/// Everything the agent reports upward in one document.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub microservices: HashMap<String, MicroserviceStatus>,
    pub registries: HashMap<i32, LinkStatus>,
    pub running_containers: usize,
    pub controller_connected: bool,
    pub queued_tasks: usize,
    pub host: HostStats,
}

/// Receives runtime status. Implemented by the upstream aggregation layer.
pub trait StatusSink: Send + Sync {
    fn set_microservice_status(&self, uuid: &str, status: MicroserviceStatus);

    fn set_microservice_state(&self, uuid: &str, state: MicroserviceState);

    fn remove_microservice_status(&self, uuid: &str);

    fn set_registry_status(&self, registry_id: i32, status: LinkStatus);

    fn set_running_containers(&self, count: usize);
}
