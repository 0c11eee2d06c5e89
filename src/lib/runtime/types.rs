use async_trait::async_trait;
use serde::Serialize;

use crate::lib::status::types::MicroserviceStatus;
use crate::lib::store::types::{Microservice, Registry};

/// Every container this agent owns is named `<prefix><microservice uuid>`.
pub const CONTAINER_NAME_PREFIX: &str = "edge_";

/// Environment variable through which a container learns its own uuid.
pub const SELF_NAME_ENV: &str = "SELFNAME";

pub fn container_name(uuid: &str) -> String {
    format!("{}{}", CONTAINER_NAME_PREFIX, uuid)
}

/// Recovers the microservice uuid from an engine-reported container name.
/// The engine reports names with a leading `/`.
pub fn uuid_from_container_name(name: &str) -> Option<&str> {
    name.trim_start_matches('/')
        .strip_prefix(CONTAINER_NAME_PREFIX)
        .filter(|uuid| !uuid.is_empty())
}

/// A container as the engine reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuntimeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub state: String,
    pub ip_address: Option<String>,
}

impl RuntimeContainer {
    pub fn microservice_uuid(&self) -> Option<&str> {
        uuid_from_container_name(&self.name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ContainerStats {
    pub cpu_usage: f64,
    pub memory_usage: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Docker API error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Image {0} is still referenced")]
    ImageInUse(String),

    #[error("Not connected to the container engine")]
    NotConnected,

    #[error("Container engine error: {0}")]
    Engine(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Operations the agent needs from the container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> RuntimeResult<()>;

    async fn reconnect(&self) -> RuntimeResult<()>;

    /// Pings the engine and reconnects once if the ping fails.
    async fn ensure_connected(&self) -> RuntimeResult<()> {
        if self.ping().await.is_ok() {
            return Ok(());
        }
        self.reconnect().await?;
        self.ping().await
    }

    /// Containers owned by this agent, running or not.
    async fn list_containers(&self) -> RuntimeResult<Vec<RuntimeContainer>>;

    async fn find_container(&self, uuid: &str) -> RuntimeResult<Option<RuntimeContainer>> {
        Ok(self
            .list_containers()
            .await?
            .into_iter()
            .find(|container| container.microservice_uuid() == Some(uuid)))
    }

    async fn get_container(&self, container_id: &str) -> RuntimeResult<Option<RuntimeContainer>>;

    async fn pull_image(&self, image: &str, registry: &Registry) -> RuntimeResult<()>;

    async fn create_container(&self, microservice: &Microservice, host_ip: &str) -> RuntimeResult<String>;

    async fn start_container(&self, container_id: &str) -> RuntimeResult<()>;

    async fn stop_container(&self, container_id: &str) -> RuntimeResult<()>;

    async fn remove_container(&self, container_id: &str, with_volumes: bool) -> RuntimeResult<()>;

    async fn remove_image(&self, image: &str) -> RuntimeResult<()>;

    async fn get_microservice_status(&self, container_id: &str) -> RuntimeResult<MicroserviceStatus>;

    async fn get_container_stats(&self, container_id: &str) -> RuntimeResult<ContainerStats>;

    async fn are_microservice_and_container_equal(
        &self,
        container_id: &str,
        microservice: &Microservice,
    ) -> RuntimeResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trip() {
        let name = container_name("a1b2");
        assert_eq!(name, "edge_a1b2");
        assert_eq!(uuid_from_container_name(&format!("/{}", name)), Some("a1b2"));
    }

    #[test]
    fn foreign_names_map_to_nothing() {
        assert_eq!(uuid_from_container_name("/postgres"), None);
        assert_eq!(uuid_from_container_name("/edge_"), None);
    }
}
