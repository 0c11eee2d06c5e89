//! In-memory stand-ins for the container engine and registry probe.

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::lib::manager::types::{ProbeError, RegistryProbe};
use crate::lib::runtime::types::{
    ContainerRuntime, ContainerStats, RuntimeContainer, RuntimeError, RuntimeResult, container_name,
};
use crate::lib::status::types::{LinkStatus, MicroserviceState, MicroserviceStatus};
use crate::lib::store::types::{Microservice, Registry};

#[derive(Debug, Default)]
pub struct FakeState {
    pub containers: Vec<RuntimeContainer>,
    /// Containers whose ports or network no longer match their microservice.
    pub drifted: HashSet<String>,
    /// Overrides the state derived from the container's raw state.
    pub states: HashMap<String, MicroserviceState>,
    pub pulled: Vec<String>,
    pub started: Vec<String>,
    pub removed_images: Vec<String>,
    pub unreachable: bool,
    pub fail_pull: bool,
    pub fail_start: bool,
    pub fail_remove: bool,
    pub image_in_use: bool,
    pub reconnects: u32,
    next_id: u32,
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_container(&self, id: &str, uuid: &str, created_at: i64, state: &str) {
        self.state().containers.push(RuntimeContainer {
            id: id.to_string(),
            name: container_name(uuid),
            image: format!("{}-image", uuid),
            created_at,
            state: state.to_string(),
            ip_address: Some("172.17.0.2".to_string()),
        });
    }

    pub fn container_state(&self, id: &str) -> Option<String> {
        self.state()
            .containers
            .iter()
            .find(|container| container.id == id)
            .map(|container| container.state.clone())
    }

    pub fn has_container(&self, id: &str) -> bool {
        self.container_state(id).is_some()
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    fn check_reachable(&self) -> RuntimeResult<()> {
        if self.state().unreachable {
            return Err(RuntimeError::NotConnected);
        }
        Ok(())
    }

    fn set_raw_state(&self, id: &str, raw: &str) -> RuntimeResult<()> {
        let mut state = self.state();
        let container = state
            .containers
            .iter_mut()
            .find(|container| container.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.state = raw.to_string();
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.check_reachable()
    }

    async fn reconnect(&self) -> RuntimeResult<()> {
        self.state().reconnects += 1;
        Ok(())
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<RuntimeContainer>> {
        self.check_reachable()?;
        Ok(self.state().containers.clone())
    }

    async fn get_container(&self, container_id: &str) -> RuntimeResult<Option<RuntimeContainer>> {
        self.check_reachable()?;
        Ok(self
            .state()
            .containers
            .iter()
            .find(|container| container.id == container_id)
            .cloned())
    }

    async fn pull_image(&self, image: &str, registry: &Registry) -> RuntimeResult<()> {
        if registry.is_from_cache() {
            return Ok(());
        }
        let mut state = self.state();
        if state.fail_pull {
            return Err(RuntimeError::Engine("pull access denied".to_string()));
        }
        state.pulled.push(image.to_string());
        Ok(())
    }

    async fn create_container(&self, microservice: &Microservice, _host_ip: &str) -> RuntimeResult<String> {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("new-{}", state.next_id);
        state.containers.push(RuntimeContainer {
            id: id.clone(),
            name: container_name(&microservice.uuid),
            image: microservice.image.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
            state: "created".to_string(),
            ip_address: None,
        });
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> RuntimeResult<()> {
        if self.state().fail_start {
            return Err(RuntimeError::Engine("cannot start".to_string()));
        }
        self.set_raw_state(container_id, "running")?;
        self.state().started.push(container_id.to_string());
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> RuntimeResult<()> {
        match self.set_raw_state(container_id, "exited") {
            Err(RuntimeError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn remove_container(&self, container_id: &str, _with_volumes: bool) -> RuntimeResult<()> {
        let mut state = self.state();
        if state.fail_remove {
            return Err(RuntimeError::Engine("device busy".to_string()));
        }
        state.containers.retain(|container| container.id != container_id);
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> RuntimeResult<()> {
        let mut state = self.state();
        if state.image_in_use {
            return Err(RuntimeError::ImageInUse(image.to_string()));
        }
        state.removed_images.push(image.to_string());
        Ok(())
    }

    async fn get_microservice_status(&self, container_id: &str) -> RuntimeResult<MicroserviceStatus> {
        self.check_reachable()?;
        let state = self.state();
        let container = state
            .containers
            .iter()
            .find(|container| container.id == container_id)
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))?;
        let lifecycle = state
            .states
            .get(container_id)
            .copied()
            .unwrap_or_else(|| MicroserviceState::from_engine(&container.state));
        Ok(MicroserviceStatus {
            state: lifecycle,
            container_id: Some(container_id.to_string()),
            start_time: Some(container.created_at),
            cpu_usage: if lifecycle.is_running() { 12.5 } else { 0.0 },
            memory_usage: if lifecycle.is_running() { 4096 } else { 0 },
            error_message: None,
        })
    }

    async fn get_container_stats(&self, _container_id: &str) -> RuntimeResult<ContainerStats> {
        Ok(ContainerStats::default())
    }

    async fn are_microservice_and_container_equal(
        &self,
        container_id: &str,
        _microservice: &Microservice,
    ) -> RuntimeResult<bool> {
        self.check_reachable()?;
        Ok(!self.state().drifted.contains(container_id))
    }
}

/// Registry probe answering from a fixed table.
#[derive(Debug, Default)]
pub struct FakeProbe {
    pub answers: Mutex<HashMap<i32, LinkStatus>>,
    pub probed: Mutex<Vec<i32>>,
}

#[async_trait]
impl RegistryProbe for FakeProbe {
    async fn probe(&self, registry: &Registry) -> Result<LinkStatus, ProbeError> {
        self.probed.lock().unwrap().push(registry.id);
        self.answers
            .lock()
            .unwrap()
            .get(&registry.id)
            .copied()
            .ok_or_else(|| ProbeError::InvalidUrl(registry.url.clone()))
    }
}
