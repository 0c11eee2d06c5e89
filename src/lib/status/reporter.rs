use super::types::{LinkStatus, MicroserviceState, MicroserviceStatus, StatusSink};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

#[derive(Debug, Default)]
struct Reported {
    microservices: HashMap<String, MicroserviceStatus>,
    registries: HashMap<i32, LinkStatus>,
    running_containers: usize,
}

/// In-memory sink holding the latest reported status of everything.
#[derive(Debug, Default)]
pub struct StatusReporter {
    reported: Mutex<Reported>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Reported> {
        self.reported.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn microservice_status(&self, uuid: &str) -> Option<MicroserviceStatus> {
        self.lock().microservices.get(uuid).cloned()
    }

    pub fn microservice_statuses(&self) -> HashMap<String, MicroserviceStatus> {
        self.lock().microservices.clone()
    }

    pub fn registry_status(&self, registry_id: i32) -> Option<LinkStatus> {
        self.lock().registries.get(&registry_id).copied()
    }

    pub fn registry_statuses(&self) -> HashMap<i32, LinkStatus> {
        self.lock().registries.clone()
    }

    pub fn running_containers(&self) -> usize {
        self.lock().running_containers
    }
}

impl StatusSink for StatusReporter {
    fn set_microservice_status(&self, uuid: &str, status: MicroserviceStatus) {
        self.lock().microservices.insert(uuid.to_string(), status);
    }

    /// Changes only the lifecycle state, keeping the last known figures.
    fn set_microservice_state(&self, uuid: &str, state: MicroserviceState) {
        self.lock()
            .microservices
            .entry(uuid.to_string())
            .or_default()
            .state = state;
    }

    fn remove_microservice_status(&self, uuid: &str) {
        self.lock().microservices.remove(uuid);
    }

    fn set_registry_status(&self, registry_id: i32, status: LinkStatus) {
        self.lock().registries.insert(registry_id, status);
    }

    fn set_running_containers(&self, count: usize) {
        self.lock().running_containers = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_change_keeps_figures() {
        let reporter = StatusReporter::new();
        reporter.set_microservice_status(
            "ms-1",
            MicroserviceStatus {
                state: MicroserviceState::Running,
                container_id: Some("c1".to_string()),
                cpu_usage: 3.5,
                ..Default::default()
            },
        );
        reporter.set_microservice_state("ms-1", MicroserviceState::Updating);

        let status = reporter.microservice_status("ms-1").unwrap();
        assert_eq!(status.state, MicroserviceState::Updating);
        assert_eq!(status.container_id.as_deref(), Some("c1"));
        assert_eq!(status.cpu_usage, 3.5);
    }

    #[test]
    fn registry_and_counts() {
        let reporter = StatusReporter::new();
        reporter.set_registry_status(4, LinkStatus::FailedLogin);
        reporter.set_running_containers(3);

        assert_eq!(reporter.registry_status(4), Some(LinkStatus::FailedLogin));
        assert_eq!(reporter.running_containers(), 3);
    }
}
