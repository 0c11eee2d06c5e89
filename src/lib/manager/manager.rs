use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::types::{ControllerLink, ManagerConfig, ManagerResult, ProcessManager, RegistryProbe};
use crate::lib::runtime::types::{ContainerRuntime, RuntimeContainer};
use crate::lib::status::types::{LinkStatus, MicroserviceState, StatusSink};
use crate::lib::store::{store::DesiredStateStore, types::Microservice};
use crate::lib::tasks::{
    queue::TaskQueue,
    types::{ContainerTask, MAX_RETRIES},
};
use crate::lib::worker::types::ContainerManager;

impl ProcessManager {
    pub fn new(
        store: Arc<DesiredStateStore>,
        runtime: Arc<dyn ContainerRuntime>,
        status: Arc<dyn StatusSink>,
        controller: Arc<dyn ControllerLink>,
        registry_probe: Arc<dyn RegistryProbe>,
        config: ManagerConfig,
    ) -> Self {
        let container_manager = Arc::new(ContainerManager::new(
            store.clone(),
            runtime.clone(),
            status.clone(),
            &config.host_ip,
        ));
        ProcessManager {
            store,
            runtime,
            queue: Arc::new(TaskQueue::new()),
            container_manager,
            status,
            controller,
            registry_probe,
            config,
        }
    }

    /// Connects to the engine and spawns the task consumer, the container
    /// monitor and the registry monitor.
    pub async fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        if let Err(err) = self.runtime.ensure_connected().await {
            warn!("Container engine not reachable yet: {}", err);
        }

        let consumer = self.clone();
        let monitor = self.clone();
        let registries = self.clone();
        vec![
            tokio::spawn(async move { consumer.run_tasks().await }),
            tokio::spawn(async move { monitor.run_container_monitor().await }),
            tokio::spawn(async move { registries.run_registry_monitor().await }),
        ]
    }

    /// Entry point for the controller sync after the desired list changed.
    pub async fn update(&self) {
        if let Err(err) = self.diff().await {
            warn!("Skipping diff, container engine unavailable: {}", err);
        }
    }

    pub async fn instance_config_updated(&self) {
        match self.runtime.reconnect().await {
            Ok(()) => info!("Reconnected to container engine"),
            Err(err) => error!("Failed to reconnect to container engine: {}", err),
        }
    }

    /// Compares the latest desired list with the engine and queues the work
    /// that brings them together.
    pub async fn diff(&self) -> ManagerResult<()> {
        let containers = self.runtime.list_containers().await?;
        let latest = self.store.get_latest_microservices();

        for microservice in latest.iter().filter(|ms| !ms.updating) {
            let container = find_container(&containers, &microservice.uuid);

            if microservice.is_marked_for_deletion() {
                if let Some(container) = container {
                    self.status
                        .set_microservice_state(&microservice.uuid, MicroserviceState::MarkedForDeletion);
                    self.queue.add(ContainerTask::remove(
                        &container.id,
                        microservice.delete_with_cleanup,
                    ));
                }
                continue;
            }

            match container {
                Some(container) if !microservice.rebuild => {
                    if self.needs_update(container, microservice).await {
                        self.queue.add(ContainerTask::update(&microservice.uuid));
                    }
                }
                _ => self.enqueue_add(microservice),
            }
        }

        let current = self.store.get_current_microservices();
        for container in &containers {
            let Some(uuid) = container.microservice_uuid() else {
                continue;
            };
            if latest.iter().any(|ms| ms.uuid == uuid) {
                continue;
            }
            let with_cleanup = current
                .iter()
                .any(|ms| ms.uuid == uuid && ms.delete_with_cleanup);
            self.queue.add(ContainerTask::remove(&container.id, with_cleanup));
        }

        self.store.set_current_microservices(latest);
        Ok(())
    }

    async fn needs_update(&self, container: &RuntimeContainer, microservice: &Microservice) -> bool {
        if container.created_at < microservice.last_modified {
            debug!("Microservice {} changed after its container was created", microservice.uuid);
            return true;
        }
        match self
            .runtime
            .are_microservice_and_container_equal(&container.id, microservice)
            .await
        {
            Ok(equal) => !equal,
            Err(err) => {
                warn!("Cannot compare container {}: {}", container.id, err);
                false
            }
        }
    }

    fn enqueue_add(&self, microservice: &Microservice) {
        if self.queue.add(ContainerTask::add(&microservice.uuid)) {
            self.status
                .set_microservice_state(&microservice.uuid, MicroserviceState::Queued);
        }
    }

    async fn run_container_monitor(self: Arc<Self>) {
        loop {
            self.monitor_containers().await;
            tokio::time::sleep(self.config.monitor_interval).await;
        }
    }

    /// One full reconciliation pass over the engine's containers.
    pub async fn monitor_containers(&self) {
        if let Err(err) = self.runtime.ensure_connected().await {
            warn!("Container engine unreachable, skipping monitor pass: {}", err);
            return;
        }
        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(err) => {
                warn!("Cannot list containers, skipping monitor pass: {}", err);
                return;
            }
        };
        let latest = self.store.get_latest_microservices();

        for container in &containers {
            let desired = container
                .microservice_uuid()
                .and_then(|uuid| latest.iter().find(|ms| ms.uuid == uuid));
            match desired {
                None => {
                    if self.queue.add(ContainerTask::remove(&container.id, false)) {
                        info!("Container {} is no longer desired, queued removal", container.name);
                    }
                }
                Some(ms) if ms.is_marked_for_deletion() => {
                    self.queue
                        .add(ContainerTask::remove(&container.id, ms.delete_with_cleanup));
                }
                Some(_) => {}
            }
        }

        let mut running = 0;
        for microservice in latest
            .iter()
            .filter(|ms| !ms.updating && !ms.is_marked_for_deletion())
        {
            match find_container(&containers, &microservice.uuid) {
                None => self.enqueue_add(microservice),
                Some(container) => {
                    if self.check_container(microservice, container).await {
                        running += 1;
                    }
                }
            }
        }
        self.status.set_running_containers(running);
    }

    /// Publishes a tracked container's status and repairs it when it is not
    /// running. Returns whether it is running.
    async fn check_container(&self, microservice: &Microservice, container: &RuntimeContainer) -> bool {
        let uuid = microservice.uuid.as_str();
        let status = match self.runtime.get_microservice_status(&container.id).await {
            Ok(status) => status,
            Err(err) => {
                warn!("Cannot read status of container {}: {}", container.id, err);
                return false;
            }
        };
        let state = status.state;
        self.store
            .set_runtime_fields(uuid, Some(container.id.clone()), container.ip_address.clone());
        self.store
            .set_stuck_in_restart(uuid, state == MicroserviceState::StuckInRestart);
        self.status.set_microservice_status(uuid, status);

        match state {
            MicroserviceState::Running => {
                match self
                    .runtime
                    .are_microservice_and_container_equal(&container.id, microservice)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Container {} drifted from {}, queued update", container.id, uuid);
                        self.queue.add(ContainerTask::update(uuid));
                    }
                    Err(err) => warn!("Cannot compare container {}: {}", container.id, err),
                }
                true
            }
            MicroserviceState::Restarting | MicroserviceState::Deleting => false,
            MicroserviceState::StuckInRestart => {
                warn!("Recreating {} after a restart loop", uuid);
                self.queue.add(ContainerTask::update(uuid));
                false
            }
            _ => {
                info!("Container {} of {} is {}, restarting", container.id, uuid, state);
                if let Err(err) = self.runtime.start_container(&container.id).await {
                    warn!("Restart of {} failed, queued update: {}", container.id, err);
                    self.queue.add(ContainerTask::update(uuid));
                }
                false
            }
        }
    }

    async fn run_tasks(self: Arc<Self>) {
        loop {
            self.process_next().await;
        }
    }

    /// Waits for the next task and runs it, queueing it again on failure
    /// while it still has retries left.
    pub async fn process_next(&self) {
        let mut task = self.queue.take().await;

        let manager = self.container_manager.clone();
        let job = task.clone();
        let outcome = tokio::spawn(async move { manager.execute(&job).await }).await;
        let err = match outcome {
            Ok(Ok(())) => {
                debug!("Task completed: {}", task);
                return;
            }
            Ok(Err(err)) => err.to_string(),
            Err(join_err) => join_err.to_string(),
        };

        warn!("Task {} failed: {}", task, err);
        if task.retries >= MAX_RETRIES {
            error!(
                "Dropping {} task for {} after {} retries",
                task.action, task.target, task.retries
            );
        } else if task.action.is_remove() || self.controller.is_connected() {
            task.retries += 1;
            self.queue.add(task);
        } else {
            info!("Controller unreachable, not retrying {}", task);
        }
    }

    async fn run_registry_monitor(self: Arc<Self>) {
        loop {
            self.monitor_registries().await;
            tokio::time::sleep(self.config.registry_interval).await;
        }
    }

    pub async fn monitor_registries(&self) {
        for registry in self.store.get_registries() {
            let status = if registry.is_public || registry.is_from_cache() {
                LinkStatus::Connected
            } else {
                match self.registry_probe.probe(&registry).await {
                    Ok(status) => status,
                    Err(err) => {
                        warn!("Cannot verify registry {}: {}", registry.url, err);
                        LinkStatus::FailedVerification
                    }
                }
            };
            self.status.set_registry_status(registry.id, status);
        }
    }
}

fn find_container<'a>(containers: &'a [RuntimeContainer], uuid: &str) -> Option<&'a RuntimeContainer> {
    containers
        .iter()
        .find(|container| container.microservice_uuid() == Some(uuid))
}
