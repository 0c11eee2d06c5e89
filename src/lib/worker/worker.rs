use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::types::{ContainerManager, WorkerError, WorkerResult};
use crate::lib::runtime::types::{ContainerRuntime, RuntimeContainer};
use crate::lib::status::types::{MicroserviceState, MicroserviceStatus, StatusSink};
use crate::lib::store::{
    store::{DesiredStateStore, UpdatingGuard},
    types::Microservice,
};
use crate::lib::tasks::types::{ContainerTask, TaskAction};
use std::sync::Arc;

impl ContainerManager {
    pub fn new(
        store: Arc<DesiredStateStore>,
        runtime: Arc<dyn ContainerRuntime>,
        status: Arc<dyn StatusSink>,
        host_ip: &str,
    ) -> Self {
        ContainerManager {
            store,
            runtime,
            status,
            host_ip: host_ip.to_string(),
            delete_lock: Mutex::new(()),
        }
    }

    /// Runs `task` to completion. Tasks for microservices that are no longer
    /// desired finish without doing anything.
    pub async fn execute(&self, task: &ContainerTask) -> WorkerResult<()> {
        match task.action {
            TaskAction::Add => match self.resolve(task) {
                Some(microservice) => self.add_microservice(&microservice).await,
                None => Ok(()),
            },
            TaskAction::Update => match self.resolve(task) {
                Some(microservice) => self.update_microservice(&microservice).await,
                None => Ok(()),
            },
            TaskAction::Remove => self.remove_container(&task.target, false).await,
            TaskAction::RemoveWithCleanup => self.remove_container(&task.target, true).await,
        }
    }

    fn resolve(&self, task: &ContainerTask) -> Option<Microservice> {
        let microservice = self.store.find_latest_microservice_by_uuid(&task.target);
        if microservice.is_none() {
            debug!("Dropping stale task {}", task);
        }
        microservice.filter(|ms| !ms.is_marked_for_deletion())
    }

    async fn add_microservice(&self, microservice: &Microservice) -> WorkerResult<()> {
        if self.runtime.find_container(&microservice.uuid).await?.is_some() {
            if microservice.rebuild {
                return self.update_microservice(microservice).await;
            }
            debug!("Container for {} already exists", microservice.uuid);
            return Ok(());
        }
        self.create_and_start(microservice).await
    }

    async fn update_microservice(&self, microservice: &Microservice) -> WorkerResult<()> {
        let _updating = UpdatingGuard::acquire(self.store.clone(), &microservice.uuid);
        self.status
            .set_microservice_state(&microservice.uuid, MicroserviceState::Updating);

        if let Some(container) = self.runtime.find_container(&microservice.uuid).await? {
            let _delete = self.delete_lock.lock().await;
            self.purge(&container, microservice.rebuild).await?;
        }
        self.create_and_start(microservice).await
    }

    async fn create_and_start(&self, microservice: &Microservice) -> WorkerResult<()> {
        let result = self.try_create_and_start(microservice).await;
        if let Err(err) = &result {
            warn!("Failed to run microservice {}: {}", microservice.uuid, err);
            self.status.set_microservice_status(
                &microservice.uuid,
                MicroserviceStatus {
                    state: MicroserviceState::Failed,
                    error_message: Some(err.to_string()),
                    ..Default::default()
                },
            );
        }
        result
    }

    async fn try_create_and_start(&self, microservice: &Microservice) -> WorkerResult<()> {
        let uuid = microservice.uuid.as_str();
        let registry = self
            .store
            .get_registry(microservice.registry_id)
            .ok_or(WorkerError::RegistryNotFound(microservice.registry_id))?;

        if !registry.is_from_cache() {
            self.status.set_microservice_state(uuid, MicroserviceState::Pulling);
            self.runtime.pull_image(&microservice.image, &registry).await?;
        }

        self.status.set_microservice_state(uuid, MicroserviceState::Creating);
        let container_id = self.runtime.create_container(microservice, &self.host_ip).await?;
        self.store
            .set_runtime_fields(uuid, Some(container_id.clone()), None);
        self.status.set_microservice_state(uuid, MicroserviceState::Created);

        self.status.set_microservice_state(uuid, MicroserviceState::Starting);
        self.runtime.start_container(&container_id).await?;

        info!("Microservice {} running in container {}", uuid, container_id);
        self.status.set_microservice_status(
            uuid,
            MicroserviceStatus {
                state: MicroserviceState::Running,
                container_id: Some(container_id),
                start_time: Some(chrono::Utc::now().timestamp_millis()),
                ..Default::default()
            },
        );
        if microservice.rebuild {
            self.store.clear_rebuild(uuid);
        }
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, with_cleanup: bool) -> WorkerResult<()> {
        let _delete = self.delete_lock.lock().await;

        let Some(container) = self.runtime.get_container(container_id).await? else {
            debug!("Container {} already removed", container_id);
            return Ok(());
        };
        let uuid = container.microservice_uuid().map(str::to_string);
        if let Some(uuid) = &uuid {
            self.status.set_microservice_state(uuid, MicroserviceState::Deleting);
        }

        self.purge(&container, with_cleanup).await?;

        if let Some(uuid) = &uuid {
            if self.store.find_latest_microservice_by_uuid(uuid).is_some() {
                self.status.set_microservice_state(uuid, MicroserviceState::Deleted);
            } else {
                self.status.remove_microservice_status(uuid);
            }
        }
        Ok(())
    }

    /// Stops and removes a container. With cleanup its volumes and image go
    /// too; an image that cannot be removed is left in place.
    async fn purge(&self, container: &RuntimeContainer, with_cleanup: bool) -> WorkerResult<()> {
        self.runtime.stop_container(&container.id).await?;
        self.runtime.remove_container(&container.id, with_cleanup).await?;

        if with_cleanup && !container.image.is_empty() {
            if let Err(err) = self.runtime.remove_image(&container.image).await {
                warn!("Keeping image {} of container {}: {}", container.image, container.id, err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::status::reporter::StatusReporter;
    use crate::lib::store::types::{FROM_CACHE, Registry};
    use crate::lib::testing::FakeRuntime;

    struct Fixture {
        store: Arc<DesiredStateStore>,
        runtime: Arc<FakeRuntime>,
        reporter: Arc<StatusReporter>,
        manager: ContainerManager,
    }

    fn fixture(microservices: Vec<Microservice>) -> Fixture {
        let store = Arc::new(DesiredStateStore::new());
        store.set_latest_microservices(microservices);
        store.set_registries(vec![
            Registry {
                id: 1,
                url: "registry.hub.docker.com".to_string(),
                is_public: true,
                ..Default::default()
            },
            Registry {
                id: 2,
                url: FROM_CACHE.to_string(),
                is_public: true,
                ..Default::default()
            },
        ]);
        let runtime = FakeRuntime::new();
        let reporter = Arc::new(StatusReporter::new());
        let manager = ContainerManager::new(store.clone(), runtime.clone(), reporter.clone(), "10.0.0.5");
        Fixture {
            store,
            runtime,
            reporter,
            manager,
        }
    }

    fn microservice(uuid: &str, registry_id: i32) -> Microservice {
        Microservice {
            uuid: uuid.to_string(),
            image: "edge/sensor:1.0".to_string(),
            registry_id,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_pulls_creates_and_starts() {
        let f = fixture(vec![microservice("ms-1", 1)]);

        f.manager.execute(&ContainerTask::add("ms-1")).await.unwrap();

        assert_eq!(f.runtime.state().pulled, vec!["edge/sensor:1.0".to_string()]);
        let container = f.runtime.find_container("ms-1").await.unwrap().unwrap();
        assert_eq!(container.state, "running");

        let status = f.reporter.microservice_status("ms-1").unwrap();
        assert_eq!(status.state, MicroserviceState::Running);
        assert_eq!(status.container_id, Some(container.id.clone()));
        let stored = f.store.find_latest_microservice_by_uuid("ms-1").unwrap();
        assert_eq!(stored.container_id, Some(container.id));
    }

    #[tokio::test]
    async fn add_skips_pull_for_cached_images() {
        let f = fixture(vec![microservice("ms-1", 2)]);
        f.manager.execute(&ContainerTask::add("ms-1")).await.unwrap();

        assert!(f.runtime.state().pulled.is_empty());
        assert_eq!(f.runtime.container_count(), 1);
    }

    #[tokio::test]
    async fn add_is_noop_when_container_exists() {
        let f = fixture(vec![microservice("ms-1", 1)]);
        f.runtime.with_container("c1", "ms-1", 100, "running");

        f.manager.execute(&ContainerTask::add("ms-1")).await.unwrap();

        assert_eq!(f.runtime.container_count(), 1);
        assert!(f.runtime.state().pulled.is_empty());
    }

    #[tokio::test]
    async fn add_with_rebuild_replaces_container() {
        let mut ms = microservice("ms-1", 1);
        ms.rebuild = true;
        let f = fixture(vec![ms]);
        f.runtime.with_container("c1", "ms-1", 100, "running");

        f.manager.execute(&ContainerTask::add("ms-1")).await.unwrap();

        assert!(!f.runtime.has_container("c1"));
        assert_eq!(f.runtime.container_count(), 1);
        assert_eq!(f.runtime.state().removed_images, vec!["ms-1-image".to_string()]);
        assert!(!f.store.find_latest_microservice_by_uuid("ms-1").unwrap().rebuild);
    }

    #[tokio::test]
    async fn stale_task_is_dropped() {
        let f = fixture(vec![]);
        f.manager.execute(&ContainerTask::add("gone")).await.unwrap();
        f.manager.execute(&ContainerTask::update("gone")).await.unwrap();
        assert_eq!(f.runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn unknown_registry_fails_the_task() {
        let f = fixture(vec![microservice("ms-1", 9)]);

        let err = f.manager.execute(&ContainerTask::add("ms-1")).await.unwrap_err();

        assert!(matches!(err, WorkerError::RegistryNotFound(9)));
        let status = f.reporter.microservice_status("ms-1").unwrap();
        assert_eq!(status.state, MicroserviceState::Failed);
        assert!(status.error_message.is_some());
    }

    #[tokio::test]
    async fn pull_failure_fails_the_task() {
        let f = fixture(vec![microservice("ms-1", 1)]);
        f.runtime.state().fail_pull = true;

        assert!(f.manager.execute(&ContainerTask::add("ms-1")).await.is_err());
        assert_eq!(f.runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn update_recreates_and_resets_flag() {
        let f = fixture(vec![microservice("ms-1", 1)]);
        f.runtime.with_container("c1", "ms-1", 100, "running");

        f.manager.execute(&ContainerTask::update("ms-1")).await.unwrap();

        assert!(!f.runtime.has_container("c1"));
        let container = f.runtime.find_container("ms-1").await.unwrap().unwrap();
        assert_eq!(container.state, "running");
        assert!(!f.store.find_latest_microservice_by_uuid("ms-1").unwrap().updating);
    }

    #[tokio::test]
    async fn failed_update_still_resets_flag() {
        let f = fixture(vec![microservice("ms-1", 1)]);
        f.runtime.with_container("c1", "ms-1", 100, "running");
        f.runtime.state().fail_start = true;

        assert!(f.manager.execute(&ContainerTask::update("ms-1")).await.is_err());
        assert!(!f.store.find_latest_microservice_by_uuid("ms-1").unwrap().updating);
    }

    #[tokio::test]
    async fn remove_of_missing_container_succeeds() {
        let f = fixture(vec![]);
        f.manager
            .execute(&ContainerTask::remove("nope", false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_of_undesired_container_drops_status() {
        let f = fixture(vec![]);
        f.runtime.with_container("c1", "old", 100, "running");
        f.reporter
            .set_microservice_state("old", MicroserviceState::Running);

        f.manager
            .execute(&ContainerTask::remove("c1", false))
            .await
            .unwrap();

        assert!(!f.runtime.has_container("c1"));
        assert!(f.reporter.microservice_status("old").is_none());
        assert!(f.runtime.state().removed_images.is_empty());
    }

    #[tokio::test]
    async fn cleanup_survives_referenced_image() {
        let mut ms = microservice("ms-1", 1);
        ms.delete_with_cleanup = true;
        let f = fixture(vec![ms]);
        f.runtime.with_container("c1", "ms-1", 100, "running");
        f.runtime.state().image_in_use = true;

        f.manager
            .execute(&ContainerTask::remove("c1", true))
            .await
            .unwrap();

        assert!(!f.runtime.has_container("c1"));
        assert_eq!(
            f.reporter.microservice_status("ms-1").map(|s| s.state),
            Some(MicroserviceState::Deleted)
        );
    }

    #[tokio::test]
    async fn remove_failure_is_reported() {
        let f = fixture(vec![]);
        f.runtime.with_container("c1", "old", 100, "running");
        f.runtime.state().fail_remove = true;

        assert!(f.manager.execute(&ContainerTask::remove("c1", false)).await.is_err());
    }
}
