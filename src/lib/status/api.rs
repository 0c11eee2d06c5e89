use axum::{
    Json, Router,
    extract::State as AxumState,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use log::info;
use serde::Deserialize;
use std::sync::Arc;
use sysinfo::System;
use tokio::{net::TcpListener, sync::Mutex};

use super::{
    reporter::StatusReporter,
    system::host_stats,
    types::AgentStatus,
};
use crate::lib::manager::types::{ControllerLink, ControllerState, ProcessManager};
use crate::lib::store::types::{Microservice, Registry};

/// Local HTTP surface for reading status and pushing desired state.
pub struct StatusServer {
    pub manager: Arc<ProcessManager>,
    pub reporter: Arc<StatusReporter>,
    pub controller: Arc<ControllerState>,
    pub address: String,
    sysinfo: Mutex<System>,
}

#[derive(Debug, Deserialize)]
pub struct ControllerUpdate {
    pub connected: bool,
}

impl StatusServer {
    pub fn new(
        manager: Arc<ProcessManager>,
        reporter: Arc<StatusReporter>,
        controller: Arc<ControllerState>,
        address: &str,
    ) -> Self {
        Self {
            manager,
            reporter,
            controller,
            address: address.to_string(),
            sysinfo: Mutex::new(System::new()),
        }
    }

    pub async fn agent_status(&self) -> AgentStatus {
        let host = host_stats(&mut *self.sysinfo.lock().await);
        AgentStatus {
            microservices: self.reporter.microservice_statuses(),
            registries: self.reporter.registry_statuses(),
            running_containers: self.reporter.running_containers(),
            controller_connected: self.controller.is_connected(),
            queued_tasks: self.manager.queue.len(),
            host,
        }
    }

    async fn get_status(AxumState(server): AxumState<Arc<StatusServer>>) -> Json<AgentStatus> {
        Json(server.agent_status().await)
    }

    async fn get_microservices(
        AxumState(server): AxumState<Arc<StatusServer>>,
    ) -> Json<Vec<Microservice>> {
        Json(server.manager.store.get_latest_microservices())
    }

    async fn put_microservices(
        AxumState(server): AxumState<Arc<StatusServer>>,
        Json(microservices): Json<Vec<Microservice>>,
    ) -> impl IntoResponse {
        info!("Received {} desired microservices", microservices.len());
        server.manager.store.set_latest_microservices(microservices);
        server.manager.update().await;
        StatusCode::ACCEPTED
    }

    async fn put_registries(
        AxumState(server): AxumState<Arc<StatusServer>>,
        Json(registries): Json<Vec<Registry>>,
    ) -> impl IntoResponse {
        info!("Received {} registries", registries.len());
        server.manager.store.set_registries(registries);
        StatusCode::ACCEPTED
    }

    async fn put_controller(
        AxumState(server): AxumState<Arc<StatusServer>>,
        Json(update): Json<ControllerUpdate>,
    ) -> impl IntoResponse {
        info!("Controller reachable: {}", update.connected);
        server.controller.set_connected(update.connected);
        StatusCode::NO_CONTENT
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/status", get(StatusServer::get_status))
            .route("/microservices", get(StatusServer::get_microservices))
            .route("/microservices", put(StatusServer::put_microservices))
            .route("/registries", put(StatusServer::put_registries))
            .route("/controller", put(StatusServer::put_controller))
            .with_state(self)
    }

    pub async fn start_server(self) -> std::io::Result<()> {
        let address = self.address.clone();
        let app = Arc::new(self).router();

        info!("Status server listening on {}", address);
        let listener = TcpListener::bind(&address).await?;
        axum::serve(listener, app).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::manager::types::ManagerConfig;
    use crate::lib::status::types::{MicroserviceState, StatusSink};
    use crate::lib::store::store::DesiredStateStore;
    use crate::lib::testing::{FakeProbe, FakeRuntime};

    fn server() -> (Arc<StatusServer>, Arc<FakeRuntime>) {
        let store = Arc::new(DesiredStateStore::new());
        let runtime = FakeRuntime::new();
        let reporter = Arc::new(StatusReporter::new());
        let controller = Arc::new(ControllerState::new(true));
        let manager = Arc::new(ProcessManager::new(
            store,
            runtime.clone(),
            reporter.clone(),
            controller.clone(),
            Arc::new(FakeProbe::default()),
            ManagerConfig::default(),
        ));
        let server = StatusServer::new(manager, reporter, controller, "127.0.0.1:0");
        (Arc::new(server), runtime)
    }

    #[tokio::test]
    async fn pushing_microservices_triggers_diff() {
        let (server, _runtime) = server();
        let microservices = vec![Microservice {
            uuid: "ms-1".to_string(),
            image: "nginx".to_string(),
            ..Default::default()
        }];

        let response = StatusServer::put_microservices(AxumState(server.clone()), Json(microservices))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(server.manager.queue.len(), 1);
        assert_eq!(server.manager.store.get_current_microservices().len(), 1);
    }

    #[tokio::test]
    async fn status_report_reflects_sink() {
        let (server, _runtime) = server();
        server.reporter.set_running_containers(2);
        server
            .reporter
            .set_microservice_state("ms-1", MicroserviceState::Pulling);
        StatusServer::put_controller(
            AxumState(server.clone()),
            Json(ControllerUpdate { connected: false }),
        )
        .await;

        let Json(status) = StatusServer::get_status(AxumState(server.clone())).await;

        assert_eq!(status.running_containers, 2);
        assert!(!status.controller_connected);
        assert_eq!(
            status.microservices.get("ms-1").map(|s| s.state),
            Some(MicroserviceState::Pulling)
        );
    }
}
