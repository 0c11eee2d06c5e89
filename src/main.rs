use clap::Parser;
use log::info;
use std::{error::Error, path::Path, sync::Arc};

use crate::lib::{
    config::{AgentConfig, DesiredState},
    logging::init_logging,
    manager::{
        registry::HttpRegistryProbe,
        types::{ControllerState, ProcessManager},
    },
    runtime::docker::DockerClient,
    status::{api::StatusServer, reporter::StatusReporter},
    store::store::DesiredStateStore,
};

mod lib {
    pub mod config;
    pub mod logging;
    pub mod manager;
    pub mod runtime;
    pub mod status;
    pub mod store;
    pub mod tasks;
    pub mod worker;

    #[cfg(test)]
    pub mod testing;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let config = AgentConfig::parse();

    let store = Arc::new(DesiredStateStore::new());
    if let Some(path) = &config.desired_state {
        DesiredState::load(Path::new(path))?.apply(&store);
        info!("Loaded desired state from {}", path);
    }

    let runtime = Arc::new(DockerClient::new(&config.docker_url, config.request_timeout_secs));
    let reporter = Arc::new(StatusReporter::new());
    let controller = Arc::new(ControllerState::new(true));
    let probe = Arc::new(HttpRegistryProbe::new(config.request_timeout())?);

    let manager = Arc::new(ProcessManager::new(
        store,
        runtime,
        reporter.clone(),
        controller.clone(),
        probe,
        config.manager_config(),
    ));
    let _workers = manager.start().await;
    manager.update().await;

    StatusServer::new(manager, reporter, controller, &config.listen)
        .start_server()
        .await?;

    Ok(())
}
