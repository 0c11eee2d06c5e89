use clap::Parser;
use serde::Deserialize;
use std::{collections::HashMap, path::Path, time::Duration};

use crate::lib::manager::types::ManagerConfig;
use crate::lib::store::{
    store::DesiredStateStore,
    types::{Microservice, Registry, Route},
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Keeps edge microservice containers in line with the controller", long_about = None)]
pub struct AgentConfig {
    /// Container engine endpoint (unix://, tcp:// or http://)
    #[arg(long, env = "EDGE_AGENT_DOCKER_URL", default_value = "unix:///var/run/docker.sock")]
    pub docker_url: String,

    /// Address containers use to reach this host
    #[arg(long, env = "EDGE_AGENT_HOST_IP", default_value = "127.0.0.1")]
    pub host_ip: String,

    #[arg(long, env = "EDGE_AGENT_MONITOR_INTERVAL_SECS", default_value_t = 10)]
    pub monitor_interval_secs: u64,

    #[arg(long, env = "EDGE_AGENT_REGISTRY_INTERVAL_SECS", default_value_t = 60)]
    pub registry_interval_secs: u64,

    /// Upper bound for every container engine and registry request
    #[arg(long, env = "EDGE_AGENT_REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    pub request_timeout_secs: u64,

    /// Listen address of the status API
    #[arg(long, env = "EDGE_AGENT_LISTEN", default_value = "127.0.0.1:54321")]
    pub listen: String,

    /// JSON file with the desired state to load at startup
    #[arg(long, env = "EDGE_AGENT_DESIRED_STATE")]
    pub desired_state: Option<String>,
}

impl AgentConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            host_ip: self.host_ip.clone(),
            monitor_interval: Duration::from_secs(self.monitor_interval_secs),
            registry_interval: Duration::from_secs(self.registry_interval_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Desired state as the controller sync persists it.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DesiredState {
    pub microservices: Vec<Microservice>,
    pub registries: Vec<Registry>,
    pub routes: HashMap<String, Route>,
    pub configs: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid desired state: {0}")]
    Json(#[from] serde_json::Error),
}

impl DesiredState {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn apply(self, store: &DesiredStateStore) {
        store.set_registries(self.registries);
        store.set_routes(self.routes);
        store.set_configs(self.configs);
        store.set_latest_microservices(self.microservices);
    }
}
