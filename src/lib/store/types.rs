use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Registry url meaning "the image is already local, never pull".
pub const FROM_CACHE: &str = "from_cache";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub external: u16,
    pub internal: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub host_destination: String,
    pub container_destination: String,
    #[serde(default)]
    pub access_mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// A containerized workload the controller wants running on this node.
///
/// Two microservices are the same microservice when their uuids match,
/// whatever else differs between the two snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Microservice {
    pub uuid: String,
    pub image: String,
    pub port_mappings: Vec<PortMapping>,
    pub volume_mappings: Vec<VolumeMapping>,
    pub env_vars: Vec<EnvVar>,
    pub args: Vec<String>,
    pub config: String,
    pub registry_id: i32,
    /// Log quota in MiB.
    pub log_size: u64,
    pub rebuild: bool,
    pub root_host_access: bool,
    pub delete: bool,
    pub delete_with_cleanup: bool,
    /// Epoch milliseconds of the last change made by the controller.
    pub last_modified: i64,

    pub updating: bool,
    pub container_id: Option<String>,
    pub container_ip: Option<String>,
    pub stuck_in_restart: bool,
}

impl PartialEq for Microservice {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for Microservice {}

impl Hash for Microservice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl Microservice {
    pub fn is_marked_for_deletion(&self) -> bool {
        self.delete || self.delete_with_cleanup
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registry {
    pub id: i32,
    pub url: String,
    pub is_public: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
}

impl Registry {
    pub fn is_from_cache(&self) -> bool {
        self.url == FROM_CACHE
    }
}

/// Message route between microservices, consumed by the message layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub producer: String,
    pub receivers: Vec<String>,
}
