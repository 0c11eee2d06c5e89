use super::{
    stuck::RestartStuckChecker,
    types::{
        ContainerRuntime, ContainerStats, RuntimeContainer, RuntimeError, RuntimeResult,
        SELF_NAME_ENV, container_name, uuid_from_container_name,
    },
};
use crate::lib::status::types::{MicroserviceState, MicroserviceStatus};
use crate::lib::store::types::{Microservice, PortMapping, Protocol, Registry};
use async_trait::async_trait;
use bollard::{
    API_DEFAULT_VERSION, Docker,
    auth::DockerCredentials,
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
        RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    image::{CreateImageOptions, RemoveImageOptions},
    models::{
        ContainerInspectResponse, ContainerSummary, HostConfig, HostConfigLogConfig, PortBinding,
        RestartPolicy, RestartPolicyNameEnum,
    },
};
use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};
use tokio::sync::RwLock;

/// Hostnames through which a container reaches the agent's host.
pub const HOST_ALIASES: [&str; 2] = ["edge-agent", "edge-gateway"];

const RESTART_MAX_RETRIES: i64 = 10;
const LOG_FILE_SIZE: &str = "2m";
const DEFAULT_VOLUME_MODE: &str = "rw";
const STOP_TIMEOUT_SECS: i64 = 10;
const STATS_SAMPLE_GAP: Duration = Duration::from_millis(200);

/// Splits `name:tag`, defaulting the tag to `latest`. A colon before the last
/// `/` belongs to a registry port, not a tag.
pub fn split_image(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }
    match image.rfind(':') {
        Some(idx) if !image[idx + 1..].contains('/') => {
            (image[..idx].to_string(), image[idx + 1..].to_string())
        }
        _ => (image.to_string(), "latest".to_string()),
    }
}

pub fn volume_mode(access_mode: &str) -> &'static str {
    match access_mode.to_ascii_lowercase().as_str() {
        "ro" => "ro",
        "rw" => "rw",
        _ => DEFAULT_VOLUME_MODE,
    }
}

/// Rotated log files kept for a quota given in MiB, each file 2 MiB.
pub fn log_file_count(log_size: u64) -> u64 {
    (log_size / 2).max(1)
}

fn port_key(port: u16, protocol: Protocol) -> String {
    format!("{}/{}", port, protocol.as_str())
}

fn parse_port_key(key: &str) -> Option<(u16, Protocol)> {
    let mut parts = key.splitn(2, '/');
    let port = parts.next()?.parse().ok()?;
    let protocol = match parts.next() {
        Some("udp") => Protocol::Udp,
        _ => Protocol::Tcp,
    };
    Some((port, protocol))
}

pub fn extra_hosts(host_ip: &str) -> Vec<String> {
    HOST_ALIASES
        .iter()
        .map(|alias| format!("{}:{}", alias, host_ip))
        .collect()
}

/// Translates a microservice into the engine's create request.
pub fn container_config(microservice: &Microservice, host_ip: &str) -> Config<String> {
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut bindings: HashMap<String, Vec<PortBinding>> = HashMap::new();
    for mapping in &microservice.port_mappings {
        let key = port_key(mapping.internal, mapping.protocol);
        exposed_ports.insert(key.clone(), HashMap::new());
        bindings.entry(key).or_default().push(PortBinding {
            host_ip: None,
            host_port: Some(mapping.external.to_string()),
        });
    }
    let port_bindings = bindings
        .into_iter()
        .map(|(key, value)| (key, Some(value)))
        .collect();

    let binds = microservice
        .volume_mappings
        .iter()
        .map(|volume| {
            format!(
                "{}:{}:{}",
                volume.host_destination,
                volume.container_destination,
                volume_mode(&volume.access_mode)
            )
        })
        .collect();

    let mut env: Vec<String> = microservice
        .env_vars
        .iter()
        .map(|var| format!("{}={}", var.key, var.value))
        .collect();
    env.push(format!("{}={}", SELF_NAME_ENV, microservice.uuid));

    let log_config = HostConfigLogConfig {
        typ: Some("json-file".to_string()),
        config: Some(HashMap::from([
            (
                "max-file".to_string(),
                log_file_count(microservice.log_size).to_string(),
            ),
            ("max-size".to_string(), LOG_FILE_SIZE.to_string()),
        ])),
    };

    let restart_policy = RestartPolicy {
        name: Some(RestartPolicyNameEnum::ON_FAILURE),
        maximum_retry_count: Some(RESTART_MAX_RETRIES),
    };

    let mut host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(binds),
        log_config: Some(log_config),
        restart_policy: Some(restart_policy),
        ..Default::default()
    };
    if microservice.root_host_access {
        host_config.network_mode = Some("host".to_string());
        host_config.privileged = Some(true);
    } else {
        host_config.extra_hosts = Some(extra_hosts(host_ip));
    }

    Config {
        image: Some(microservice.image.clone()),
        env: Some(env),
        cmd: (!microservice.args.is_empty()).then(|| microservice.args.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Whether a live container still carries the microservice's ports and
/// network setup.
pub fn container_matches(inspect: &ContainerInspectResponse, microservice: &Microservice) -> bool {
    let host_config = inspect.host_config.as_ref();

    let actual: HashSet<PortMapping> = host_config
        .and_then(|config| config.port_bindings.as_ref())
        .map(|bindings| {
            bindings
                .iter()
                .filter_map(|(key, value)| Some((parse_port_key(key)?, value.as_ref()?)))
                .flat_map(|((internal, protocol), value)| {
                    value.iter().filter_map(move |binding| {
                        let external = binding.host_port.as_deref()?.parse().ok()?;
                        Some(PortMapping {
                            external,
                            internal,
                            protocol,
                        })
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let desired: HashSet<PortMapping> = microservice.port_mappings.iter().cloned().collect();
    if actual != desired {
        return false;
    }

    let host_mode = host_config.and_then(|config| config.network_mode.as_deref()) == Some("host");
    if microservice.root_host_access {
        host_mode
    } else {
        !host_mode
            && host_config
                .and_then(|config| config.extra_hosts.as_ref())
                .is_some_and(|hosts| !hosts.is_empty())
    }
}

/// The counters one stats snapshot contributes to the cpu/memory figures.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatSample {
    pub container_cpu: u64,
    pub system_cpu: Option<u64>,
    pub memory_usage: Option<u64>,
}

impl From<&Stats> for StatSample {
    fn from(stats: &Stats) -> Self {
        StatSample {
            container_cpu: stats.cpu_stats.cpu_usage.total_usage,
            system_cpu: stats.cpu_stats.system_cpu_usage,
            memory_usage: stats.memory_stats.usage,
        }
    }
}

pub fn cpu_percentage(before: &StatSample, after: &StatSample) -> f64 {
    let (Some(system_before), Some(system_after)) = (before.system_cpu, after.system_cpu) else {
        return 0.0;
    };
    let system_delta = system_after as f64 - system_before as f64;
    if system_delta == 0.0 {
        return 0.0;
    }
    let container_delta = after.container_cpu as f64 - before.container_cpu as f64;
    1000.0 * (container_delta / system_delta).abs()
}

fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

const REMOVAL_IN_PROGRESS: &str = "already in progress";

/// 304 means the container was already running.
fn start_outcome(err: BollardError) -> RuntimeResult<()> {
    match status_code(&err) {
        Some(304) => Ok(()),
        _ => Err(err.into()),
    }
}

/// A container that is already stopped or gone counts as stopped.
fn stop_outcome(err: BollardError) -> RuntimeResult<()> {
    match status_code(&err) {
        Some(304) | Some(404) => Ok(()),
        _ => Err(err.into()),
    }
}

/// Missing containers and a removal another caller already started both count
/// as removed.
fn remove_outcome(err: BollardError) -> RuntimeResult<()> {
    let in_progress = matches!(
        &err,
        BollardError::DockerResponseServerError { status_code: 409, message }
            if message.contains(REMOVAL_IN_PROGRESS)
    );
    if in_progress || status_code(&err) == Some(404) {
        return Ok(());
    }
    Err(err.into())
}

fn remove_image_outcome(err: BollardError, image: &str) -> RuntimeResult<()> {
    match status_code(&err) {
        Some(404) => Ok(()),
        Some(409) => Err(RuntimeError::ImageInUse(image.to_string())),
        _ => Err(err.into()),
    }
}

fn epoch_millis(timestamp: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|time| time.timestamp_millis())
        .filter(|millis| *millis > 0)
}

fn summary_to_container(summary: ContainerSummary) -> Option<RuntimeContainer> {
    let name = summary
        .names?
        .into_iter()
        .find(|name| uuid_from_container_name(name).is_some())?;
    let ip_address = summary
        .network_settings
        .and_then(|settings| settings.networks)
        .and_then(|networks| {
            networks
                .into_values()
                .filter_map(|endpoint| endpoint.ip_address)
                .find(|ip| !ip.is_empty())
        });

    Some(RuntimeContainer {
        id: summary.id?,
        name: name.trim_start_matches('/').to_string(),
        image: summary.image.unwrap_or_default(),
        created_at: summary.created.unwrap_or_default() * 1000,
        state: summary.state.unwrap_or_default(),
        ip_address,
    })
}

fn inspect_to_container(inspect: ContainerInspectResponse) -> RuntimeContainer {
    RuntimeContainer {
        id: inspect.id.unwrap_or_default(),
        name: inspect
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image: inspect
            .config
            .and_then(|config| config.image)
            .unwrap_or_default(),
        created_at: inspect.created.as_deref().and_then(epoch_millis).unwrap_or_default(),
        state: inspect
            .state
            .and_then(|state| state.status)
            .map(|status| status.to_string())
            .unwrap_or_default(),
        ip_address: inspect
            .network_settings
            .and_then(|settings| settings.ip_address)
            .filter(|ip| !ip.is_empty()),
    }
}

/// Container runtime backed by a Docker-compatible engine.
///
/// The engine handle is created lazily and replaced on `reconnect`. Every
/// request is bounded by the configured client timeout.
pub struct DockerClient {
    endpoint: String,
    timeout_secs: u64,
    client: RwLock<Option<Docker>>,
    stuck: RestartStuckChecker,
}

impl DockerClient {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Self {
        DockerClient {
            endpoint: endpoint.to_string(),
            timeout_secs,
            client: RwLock::new(None),
            stuck: RestartStuckChecker::new(),
        }
    }

    fn connect(endpoint: &str, timeout_secs: u64) -> RuntimeResult<Docker> {
        let docker = if let Some(path) = endpoint.strip_prefix("unix://") {
            Docker::connect_with_unix(path, timeout_secs, API_DEFAULT_VERSION)?
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, timeout_secs, API_DEFAULT_VERSION)?
        } else {
            Docker::connect_with_local_defaults()?.with_timeout(Duration::from_secs(timeout_secs))
        };
        Ok(docker)
    }

    async fn client(&self) -> RuntimeResult<Docker> {
        if let Some(docker) = self.client.read().await.as_ref() {
            return Ok(docker.clone());
        }
        self.reconnect().await?;
        self.client
            .read()
            .await
            .clone()
            .ok_or(RuntimeError::NotConnected)
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerInspectResponse> {
        let docker = self.client().await?;
        docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|err| match status_code(&err) {
                Some(404) => RuntimeError::NotFound(container_id.to_string()),
                _ => RuntimeError::Api(err),
            })
    }

    /// Engine lifecycle of a container, with restart loops reported as
    /// `StuckInRestart`.
    pub async fn get_container_status(&self, container_id: &str) -> RuntimeResult<MicroserviceState> {
        let inspect = self.inspect(container_id).await?;
        Ok(self.state_of(container_id, &inspect))
    }

    fn state_of(&self, container_id: &str, inspect: &ContainerInspectResponse) -> MicroserviceState {
        let state = inspect
            .state
            .as_ref()
            .and_then(|state| state.status.as_ref())
            .map(|status| MicroserviceState::from_engine(&status.to_string()))
            .unwrap_or_default();

        if state == MicroserviceState::Restarting && self.stuck.is_stuck(container_id) {
            warn!("Container {} is stuck in a restart loop", container_id);
            return MicroserviceState::StuckInRestart;
        }
        state
    }

    async fn sample_stats(&self, docker: &Docker, container_id: &str) -> Option<StatSample> {
        let stream = docker.stats(
            container_id,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );
        futures_util::pin_mut!(stream);
        match stream.next().await {
            Some(Ok(stats)) => Some(StatSample::from(&stats)),
            Some(Err(err)) => {
                debug!("Stats unavailable for container {}: {}", container_id, err);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn ping(&self) -> RuntimeResult<()> {
        let docker = self.client().await?;
        docker.ping().await?;
        Ok(())
    }

    async fn reconnect(&self) -> RuntimeResult<()> {
        info!("Connecting to container engine at {}", self.endpoint);
        let docker = Self::connect(&self.endpoint, self.timeout_secs)?;
        *self.client.write().await = Some(docker);
        Ok(())
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<RuntimeContainer>> {
        let docker = self.client().await?;
        let summaries = docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await?;
        Ok(summaries.into_iter().filter_map(summary_to_container).collect())
    }

    async fn get_container(&self, container_id: &str) -> RuntimeResult<Option<RuntimeContainer>> {
        match self.inspect(container_id).await {
            Ok(inspect) => Ok(Some(inspect_to_container(inspect))),
            Err(RuntimeError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn pull_image(&self, image: &str, registry: &Registry) -> RuntimeResult<()> {
        if registry.is_from_cache() {
            debug!("Image {} is served from cache, skipping pull", image);
            return Ok(());
        }

        let docker = self.client().await?;
        let (from_image, tag) = split_image(image);
        let credentials = (!registry.is_public).then(|| DockerCredentials {
            username: registry.username.clone(),
            password: registry.password.clone(),
            email: registry.email.clone(),
            serveraddress: Some(registry.url.clone()),
            ..Default::default()
        });

        info!("Pulling image: {}", image);
        let stream = docker.create_image(
            Some(CreateImageOptions {
                from_image,
                tag,
                ..Default::default()
            }),
            None,
            credentials,
        );
        futures_util::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            let info = msg?;
            if let Some(status) = info.status {
                debug!("{}: {}", image, status);
            }
        }
        info!("Image pulled: {}", image);
        Ok(())
    }

    async fn create_container(&self, microservice: &Microservice, host_ip: &str) -> RuntimeResult<String> {
        let docker = self.client().await?;
        let options = Some(CreateContainerOptions {
            name: container_name(&microservice.uuid),
            ..Default::default()
        });
        let response = docker
            .create_container(options, container_config(microservice, host_ip))
            .await?;
        info!("Container created: {} for {}", response.id, microservice.uuid);
        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> RuntimeResult<()> {
        let docker = self.client().await?;
        match docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(_) => {
                info!("Container started: {}", container_id);
                Ok(())
            }
            Err(err) => start_outcome(err),
        }
    }

    async fn stop_container(&self, container_id: &str) -> RuntimeResult<()> {
        let docker = self.client().await?;
        match docker
            .stop_container(container_id, Some(StopContainerOptions { t: STOP_TIMEOUT_SECS }))
            .await
        {
            Ok(_) => {
                info!("Container stopped: {}", container_id);
                Ok(())
            }
            Err(err) => {
                stop_outcome(err)?;
                debug!("Container {} already stopped", container_id);
                Ok(())
            }
        }
    }

    async fn remove_container(&self, container_id: &str, with_volumes: bool) -> RuntimeResult<()> {
        let docker = self.client().await?;
        let options = Some(RemoveContainerOptions {
            v: with_volumes,
            force: true,
            ..Default::default()
        });
        let result = match docker.remove_container(container_id, options).await {
            Ok(_) => Ok(()),
            Err(err) => remove_outcome(err),
        };
        if result.is_ok() {
            self.stuck.forget(container_id);
            info!("Container removed: {}", container_id);
        }
        result
    }

    async fn remove_image(&self, image: &str) -> RuntimeResult<()> {
        let docker = self.client().await?;
        match docker
            .remove_image(image, Some(RemoveImageOptions::default()), None)
            .await
        {
            Ok(_) => {
                info!("Image removed: {}", image);
                Ok(())
            }
            Err(err) => remove_image_outcome(err, image),
        }
    }

    async fn get_microservice_status(&self, container_id: &str) -> RuntimeResult<MicroserviceStatus> {
        let inspect = self.inspect(container_id).await?;
        let state = self.state_of(container_id, &inspect);
        let start_time = inspect
            .state
            .as_ref()
            .and_then(|state| state.started_at.as_deref())
            .and_then(epoch_millis);

        let stats = if state.is_running() {
            self.get_container_stats(container_id).await?
        } else {
            ContainerStats::default()
        };

        Ok(MicroserviceStatus {
            state,
            container_id: Some(container_id.to_string()),
            start_time,
            cpu_usage: stats.cpu_usage,
            memory_usage: stats.memory_usage,
            error_message: None,
        })
    }

    async fn get_container_stats(&self, container_id: &str) -> RuntimeResult<ContainerStats> {
        if !self.get_container_status(container_id).await?.is_running() {
            return Ok(ContainerStats::default());
        }

        let docker = self.client().await?;
        let before = self.sample_stats(&docker, container_id).await;
        tokio::time::sleep(STATS_SAMPLE_GAP).await;
        let after = self.sample_stats(&docker, container_id).await;

        match (before, after) {
            (Some(before), Some(after)) => Ok(ContainerStats {
                cpu_usage: cpu_percentage(&before, &after),
                memory_usage: after.memory_usage.unwrap_or_default(),
            }),
            _ => Ok(ContainerStats::default()),
        }
    }

    async fn are_microservice_and_container_equal(
        &self,
        container_id: &str,
        microservice: &Microservice,
    ) -> RuntimeResult<bool> {
        let inspect = self.inspect(container_id).await?;
        Ok(container_matches(&inspect, microservice))
    }
}
