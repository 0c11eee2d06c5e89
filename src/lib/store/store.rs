use super::types::{Microservice, Registry, Route};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

#[derive(Debug, Default)]
struct StoreState {
    latest: Vec<Microservice>,
    current: Vec<Microservice>,
    registries: HashMap<i32, Registry>,
    routes: HashMap<String, Route>,
    configs: HashMap<String, String>,
}

/// Latest and last-synchronized desired state, shared by every worker.
///
/// One lock guards all collections. Readers always get owned copies so they
/// never see a writer halfway through a replace.
#[derive(Debug, Default)]
pub struct DesiredStateStore {
    state: Mutex<StoreState>,
}

impl DesiredStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_latest_microservices(&self) -> Vec<Microservice> {
        self.lock().latest.clone()
    }

    /// Replaces the latest list. Runtime fields observed for a uuid survive
    /// the replace so an in-flight operation keeps its `updating` mark.
    pub fn set_latest_microservices(&self, mut microservices: Vec<Microservice>) {
        let mut state = self.lock();
        for ms in microservices.iter_mut() {
            if let Some(previous) = state.latest.iter().find(|old| old.uuid == ms.uuid) {
                ms.updating = previous.updating;
                ms.container_id = previous.container_id.clone();
                ms.container_ip = previous.container_ip.clone();
                ms.stuck_in_restart = previous.stuck_in_restart;
            }
        }
        state.latest = microservices;
    }

    pub fn get_current_microservices(&self) -> Vec<Microservice> {
        self.lock().current.clone()
    }

    pub fn set_current_microservices(&self, microservices: Vec<Microservice>) {
        self.lock().current = microservices;
    }

    pub fn find_latest_microservice_by_uuid(&self, uuid: &str) -> Option<Microservice> {
        self.lock().latest.iter().find(|ms| ms.uuid == uuid).cloned()
    }

    pub fn get_registry(&self, id: i32) -> Option<Registry> {
        self.lock().registries.get(&id).cloned()
    }

    pub fn get_registries(&self) -> Vec<Registry> {
        let mut registries: Vec<Registry> = self.lock().registries.values().cloned().collect();
        registries.sort_by_key(|registry| registry.id);
        registries
    }

    pub fn set_registries(&self, registries: Vec<Registry>) {
        self.lock().registries = registries
            .into_iter()
            .map(|registry| (registry.id, registry))
            .collect();
    }

    pub fn get_routes(&self) -> HashMap<String, Route> {
        self.lock().routes.clone()
    }

    pub fn set_routes(&self, routes: HashMap<String, Route>) {
        self.lock().routes = routes;
    }

    pub fn get_configs(&self) -> HashMap<String, String> {
        self.lock().configs.clone()
    }

    pub fn set_configs(&self, configs: HashMap<String, String>) {
        self.lock().configs = configs;
    }

    pub fn clear(&self) {
        *self.lock() = StoreState::default();
    }

    fn with_latest<F: FnOnce(&mut Microservice)>(&self, uuid: &str, f: F) -> bool {
        let mut state = self.lock();
        match state.latest.iter_mut().find(|ms| ms.uuid == uuid) {
            Some(ms) => {
                f(ms);
                true
            }
            None => false,
        }
    }

    pub fn set_updating(&self, uuid: &str, updating: bool) -> bool {
        self.with_latest(uuid, |ms| ms.updating = updating)
    }

    pub fn set_runtime_fields(&self, uuid: &str, container_id: Option<String>, ip: Option<String>) {
        self.with_latest(uuid, |ms| {
            ms.container_id = container_id;
            ms.container_ip = ip;
        });
    }

    pub fn set_stuck_in_restart(&self, uuid: &str, stuck: bool) {
        self.with_latest(uuid, |ms| ms.stuck_in_restart = stuck);
    }

    pub fn clear_rebuild(&self, uuid: &str) {
        self.with_latest(uuid, |ms| ms.rebuild = false);
    }
}

/// Holds a microservice's `updating` flag for as long as it lives.
pub struct UpdatingGuard {
    store: Arc<DesiredStateStore>,
    uuid: String,
}

impl UpdatingGuard {
    pub fn acquire(store: Arc<DesiredStateStore>, uuid: &str) -> Self {
        store.set_updating(uuid, true);
        UpdatingGuard {
            store,
            uuid: uuid.to_string(),
        }
    }
}

impl Drop for UpdatingGuard {
    fn drop(&mut self) {
        self.store.set_updating(&self.uuid, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn microservice(uuid: &str) -> Microservice {
        Microservice {
            uuid: uuid.to_string(),
            image: "nginx:1.25".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn readers_get_copies() {
        let store = DesiredStateStore::new();
        store.set_latest_microservices(vec![microservice("a")]);

        let mut snapshot = store.get_latest_microservices();
        snapshot[0].image = "changed".to_string();
        snapshot.push(microservice("b"));

        let latest = store.get_latest_microservices();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].image, "nginx:1.25");
    }

    #[test]
    fn set_replaces_whole_collection() {
        let store = DesiredStateStore::new();
        store.set_latest_microservices(vec![microservice("a"), microservice("b")]);
        store.set_latest_microservices(vec![microservice("c")]);

        assert!(store.find_latest_microservice_by_uuid("a").is_none());
        assert!(store.find_latest_microservice_by_uuid("c").is_some());
    }

    #[test]
    fn registry_lookup_and_clear() {
        let store = DesiredStateStore::new();
        store.set_registries(vec![Registry {
            id: 2,
            url: "registry.example.com".to_string(),
            ..Default::default()
        }]);
        store.set_current_microservices(vec![microservice("a")]);
        store.set_routes(HashMap::from([(
            "a".to_string(),
            Route {
                producer: "a".to_string(),
                receivers: vec!["b".to_string()],
            },
        )]));
        store.set_configs(HashMap::from([("a".to_string(), "{}".to_string())]));
        assert_eq!(store.get_routes().len(), 1);
        assert_eq!(store.get_configs().get("a").map(String::as_str), Some("{}"));

        assert_eq!(store.get_registry(2).map(|r| r.url), Some("registry.example.com".to_string()));
        assert!(store.get_registry(3).is_none());

        store.clear();
        assert!(store.get_registry(2).is_none());
        assert!(store.get_current_microservices().is_empty());
        assert!(store.get_routes().is_empty());
    }

    #[test]
    fn equality_is_by_uuid() {
        let mut other = microservice("a");
        other.image = "redis".to_string();
        assert_eq!(microservice("a"), other);
        assert_ne!(microservice("a"), microservice("b"));
    }

    #[test]
    fn replace_keeps_runtime_fields() {
        let store = Arc::new(DesiredStateStore::new());
        store.set_latest_microservices(vec![microservice("a"), microservice("b")]);
        store.set_runtime_fields("a", Some("c1".to_string()), Some("172.17.0.2".to_string()));
        store.set_stuck_in_restart("a", true);
        let guard = UpdatingGuard::acquire(store.clone(), "a");

        let mut refreshed = microservice("a");
        refreshed.image = "nginx:1.26".to_string();
        store.set_latest_microservices(vec![refreshed, microservice("c")]);

        let a = store.find_latest_microservice_by_uuid("a").unwrap();
        assert!(a.updating);
        assert!(a.stuck_in_restart);
        assert_eq!(a.container_id.as_deref(), Some("c1"));
        assert_eq!(a.container_ip.as_deref(), Some("172.17.0.2"));
        assert_eq!(a.image, "nginx:1.26");
        assert!(store.find_latest_microservice_by_uuid("c").is_some_and(|ms| !ms.updating));

        drop(guard);
        assert!(store.find_latest_microservice_by_uuid("a").is_some_and(|ms| !ms.updating));
    }

    #[test]
    fn updating_guard_resets_on_drop() {
        let store = Arc::new(DesiredStateStore::new());
        store.set_latest_microservices(vec![microservice("a")]);

        {
            let _guard = UpdatingGuard::acquire(store.clone(), "a");
            assert!(store.find_latest_microservice_by_uuid("a").is_some_and(|ms| ms.updating));
        }

        assert!(store.find_latest_microservice_by_uuid("a").is_some_and(|ms| !ms.updating));
    }
}
