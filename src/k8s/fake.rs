//! In-memory cluster used by unit tests
//!
//! Every call is appended to an ordered log so tests can assert which
//! operations ran and in what order. Failures are injected per operation.

use crate::k8s::client::{ClusterClient, PodEventStream};
use crate::k8s::provider::ClientProvider;
use crate::{CpiError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::WatchEvent;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
pub struct FakeState {
    pub calls: Vec<String>,
    pub namespace_exists: bool,
    pub pods: BTreeMap<String, Pod>,
    pub config_maps: BTreeMap<String, ConfigMap>,
    pub services: BTreeMap<String, Service>,
    pub claims: BTreeMap<String, PersistentVolumeClaim>,
    pub created_pods: Vec<Pod>,
    pub label_patches: Vec<(String, BTreeMap<String, String>)>,
    pub watch_requests: Vec<(String, String)>,
    /// Events delivered, in order, by the next watch. The stream then stays
    /// open without further events.
    pub watch_events: Vec<WatchEvent<Pod>>,
    /// Operation name to error message.
    pub failures: HashMap<&'static str, String>,
    resource_version: u64,
}

pub struct FakeCluster {
    context: String,
    namespace: String,
    state: Mutex<FakeState>,
    open_watches: Arc<AtomicUsize>,
}

struct WatchGuard(Arc<AtomicUsize>);

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn matches_selector(metadata: &ObjectMeta, selector: &str) -> bool {
    let (key, value) = selector.split_once('=').unwrap_or((selector, ""));
    metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(|v| v == value)
        .unwrap_or(false)
}

fn name_of(metadata: &ObjectMeta) -> String {
    metadata.name.clone().unwrap_or_default()
}

impl FakeCluster {
    pub fn new(context: &str, namespace: &str) -> Arc<Self> {
        Arc::new(Self {
            context: context.to_string(),
            namespace: namespace.to_string(),
            state: Mutex::new(FakeState::default()),
            open_watches: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake cluster state poisoned")
    }

    pub fn fail(&self, operation: &'static str, message: &str) {
        self.state().failures.insert(operation, message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn open_watches(&self) -> usize {
        self.open_watches.load(Ordering::SeqCst)
    }

    /// Records the call and returns the injected failure, if any.
    fn record(&self, operation: &'static str, target: &str) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.state();
        state.calls.push(format!("{} {}", operation, target));
        if let Some(message) = state.failures.get(operation).cloned() {
            return Err(CpiError::KubernetesError(message));
        }
        Ok(state)
    }

    fn not_found(kind: &'static str, name: &str) -> CpiError {
        CpiError::NotFound {
            kind,
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn ensure_namespace(&self) -> Result<()> {
        let mut state = self.record("ensure_namespace", &self.namespace)?;
        state.namespace_exists = true;
        Ok(())
    }

    async fn get_pod(&self, name: &str) -> Result<Pod> {
        let state = self.record("get_pod", name)?;
        state
            .pods
            .get(name)
            .cloned()
            .ok_or_else(|| Self::not_found("pod", name))
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>> {
        let state = self.record("list_pods", selector)?;
        Ok(state
            .pods
            .values()
            .filter(|p| matches_selector(&p.metadata, selector))
            .cloned()
            .collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let name = name_of(&pod.metadata);
        let mut state = self.record("create_pod", &name)?;
        if state.pods.contains_key(&name) {
            return Err(CpiError::AlreadyExists { kind: "pod", name });
        }

        state.created_pods.push(pod.clone());
        state.resource_version += 1;

        let mut created = pod.clone();
        created.metadata.resource_version = Some(state.resource_version.to_string());
        state.pods.insert(name, created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, name: &str, grace_period_seconds: u32) -> Result<()> {
        let mut state = self.record("delete_pod", &format!("{} grace={}", name, grace_period_seconds))?;
        state
            .pods
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("pod", name))
    }

    async fn patch_pod_labels(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.record("patch_pod_labels", name)?;
        let pod = state
            .pods
            .get_mut(name)
            .ok_or_else(|| Self::not_found("pod", name))?;
        pod.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
        state.label_patches.push((name.to_string(), labels.clone()));
        Ok(())
    }

    async fn watch_pods(&self, selector: &str, resource_version: &str) -> Result<PodEventStream> {
        let mut state = self.record("watch_pods", selector)?;
        state
            .watch_requests
            .push((selector.to_string(), resource_version.to_string()));

        let events: Vec<Result<WatchEvent<Pod>>> =
            std::mem::take(&mut state.watch_events).into_iter().map(Ok).collect();

        self.open_watches.fetch_add(1, Ordering::SeqCst);
        let guard = WatchGuard(self.open_watches.clone());

        Ok(stream::iter(events)
            .chain(stream::pending())
            .map(move |event| {
                let _held = &guard;
                event
            })
            .boxed())
    }

    async fn get_config_map(&self, name: &str) -> Result<ConfigMap> {
        let state = self.record("get_config_map", name)?;
        state
            .config_maps
            .get(name)
            .cloned()
            .ok_or_else(|| Self::not_found("config map", name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let name = name_of(&config_map.metadata);
        let mut state = self.record("create_config_map", &name)?;
        state.config_maps.insert(name, config_map.clone());
        Ok(config_map.clone())
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let name = name_of(&config_map.metadata);
        let mut state = self.record("replace_config_map", &name)?;
        if !state.config_maps.contains_key(&name) {
            return Err(Self::not_found("config map", &name));
        }
        state.config_maps.insert(name, config_map.clone());
        Ok(config_map.clone())
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        let mut state = self.record("delete_config_map", name)?;
        state
            .config_maps
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("config map", name))
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let name = name_of(&service.metadata);
        let mut state = self.record("create_service", &name)?;
        state.services.insert(name, service.clone());
        Ok(service.clone())
    }

    async fn list_services(&self, selector: &str) -> Result<Vec<Service>> {
        let state = self.record("list_services", selector)?;
        Ok(state
            .services
            .values()
            .filter(|s| matches_selector(&s.metadata, selector))
            .cloned()
            .collect())
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        let mut state = self.record("delete_service", name)?;
        state
            .services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("service", name))
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let name = name_of(&claim.metadata);
        let mut state = self.record("create_claim", &name)?;
        state.claims.insert(name, claim.clone());
        Ok(claim.clone())
    }

    async fn get_claim(&self, name: &str) -> Result<PersistentVolumeClaim> {
        let state = self.record("get_claim", name)?;
        state
            .claims
            .get(name)
            .cloned()
            .ok_or_else(|| Self::not_found("persistent volume claim", name))
    }

    async fn list_claims(&self, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let state = self.record("list_claims", selector)?;
        Ok(state
            .claims
            .values()
            .filter(|c| matches_selector(&c.metadata, selector))
            .cloned()
            .collect())
    }

    async fn delete_claim(&self, name: &str) -> Result<()> {
        let mut state = self.record("delete_claim", name)?;
        state
            .claims
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("persistent volume claim", name))
    }
}

/// Hands out one shared [`FakeCluster`] and records requested contexts.
pub struct FakeProvider {
    pub cluster: Arc<FakeCluster>,
    requested: Mutex<Vec<String>>,
    error: Option<String>,
}

impl FakeProvider {
    pub fn new(cluster: Arc<FakeCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            requested: Mutex::new(Vec::new()),
            error: None,
        })
    }

    pub fn failing(cluster: Arc<FakeCluster>, message: &str) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            requested: Mutex::new(Vec::new()),
            error: Some(message.to_string()),
        })
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().expect("fake provider poisoned").clone()
    }
}

#[async_trait]
impl ClientProvider for FakeProvider {
    async fn client(&self, context: &str) -> Result<Arc<dyn ClusterClient>> {
        self.requested
            .lock()
            .expect("fake provider poisoned")
            .push(context.to_string());

        match &self.error {
            Some(message) => Err(CpiError::ConfigError(message.clone())),
            None => {
                let client: Arc<dyn ClusterClient> = self.cluster.clone();
                Ok(client)
            }
        }
    }
}
