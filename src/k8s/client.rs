use crate::{CpiError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchEvent, WatchParams};
use kube::{Api, Client};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub type PodEventStream = BoxStream<'static, Result<WatchEvent<Pod>>>;

/// Cluster operations scoped to one context and namespace.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    fn context(&self) -> &str;

    fn namespace(&self) -> &str;

    /// Creates the namespace unless it already exists.
    async fn ensure_namespace(&self) -> Result<()>;

    async fn get_pod(&self, name: &str) -> Result<Pod>;

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    async fn delete_pod(&self, name: &str, grace_period_seconds: u32) -> Result<()>;

    async fn patch_pod_labels(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    /// Streams change events for pods matching `selector`, starting after
    /// `resource_version`.
    async fn watch_pods(&self, selector: &str, resource_version: &str) -> Result<PodEventStream>;

    async fn get_config_map(&self, name: &str) -> Result<ConfigMap>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    async fn delete_config_map(&self, name: &str) -> Result<()>;

    async fn create_service(&self, service: &Service) -> Result<Service>;

    async fn list_services(&self, selector: &str) -> Result<Vec<Service>>;

    async fn delete_service(&self, name: &str) -> Result<()>;

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;

    async fn get_claim(&self, name: &str) -> Result<PersistentVolumeClaim>;

    async fn list_claims(&self, selector: &str) -> Result<Vec<PersistentVolumeClaim>>;

    async fn delete_claim(&self, name: &str) -> Result<()>;
}

fn map_kube_error(e: kube::Error, kind: &'static str, name: &str, action: &str) -> CpiError {
    match e {
        kube::Error::Api(ref resp) if resp.code == 404 => CpiError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(ref resp) if resp.code == 409 => CpiError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        e => CpiError::KubernetesError(format!("Failed to {} {} {}: {}", action, kind, name, e)),
    }
}

fn object_name(metadata: &ObjectMeta) -> &str {
    metadata.name.as_deref().unwrap_or_default()
}

/// [`ClusterClient`] backed by the Kubernetes API.
pub struct K8sClient {
    client: Client,
    context: String,
    namespace: String,
}

impl K8sClient {
    pub fn new(client: Client, context: String, namespace: String) -> Self {
        Self {
            client,
            context,
            namespace,
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn claims(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn delete_params(grace_period_seconds: u32) -> DeleteParams {
    DeleteParams::default().grace_period(grace_period_seconds)
}

#[async_trait]
impl ClusterClient for K8sClient {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn ensure_namespace(&self) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        if namespaces.get_opt(&self.namespace).await.ok().flatten().is_some() {
            return Ok(());
        }

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!("Created namespace {}", self.namespace);
                Ok(())
            }
            Err(e) => match map_kube_error(e, "namespace", &self.namespace, "create") {
                CpiError::AlreadyExists { .. } => Ok(()),
                e => Err(e),
            },
        }
    }

    async fn get_pod(&self, name: &str) -> Result<Pod> {
        self.pods()
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, "pod", name, "get"))
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>> {
        let list = self
            .pods()
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| map_kube_error(e, "pod", selector, "list"))?;

        Ok(list.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let name = object_name(&pod.metadata);
        debug!("Creating pod {}/{}", self.namespace, name);

        self.pods()
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| map_kube_error(e, "pod", name, "create"))
    }

    async fn delete_pod(&self, name: &str, grace_period_seconds: u32) -> Result<()> {
        debug!("Deleting pod {}/{}", self.namespace, name);

        self.pods()
            .delete(name, &delete_params(grace_period_seconds))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "pod", name, "delete"))
    }

    async fn patch_pod_labels(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let patch = Patch::Merge(json!({ "metadata": { "labels": labels } }));

        self.pods()
            .patch(name, &PatchParams::default(), &patch)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "pod", name, "patch"))
    }

    async fn watch_pods(&self, selector: &str, resource_version: &str) -> Result<PodEventStream> {
        let params = WatchParams::default().labels(selector).disable_bookmarks();
        let selector_owned = selector.to_string();

        let stream = self
            .pods()
            .watch(&params, resource_version)
            .await
            .map_err(|e| map_kube_error(e, "pod", selector, "watch"))?;

        Ok(stream
            .map(move |event| event.map_err(|e| map_kube_error(e, "pod", &selector_owned, "watch")))
            .boxed())
    }

    async fn get_config_map(&self, name: &str) -> Result<ConfigMap> {
        self.config_maps()
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, "config map", name, "get"))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let name = object_name(&config_map.metadata);

        self.config_maps()
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| map_kube_error(e, "config map", name, "create"))
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let name = object_name(&config_map.metadata);

        self.config_maps()
            .replace(name, &PostParams::default(), config_map)
            .await
            .map_err(|e| map_kube_error(e, "config map", name, "update"))
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        self.config_maps()
            .delete(name, &delete_params(0))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "config map", name, "delete"))
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let name = object_name(&service.metadata);

        self.services()
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| map_kube_error(e, "service", name, "create"))
    }

    async fn list_services(&self, selector: &str) -> Result<Vec<Service>> {
        let list = self
            .services()
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| map_kube_error(e, "service", selector, "list"))?;

        Ok(list.items)
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        self.services()
            .delete(name, &delete_params(0))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "service", name, "delete"))
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let name = object_name(&claim.metadata);

        self.claims()
            .create(&PostParams::default(), claim)
            .await
            .map_err(|e| map_kube_error(e, "persistent volume claim", name, "create"))
    }

    async fn get_claim(&self, name: &str) -> Result<PersistentVolumeClaim> {
        self.claims()
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, "persistent volume claim", name, "get"))
    }

    async fn list_claims(&self, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let list = self
            .claims()
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| map_kube_error(e, "persistent volume claim", selector, "list"))?;

        Ok(list.items)
    }

    async fn delete_claim(&self, name: &str) -> Result<()> {
        self.claims()
            .delete(name, &delete_params(0))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "persistent volume claim", name, "delete"))
    }
}
