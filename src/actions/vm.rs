use crate::actions::ignore_not_found;
use crate::agent::Settings;
use crate::config::AgentConfig;
use crate::cpi::{DiskHandle, Environment, Metadata, Networks, StemcellCid, VmHandle};
use crate::k8s::types::{
    agent_labels, agent_name, agent_pod, agent_selector, is_qualified_name, is_valid_label_value,
    settings_config_map, LABEL_PREFIX,
};
use crate::k8s::{ClientProvider, ClusterClient};
use crate::{CpiError, Result};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmCloudProperties {
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceDefinition>,
}

/// A service fronting the workload, requested through cloud properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(default)]
    pub cluster_ip: String,
    #[serde(default)]
    pub ports: Vec<PortDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub node_port: i32,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub protocol: String,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Only `NodePort` is honored; anything else becomes a `ClusterIP` service.
fn agent_service(namespace: &str, agent_id: &str, definition: &ServiceDefinition) -> Service {
    let service_type = if definition.service_type == "NodePort" {
        "NodePort"
    } else {
        "ClusterIP"
    };

    let ports = definition
        .ports
        .iter()
        .map(|p| ServicePort {
            name: non_empty(&p.name),
            protocol: non_empty(&p.protocol),
            port: p.port,
            node_port: (p.node_port != 0).then_some(p.node_port),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(definition.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(agent_labels(agent_id)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            cluster_ip: non_empty(&definition.cluster_ip),
            ports: Some(ports),
            selector: Some(agent_labels(agent_id)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub struct VmCreator {
    agent_config: AgentConfig,
    provider: Arc<dyn ClientProvider>,
}

impl VmCreator {
    pub fn new(agent_config: AgentConfig, provider: Arc<dyn ClientProvider>) -> Self {
        Self {
            agent_config,
            provider,
        }
    }

    /// Creates the settings config map, requested services and the pod, in
    /// that order. Nothing is cleaned up if a later step fails.
    pub async fn create(
        &self,
        agent_id: String,
        stemcell: StemcellCid,
        cloud_properties: VmCloudProperties,
        networks: Networks,
        disk_cids: Option<Vec<DiskHandle>>,
        env: Option<Environment>,
    ) -> Result<VmHandle> {
        let client = self.provider.client(&cloud_properties.context).await?;
        let namespace = client.namespace().to_string();

        info!("Creating VM {} in {}/{}", agent_id, client.context(), namespace);
        if let Some(disks) = disk_cids.filter(|d| !d.is_empty()) {
            debug!("Ignoring {} disk locality hint(s)", disks.len());
        }

        client.ensure_namespace().await?;

        let settings = Settings::for_agent(
            &agent_id,
            &self.agent_config,
            &networks,
            env.unwrap_or_default(),
        )
        .and_then(|s| s.to_json())
        .map_err(|source| CpiError::InvalidSettings {
            name: agent_name(&agent_id),
            source,
        })?;

        client
            .create_config_map(&settings_config_map(&namespace, &agent_id, settings))
            .await?;

        for definition in &cloud_properties.services {
            debug!("Creating service {}", definition.name);
            client
                .create_service(&agent_service(&namespace, &agent_id, definition))
                .await?;
        }

        client
            .create_pod(&agent_pod(&namespace, &agent_id, &stemcell))
            .await?;

        Ok(VmHandle::new(client.context(), agent_id))
    }
}

/// Deletes the pod, every service labelled for the agent, and the settings
/// config map. Objects already gone are not an error.
pub async fn delete_vm(provider: &dyn ClientProvider, vm: VmHandle) -> Result<()> {
    let client = provider.client(&vm.context).await?;
    let name = agent_name(&vm.agent_id);

    info!("Deleting VM {}", vm);

    ignore_not_found(client.delete_pod(&name, 0).await)?;
    delete_services(client.as_ref(), &vm.agent_id).await?;
    ignore_not_found(client.delete_config_map(&name).await)?;

    Ok(())
}

async fn delete_services(client: &dyn ClusterClient, agent_id: &str) -> Result<()> {
    for service in client.list_services(&agent_selector(agent_id)).await? {
        if let Some(name) = service.metadata.name {
            ignore_not_found(client.delete_service(&name).await)?;
        }
    }
    Ok(())
}

pub async fn has_vm(provider: &dyn ClientProvider, vm: VmHandle) -> Result<bool> {
    let client = provider.client(&vm.context).await?;
    let pods = client.list_pods(&agent_selector(&vm.agent_id)).await?;
    Ok(!pods.is_empty())
}

/// Labels the pod with the metadata entries that form valid labels once
/// prefixed. Invalid entries are dropped silently.
pub async fn set_vm_metadata(
    provider: &dyn ClientProvider,
    vm: VmHandle,
    metadata: Metadata,
) -> Result<()> {
    let client = provider.client(&vm.context).await?;
    let name = agent_name(&vm.agent_id);

    client.get_pod(&name).await?;

    let labels = metadata_labels(&metadata);
    if labels.is_empty() {
        debug!("No valid labels in metadata for {}", vm);
        return Ok(());
    }

    client.patch_pod_labels(&name, &labels).await
}

fn metadata_labels(metadata: &Metadata) -> BTreeMap<String, String> {
    metadata
        .iter()
        .map(|(k, v)| (format!("{}{}", LABEL_PREFIX, k.to_lowercase()), v))
        .filter(|(k, v)| is_qualified_name(k) && is_valid_label_value(v))
        .map(|(k, v)| (k, v.clone()))
        .collect()
}
