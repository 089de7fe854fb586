//! Attaching and detaching persistent disks
//!
//! Volumes cannot be added to a running pod, so both operations rebuild the
//! pod spec and replace the pod: persist the settings document, delete the
//! pod, create it again with the new volume list, then wait for the main
//! container to come back. Nothing is rolled back if a step fails; settings
//! are written first so they always hold the desired disk topology.

use crate::agent::{disk_mount_path, Settings};
use crate::config::ReconcilerConfig;
use crate::cpi::{DiskHandle, VmHandle};
use crate::k8s::types::{agent_name, agent_selector, disk_name, MAIN_CONTAINER, SETTINGS_KEY};
use crate::k8s::{ClientProvider, ClusterClient, PodWatcher};
use crate::{CpiError, Result};
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Remove,
}

pub struct VolumeManager {
    provider: Arc<dyn ClientProvider>,
    config: ReconcilerConfig,
}

impl VolumeManager {
    pub fn new(provider: Arc<dyn ClientProvider>, config: ReconcilerConfig) -> Self {
        Self { provider, config }
    }

    pub async fn attach_disk(&self, vm: VmHandle, disk: DiskHandle) -> Result<()> {
        self.recreate_pod(Operation::Add, &vm, &disk).await
    }

    pub async fn detach_disk(&self, vm: VmHandle, disk: DiskHandle) -> Result<()> {
        self.recreate_pod(Operation::Remove, &vm, &disk).await
    }

    async fn recreate_pod(&self, op: Operation, vm: &VmHandle, disk: &DiskHandle) -> Result<()> {
        if disk.context != vm.context {
            return Err(CpiError::ContextMismatch {
                disk: disk.context.clone(),
                vm: vm.context.clone(),
            });
        }

        info!("{:?} disk {} on VM {}", op, disk, vm);

        let client = self.provider.client(&disk.context).await?;
        let name = agent_name(&vm.agent_id);

        let pod = client.get_pod(&name).await?;
        let mut config_map = client.get_config_map(&name).await?;
        let mut settings = read_settings(&config_map, &name)?;

        // Keyed by the resolved context, like the handle create_disk returns.
        let handle = DiskHandle::new(client.context(), &disk.disk_id);
        match op {
            Operation::Add => settings.attach_persistent_disk(&handle),
            Operation::Remove => settings.detach_persistent_disk(&handle),
        }

        write_settings(&mut config_map, &settings, &name)?;
        client.replace_config_map(&config_map).await?;
        debug!("Persisted settings for {}", name);

        let replacement = rebuild_pod(op, pod, &disk.disk_id);

        client.delete_pod(&name, 0).await?;
        debug!("Deleted pod {}", name);

        let created = client
            .create_pod(&replacement)
            .await
            .map_err(|e| CpiError::PartialRecreate {
                pod: name.clone(),
                source: Box::new(e),
            })?;
        debug!("Recreated pod {}", name);

        let resource_version = created.metadata.resource_version.unwrap_or_default();
        self.wait_for_pod(client.as_ref(), &vm.agent_id, &resource_version)
            .await?;

        // Container readiness precedes agent readiness inside the guest.
        tokio::time::sleep(self.config.post_recreate_delay).await;

        info!("Pod {} recreated with updated disks", name);
        Ok(())
    }

    async fn wait_for_pod(
        &self,
        client: &dyn ClusterClient,
        agent_id: &str,
        resource_version: &str,
    ) -> Result<()> {
        PodWatcher::new(client, self.config.pod_ready_timeout)
            .wait_until_ready(&agent_selector(agent_id), resource_version)
            .await
    }
}

fn read_settings(config_map: &ConfigMap, name: &str) -> Result<Settings> {
    let data = config_map
        .data
        .as_ref()
        .and_then(|d| d.get(SETTINGS_KEY))
        .map(String::as_str)
        .unwrap_or_default();

    Settings::from_json(data).map_err(|source| CpiError::InvalidSettings {
        name: name.to_string(),
        source,
    })
}

fn write_settings(config_map: &mut ConfigMap, settings: &Settings, name: &str) -> Result<()> {
    let encoded = settings
        .to_json()
        .map_err(|source| CpiError::InvalidSettings {
            name: name.to_string(),
            source,
        })?;

    config_map
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(SETTINGS_KEY.to_string(), encoded);
    Ok(())
}

/// The pod to submit in place of `pod`: the spec with the disk volume
/// added or removed, identity metadata only, and no status.
pub fn rebuild_pod(op: Operation, pod: Pod, disk_id: &str) -> Pod {
    let mut spec = pod.spec.unwrap_or_default();
    match op {
        Operation::Add => add_disk_volume(&mut spec, disk_id),
        Operation::Remove => remove_disk_volume(&mut spec, disk_id),
    }

    Pod {
        metadata: ObjectMeta {
            name: pod.metadata.name,
            namespace: pod.metadata.namespace,
            labels: pod.metadata.labels,
            annotations: pod.metadata.annotations,
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    }
}

fn add_disk_volume(spec: &mut PodSpec, disk_id: &str) {
    let volume_name = disk_name(disk_id);

    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    if !volumes.iter().any(|v| v.name == volume_name) {
        volumes.push(Volume {
            name: volume_name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: disk_name(disk_id),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if let Some(container) = spec.containers.iter_mut().find(|c| c.name == MAIN_CONTAINER) {
        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        if !mounts.iter().any(|m| m.name == volume_name) {
            mounts.push(VolumeMount {
                name: volume_name,
                mount_path: disk_mount_path(disk_id),
                ..Default::default()
            });
        }
    }
}

fn remove_disk_volume(spec: &mut PodSpec, disk_id: &str) {
    let volume_name = disk_name(disk_id);

    if let Some(volumes) = spec.volumes.as_mut() {
        volumes.retain(|v| v.name != volume_name);
    }

    if let Some(container) = spec.containers.iter_mut().find(|c| c.name == MAIN_CONTAINER) {
        if let Some(mounts) = container.volume_mounts.as_mut() {
            mounts.retain(|m| m.name != volume_name);
        }
    }
}
