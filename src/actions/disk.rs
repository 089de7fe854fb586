use crate::actions::ignore_not_found;
use crate::cpi::{DiskHandle, VmHandle};
use crate::k8s::types::{agent_name, disk_claim, disk_name, disk_selector, DISK_ID_LABEL};
use crate::k8s::ClientProvider;
use crate::{CpiError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCloudProperties {
    #[serde(default)]
    pub context: String,
}

/// Creates an unattached claim. Attaching turns it into a pod volume.
///
/// The VM locality hint is accepted but not used for placement.
pub async fn create_disk(
    provider: &dyn ClientProvider,
    size_mb: u64,
    cloud_properties: DiskCloudProperties,
    vm: Option<VmHandle>,
) -> Result<DiskHandle> {
    let disk_id = Uuid::new_v4().to_string();
    let client = provider.client(&cloud_properties.context).await?;

    info!("Creating {}Mi disk {} in {}", size_mb, disk_id, client.context());
    if let Some(vm) = vm {
        debug!("Disk requested near VM {}", vm);
    }

    client
        .create_claim(&disk_claim(client.namespace(), &disk_id, size_mb))
        .await?;

    Ok(DiskHandle::new(client.context(), disk_id))
}

pub async fn delete_disk(provider: &dyn ClientProvider, disk: DiskHandle) -> Result<()> {
    let client = provider.client(&disk.context).await?;

    info!("Deleting disk {}", disk);
    ignore_not_found(client.delete_claim(&disk_name(&disk.disk_id)).await)
}

pub async fn has_disk(provider: &dyn ClientProvider, disk: DiskHandle) -> Result<bool> {
    let client = provider.client(&disk.context).await?;
    let claims = client.list_claims(&disk_selector(&disk.disk_id)).await?;
    Ok(!claims.is_empty())
}

/// Handles of the disks backing the VM's claim volumes.
///
/// A VM that no longer exists has no disks, and volumes whose claim has
/// been deleted are skipped.
pub async fn get_disks(provider: &dyn ClientProvider, vm: VmHandle) -> Result<Vec<DiskHandle>> {
    let client = provider.client(&vm.context).await?;

    let pod = match client.get_pod(&agent_name(&vm.agent_id)).await {
        Ok(pod) => pod,
        Err(CpiError::NotFound { .. }) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let claim_names = pod
        .spec
        .and_then(|spec| spec.volumes)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|volume| volume.persistent_volume_claim)
        .map(|source| source.claim_name);

    let mut disks = Vec::new();
    for claim_name in claim_names {
        let claim = match client.get_claim(&claim_name).await {
            Ok(claim) => claim,
            Err(CpiError::NotFound { .. }) => continue,
            Err(e) => return Err(e),
        };

        if let Some(disk_id) = claim.metadata.labels.and_then(|mut l| l.remove(DISK_ID_LABEL)) {
            disks.push(DiskHandle::new(vm.context.as_str(), disk_id));
        }
    }

    Ok(disks)
}
