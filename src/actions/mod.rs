//! CPI methods and their registration with the dispatcher

pub mod disk;
pub mod stemcell;
pub mod vm;
pub mod volume;

pub use disk::{create_disk, delete_disk, get_disks, has_disk, DiskCloudProperties};
pub use stemcell::{create_stemcell, delete_stemcell, StemcellCloudProperties};
pub use vm::{delete_vm, has_vm, set_vm_metadata, VmCloudProperties, VmCreator};
pub use volume::VolumeManager;

use crate::config::{AgentConfig, ReconcilerConfig};
use crate::cpi::{DiskHandle, Dispatcher, Environment, Metadata, Networks, StemcellCid, VmHandle};
use crate::k8s::ClientProvider;
use crate::{CpiError, Result};
use serde_json::Value;
use std::sync::Arc;

/// Treats a missing object as already handled.
pub(crate) fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// A dispatcher with every CPI method registered against `provider`.
pub fn dispatcher(
    provider: Arc<dyn ClientProvider>,
    agent_config: AgentConfig,
    reconciler: ReconcilerConfig,
) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    // Stemcells
    dispatcher
        .register("create_stemcell", create_stemcell)
        .register("delete_stemcell", delete_stemcell);

    // VMs
    let creator = Arc::new(VmCreator::new(agent_config, provider.clone()));
    dispatcher.register(
        "create_vm",
        move |agent_id: String,
              stemcell: StemcellCid,
              cloud_properties: VmCloudProperties,
              networks: Networks,
              disk_cids: Option<Vec<DiskHandle>>,
              env: Option<Environment>| {
            let creator = creator.clone();
            async move {
                creator
                    .create(agent_id, stemcell, cloud_properties, networks, disk_cids, env)
                    .await
            }
        },
    );

    let p = provider.clone();
    dispatcher.register("delete_vm", move |handle: VmHandle| {
        let p = p.clone();
        async move { delete_vm(p.as_ref(), handle).await }
    });

    let p = provider.clone();
    dispatcher.register("has_vm", move |handle: VmHandle| {
        let p = p.clone();
        async move { has_vm(p.as_ref(), handle).await }
    });

    let p = provider.clone();
    dispatcher.register(
        "set_vm_metadata",
        move |handle: VmHandle, metadata: Metadata| {
            let p = p.clone();
            async move { set_vm_metadata(p.as_ref(), handle, metadata).await }
        },
    );

    // Disks
    let p = provider.clone();
    dispatcher.register(
        "create_disk",
        move |size_mb: u64, cloud_properties: DiskCloudProperties, handle: Option<VmHandle>| {
            let p = p.clone();
            async move { create_disk(p.as_ref(), size_mb, cloud_properties, handle).await }
        },
    );

    let p = provider.clone();
    dispatcher.register("delete_disk", move |handle: DiskHandle| {
        let p = p.clone();
        async move { delete_disk(p.as_ref(), handle).await }
    });

    let p = provider.clone();
    dispatcher.register("has_disk", move |handle: DiskHandle| {
        let p = p.clone();
        async move { has_disk(p.as_ref(), handle).await }
    });

    let p = provider.clone();
    dispatcher.register("get_disks", move |handle: VmHandle| {
        let p = p.clone();
        async move { get_disks(p.as_ref(), handle).await }
    });

    let volumes = Arc::new(VolumeManager::new(provider, reconciler));
    let v = volumes.clone();
    dispatcher.register("attach_disk", move |vm: VmHandle, disk: DiskHandle| {
        let v = v.clone();
        async move { v.attach_disk(vm, disk).await }
    });

    let v = volumes;
    dispatcher.register("detach_disk", move |vm: VmHandle, disk: DiskHandle| {
        let v = v.clone();
        async move { v.detach_disk(vm, disk).await }
    });

    // Declined
    dispatcher
        .register_variadic("configure_networks", |_args: Vec<Value>| async {
            Some(CpiError::NotSupported)
        })
        .register_variadic("reboot_vm", |_args: Vec<Value>| async {
            Some(CpiError::NotSupported)
        })
        .register_variadic("snapshot_disk", |_args: Vec<Value>| async {
            Some(CpiError::NotImplemented)
        })
        .register_variadic("delete_snapshot", |_args: Vec<Value>| async {
            Some(CpiError::NotImplemented)
        });

    dispatcher
}
