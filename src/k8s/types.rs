//! Names, labels and object templates for the cluster objects backing a VM
//! or a disk.

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, KeyToPath,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, PodSpec, ResourceRequirements,
    SecurityContext, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

pub const LABEL_PREFIX: &str = "bosh.cloudfoundry.org/";
pub const AGENT_ID_LABEL: &str = "bosh.cloudfoundry.org/agent-id";
pub const DISK_ID_LABEL: &str = "bosh.cloudfoundry.org/disk-id";

/// Name of the container running the agent and the deployed jobs.
pub const MAIN_CONTAINER: &str = "bosh-job";

/// Config map key holding the serialized agent settings.
pub const SETTINGS_KEY: &str = "instance_settings";

const SETTINGS_VOLUME: &str = "bosh-config";
const SETTINGS_FILE: &str = "instance_settings.json";
const SETTINGS_MOUNT_PATH: &str = "/var/vcap/bosh/instance_settings.json";
const EPHEMERAL_VOLUME: &str = "bosh-ephemeral";
const EPHEMERAL_MOUNT_PATH: &str = "/var/vcap/data";
const AGENT_COMMAND: &str = "/usr/sbin/runsvdir-start";
const AGENT_MEMORY: &str = "1Gi";

/// Pod and config map name for an agent.
pub fn agent_name(agent_id: &str) -> String {
    format!("agent-{}", agent_id)
}

/// Claim name, and volume name on the pod, for a disk.
pub fn disk_name(disk_id: &str) -> String {
    format!("disk-{}", disk_id)
}

pub fn agent_selector(agent_id: &str) -> String {
    format!("{}={}", AGENT_ID_LABEL, agent_id)
}

pub fn disk_selector(disk_id: &str) -> String {
    format!("{}={}", DISK_ID_LABEL, disk_id)
}

pub fn agent_labels(agent_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(AGENT_ID_LABEL.to_string(), agent_id.to_string())])
}

/// Ready means the pod is running and the main container is ready and running.
pub fn is_agent_ready(pod: &Pod) -> bool {
    let status = match &pod.status {
        Some(s) => s,
        None => return false,
    };

    if status.phase.as_deref() != Some("Running") {
        return false;
    }

    status
        .container_statuses
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .find(|cs| cs.name == MAIN_CONTAINER)
        .map(|cs| {
            cs.ready
                && cs
                    .state
                    .as_ref()
                    .map(|s| s.running.is_some())
                    .unwrap_or(false)
        })
        .unwrap_or(false)
}

pub fn settings_config_map(namespace: &str, agent_id: &str, settings_json: String) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(agent_name(agent_id)),
            namespace: Some(namespace.to_string()),
            labels: Some(agent_labels(agent_id)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(SETTINGS_KEY.to_string(), settings_json)])),
        ..Default::default()
    }
}

/// The workload pod: one privileged main container booting the agent from
/// the stemcell image, with the settings document and an ephemeral volume
/// mounted.
pub fn agent_pod(namespace: &str, agent_id: &str, image: &str) -> Pod {
    let memory = BTreeMap::from([("memory".to_string(), Quantity(AGENT_MEMORY.to_string()))]);

    Pod {
        metadata: ObjectMeta {
            name: Some(agent_name(agent_id)),
            namespace: Some(namespace.to_string()),
            labels: Some(agent_labels(agent_id)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(agent_id.to_string()),
            containers: vec![Container {
                name: MAIN_CONTAINER.to_string(),
                image: Some(image.to_string()),
                image_pull_policy: Some("Always".to_string()),
                command: Some(vec![AGENT_COMMAND.to_string()]),
                args: Some(vec![]),
                resources: Some(ResourceRequirements {
                    limits: Some(memory.clone()),
                    requests: Some(memory),
                    ..Default::default()
                }),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    run_as_user: Some(0),
                    ..Default::default()
                }),
                volume_mounts: Some(vec![
                    VolumeMount {
                        name: SETTINGS_VOLUME.to_string(),
                        mount_path: SETTINGS_MOUNT_PATH.to_string(),
                        sub_path: Some(SETTINGS_FILE.to_string()),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: EPHEMERAL_VOLUME.to_string(),
                        mount_path: EPHEMERAL_MOUNT_PATH.to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            volumes: Some(vec![
                Volume {
                    name: SETTINGS_VOLUME.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: Some(agent_name(agent_id)),
                        items: Some(vec![KeyToPath {
                            key: SETTINGS_KEY.to_string(),
                            path: SETTINGS_FILE.to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Volume {
                    name: EPHEMERAL_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// An unattached ReadWriteOnce claim of `size_mb` mebibytes.
pub fn disk_claim(namespace: &str, disk_id: &str, size_mb: u64) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(disk_name(disk_id)),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                DISK_ID_LABEL.to_string(),
                disk_id.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(format!("{}Mi", size_mb)),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

const QUALIFIED_NAME_MAX_LENGTH: usize = 63;
const DNS_SUBDOMAIN_MAX_LENGTH: usize = 253;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// `[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?`, at most 63 characters.
fn is_label_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= QUALIFIED_NAME_MAX_LENGTH
        && name.chars().all(is_name_char)
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric())
}

fn is_dns_subdomain(prefix: &str) -> bool {
    prefix.len() <= DNS_SUBDOMAIN_MAX_LENGTH
        && prefix.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && part.starts_with(|c: char| c.is_ascii_alphanumeric())
                && part.ends_with(|c: char| c.is_ascii_alphanumeric())
        })
}

/// Label key validation: an optional DNS subdomain prefix and a name.
pub fn is_qualified_name(key: &str) -> bool {
    match key.split_once('/') {
        Some((prefix, name)) => is_dns_subdomain(prefix) && is_label_name(name),
        None => is_label_name(key),
    }
}

/// Label values are empty or follow the same rules as a label name.
pub fn is_valid_label_value(value: &str) -> bool {
    value.is_empty() || is_label_name(value)
}
