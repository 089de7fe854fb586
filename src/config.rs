//! Configuration files handed to the CPI by the director's job
//!
//! Both documents are read with `serde_yaml`, so either YAML or JSON works.

use crate::{CpiError, Result};
use kube::config::Kubeconfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_POD_READY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POST_RECREATE_DELAY: Duration = Duration::from_secs(5);

/// Agent settings shared by every VM this CPI creates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blobstore: Option<Value>,

    #[serde(rename = "mbus", default)]
    pub message_bus: String,

    #[serde(rename = "ntp", default, skip_serializing_if = "Vec::is_empty")]
    pub ntp_servers: Vec<String>,
}

/// Timing knobs for the pod recreate performed by attach and detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub pod_ready_timeout: Duration,
    pub post_recreate_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pod_ready_timeout: DEFAULT_POD_READY_TIMEOUT,
            post_recreate_delay: DEFAULT_POST_RECREATE_DELAY,
        }
    }
}

fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Loading configuration from {}", path.display());

    let contents = std::fs::read_to_string(path)?;

    serde_yaml::from_str(&contents).map_err(|e| {
        CpiError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
    })
}

pub fn load_agent_config(path: &Path) -> Result<AgentConfig> {
    load_document(path)
}

pub fn load_kubeconfig(path: &Path) -> Result<Kubeconfig> {
    load_document(path)
}
