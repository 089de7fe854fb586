//! Opaque resource handles exchanged with the director
//!
//! Handles are encoded as `<context>:<local-id>` and split on the first
//! separator only, so the local id may itself contain `:`. Parsing is
//! lenient: a string without a separator is taken as a bare context with an
//! empty id.

use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: char = ':';

fn split(handle: &str) -> (String, String) {
    match handle.split_once(SEPARATOR) {
        Some((context, id)) => (context.to_string(), id.to_string()),
        None => (handle.to_string(), String::new()),
    }
}

/// Identifies one workload: a pod, its settings document and its services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct VmHandle {
    pub context: String,
    pub agent_id: String,
}

impl VmHandle {
    pub fn new(context: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            agent_id: agent_id.into(),
        }
    }

    pub fn parse(handle: &str) -> Self {
        let (context, agent_id) = split(handle);
        Self { context, agent_id }
    }
}

impl From<String> for VmHandle {
    fn from(handle: String) -> Self {
        Self::parse(&handle)
    }
}

impl From<VmHandle> for String {
    fn from(handle: VmHandle) -> Self {
        handle.to_string()
    }
}

impl fmt::Display for VmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.context, SEPARATOR, self.agent_id)
    }
}

/// Identifies one persistent volume claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DiskHandle {
    pub context: String,
    pub disk_id: String,
}

impl DiskHandle {
    pub fn new(context: impl Into<String>, disk_id: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            disk_id: disk_id.into(),
        }
    }

    pub fn parse(handle: &str) -> Self {
        let (context, disk_id) = split(handle);
        Self { context, disk_id }
    }
}

impl From<String> for DiskHandle {
    fn from(handle: String) -> Self {
        Self::parse(&handle)
    }
}

impl From<DiskHandle> for String {
    fn from(handle: DiskHandle) -> Self {
        handle.to_string()
    }
}

impl fmt::Display for DiskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.context, SEPARATOR, self.disk_id)
    }
}
