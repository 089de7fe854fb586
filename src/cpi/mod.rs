//! Wire protocol spoken with the director
//!
//! A request is a single JSON document read from stdin:
//! `{"method": "...", "arguments": [...], "context": {"director_uuid": "..."}}`.
//! The response is a single JSON document written to stdout:
//! `{"result": ..., "error": {"type", "message", "ok_to_retry"} | null, "log": ""}`.

pub mod dispatch;
pub mod handle;

pub use dispatch::{Arity, Dispatcher, IntoOutcome, Outcome};
pub use handle::{DiskHandle, VmHandle};

use crate::CpiError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(rename = "arguments", default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub context: RequestContext,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub director_uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub result: Option<Value>,
    pub error: Option<ResponseError>,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub ok_to_retry: bool,
}

impl From<&CpiError> for ResponseError {
    fn from(err: &CpiError) -> Self {
        Self {
            error_type: err.error_type().to_string(),
            message: err.to_string(),
            ok_to_retry: false,
        }
    }
}

/// Network definition as sent by the director in `create_vm`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(rename = "type", default)]
    pub network_type: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub default: Vec<String>,
    #[serde(default)]
    pub cloud_properties: Map<String, Value>,
}

pub type Networks = BTreeMap<String, Network>;

pub type Environment = Map<String, Value>;

pub type Metadata = BTreeMap<String, String>;

pub type StemcellCid = String;

/// Encodes `source` to JSON and decodes it again as `T`.
///
/// Loosely typed values (maps, wire arguments) are coerced into strict types
/// this way; unknown fields are dropped and shape mismatches surface here.
pub fn remarshal<S, T>(source: &S) -> serde_json::Result<T>
where
    S: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let encoded = serde_json::to_vec(source)?;
    serde_json::from_slice(&encoded)
}
