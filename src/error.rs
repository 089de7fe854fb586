use thiserror::Error;

#[derive(Error, Debug)]
pub enum CpiError {
    #[error("Not enough arguments: have {have}, want {want}")]
    NotEnoughArguments { have: usize, want: usize },

    #[error("Too many arguments: have {have}, want {want}")]
    TooManyArguments { have: usize, want: usize },

    #[error("Invalid argument {position}: {source}")]
    InvalidArgument {
        position: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(#[source] serde_json::Error),

    #[error("Unexpected method: {0:?}")]
    UnexpectedMethod(String),

    #[error("Invalid action result: {0}")]
    InvalidResult(#[source] serde_json::Error),

    #[error("Kubernetes disk and resource pool contexts must be the same: disk: {disk:?}, resource pool: {vm:?}")]
    ContextMismatch { disk: String, vm: String },

    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Invalid instance settings for {name}: {source}")]
    InvalidSettings {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Pod recreate failed with a timeout")]
    PodReadyTimeout,

    #[error("Unexpected pod watch event: {0}")]
    UnexpectedWatchEvent(String),

    #[error("Pod {pod} was deleted but could not be recreated: {source}")]
    PartialRecreate {
        pod: String,
        #[source]
        source: Box<CpiError>,
    },

    #[error("Not supported")]
    NotSupported,

    #[error("Not implemented")]
    NotImplemented,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CpiError {
    /// Classification reported in the `type` field of a response error.
    pub fn error_type(&self) -> &'static str {
        match self {
            CpiError::NotSupported => "Bosh::Clouds::NotSupported",
            CpiError::NotImplemented => "Bosh::Clouds::NotImplemented",
            _ => "Bosh::Clouds::CloudError",
        }
    }

    /// True for failures raised by the dispatcher itself rather than by an action.
    pub fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            CpiError::InvalidRequest(_)
                | CpiError::NotEnoughArguments { .. }
                | CpiError::TooManyArguments { .. }
                | CpiError::InvalidArgument { .. }
                | CpiError::UnexpectedMethod(_)
                | CpiError::InvalidResult(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CpiError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, CpiError>;
