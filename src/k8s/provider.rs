use crate::k8s::client::{ClusterClient, K8sClient};
use crate::{CpiError, Result};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves a context name from a handle or cloud properties to a client.
///
/// An empty context selects the kubeconfig's current context.
#[async_trait]
pub trait ClientProvider: Send + Sync {
    async fn client(&self, context: &str) -> Result<Arc<dyn ClusterClient>>;
}

/// [`ClientProvider`] over a kubeconfig document.
pub struct KubeconfigProvider {
    kubeconfig: Kubeconfig,
}

impl KubeconfigProvider {
    pub fn new(kubeconfig: Kubeconfig) -> Self {
        Self { kubeconfig }
    }

    /// The context name a requested context resolves to.
    pub fn resolve_context(&self, context: &str) -> Result<String> {
        if !context.is_empty() {
            return Ok(context.to_string());
        }

        self.kubeconfig
            .current_context
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CpiError::ConfigError("kubeconfig has no current context".to_string()))
    }
}

#[async_trait]
impl ClientProvider for KubeconfigProvider {
    async fn client(&self, context: &str) -> Result<Arc<dyn ClusterClient>> {
        let context = self.resolve_context(context)?;
        debug!("Initializing Kubernetes client for context {}", context);

        let options = KubeConfigOptions {
            context: Some(context.clone()),
            ..Default::default()
        };

        let config = Config::from_custom_kubeconfig(self.kubeconfig.clone(), &options)
            .await
            .map_err(|e| {
                CpiError::ConfigError(format!("Invalid kubeconfig context {}: {}", context, e))
            })?;

        let namespace = config.default_namespace.clone();

        let client = Client::try_from(config).map_err(|e| {
            CpiError::KubernetesError(format!("Failed to create K8s client: {}", e))
        })?;

        info!("Using context {} in namespace {}", context, namespace);

        let client: Arc<dyn ClusterClient> = Arc::new(K8sClient::new(client, context, namespace));
        Ok(client)
    }
}
