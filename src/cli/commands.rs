use crate::actions;
use crate::cli::Cli;
use crate::config::{load_agent_config, load_kubeconfig};
use crate::cpi::{Dispatcher, Request, Response};
use crate::k8s::{ClientProvider, KubeconfigProvider};
use crate::{CpiError, Result};
use std::sync::Arc;
use tracing::info;

/// Loads both configuration documents and registers every action.
pub fn build_dispatcher(cli: &Cli) -> Result<Dispatcher> {
    let kubeconfig = load_kubeconfig(&cli.kube_config)?;
    let agent_config = load_agent_config(&cli.agent_config)?;

    let provider: Arc<dyn ClientProvider> = Arc::new(KubeconfigProvider::new(kubeconfig));

    Ok(actions::dispatcher(
        provider,
        agent_config,
        cli.reconciler_config(),
    ))
}

/// Decodes one request document and dispatches it.
///
/// An `Err` means no response document can be produced; action failures
/// come back inside the response.
pub async fn handle_request(dispatcher: &Dispatcher, payload: &str) -> Result<Response> {
    let request: Request = serde_json::from_str(payload).map_err(CpiError::InvalidRequest)?;

    info!(
        "Handling {} for director {}",
        request.method, request.context.director_uuid
    );

    dispatcher.dispatch(request).await
}
