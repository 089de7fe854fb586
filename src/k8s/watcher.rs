use crate::k8s::client::ClusterClient;
use crate::k8s::types::is_agent_ready;
use crate::{CpiError, Result};
use futures::StreamExt;
use kube::api::WatchEvent;
use std::time::Duration;
use tracing::{debug, info};

/// Waits for a recreated workload to report ready.
pub struct PodWatcher<'a> {
    client: &'a dyn ClusterClient,
    timeout: Duration,
}

impl<'a> PodWatcher<'a> {
    pub fn new(client: &'a dyn ClusterClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Watches pods matching `selector` from `resource_version` until one
    /// is ready or the timeout elapses.
    ///
    /// Only `Modified` events are expected for a pod that already exists;
    /// any other event type is a protocol violation and ends the wait with
    /// an error. The watch stream and the timer are both dropped on every
    /// return path.
    pub async fn wait_until_ready(&self, selector: &str, resource_version: &str) -> Result<()> {
        info!("Waiting up to {:?} for pods matching {}", self.timeout, selector);

        let timer = tokio::time::sleep(self.timeout);
        tokio::pin!(timer);

        let mut stream = tokio::select! {
            stream = self.client.watch_pods(selector, resource_version) => stream?,
            _ = &mut timer => return Err(CpiError::PodReadyTimeout),
        };

        loop {
            tokio::select! {
                event = stream.next() => match event {
                    Some(Ok(WatchEvent::Modified(pod))) => {
                        if is_agent_ready(&pod) {
                            info!("Pod {} is ready", pod.metadata.name.as_deref().unwrap_or("unknown"));
                            return Ok(());
                        }
                        debug!("Pod modified but not ready yet");
                    }
                    Some(Ok(WatchEvent::Added(_))) => {
                        return Err(CpiError::UnexpectedWatchEvent("ADDED".to_string()));
                    }
                    Some(Ok(WatchEvent::Deleted(_))) => {
                        return Err(CpiError::UnexpectedWatchEvent("DELETED".to_string()));
                    }
                    Some(Ok(WatchEvent::Bookmark(_))) => {
                        return Err(CpiError::UnexpectedWatchEvent("BOOKMARK".to_string()));
                    }
                    Some(Ok(WatchEvent::Error(e))) => {
                        return Err(CpiError::KubernetesError(format!("Pod watch failed: {}", e.message)));
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(CpiError::KubernetesError("Pod watch ended before the pod was ready".to_string()));
                    }
                },
                _ = &mut timer => {
                    return Err(CpiError::PodReadyTimeout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::FakeCluster;
    use crate::k8s::types::MAIN_CONTAINER;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStatus, Pod, PodStatus,
    };
    use kube::core::ErrorResponse;

    fn pod(phase: &str, ready: bool) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: MAIN_CONTAINER.to_string(),
                    ready,
                    state: Some(ContainerState {
                        running: Some(ContainerStateRunning::default()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_ready_after_modified_events() {
        let cluster = FakeCluster::new("ctx", "bosh");
        cluster.state().watch_events = vec![
            WatchEvent::Modified(pod("Pending", false)),
            WatchEvent::Modified(pod("Running", false)),
            WatchEvent::Modified(pod("Running", true)),
        ];

        PodWatcher::new(cluster.as_ref(), TIMEOUT)
            .wait_until_ready("app=x", "7")
            .await
            .expect("pod should become ready");

        assert_eq!(
            cluster.state().watch_requests,
            vec![("app=x".to_string(), "7".to_string())]
        );
        assert_eq!(cluster.open_watches(), 0);
    }

    #[tokio::test]
    async fn test_timeout_when_never_ready() {
        let cluster = FakeCluster::new("ctx", "bosh");
        cluster.state().watch_events = vec![WatchEvent::Modified(pod("Pending", false))];

        let err = PodWatcher::new(cluster.as_ref(), TIMEOUT)
            .wait_until_ready("app=x", "1")
            .await
            .expect_err("wait should time out");

        assert!(matches!(err, CpiError::PodReadyTimeout));
        assert_eq!(cluster.open_watches(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_event_type_is_fatal() {
        let cluster = FakeCluster::new("ctx", "bosh");
        cluster.state().watch_events = vec![
            WatchEvent::Deleted(pod("Running", true)),
            WatchEvent::Modified(pod("Running", true)),
        ];

        let err = PodWatcher::new(cluster.as_ref(), TIMEOUT)
            .wait_until_ready("app=x", "1")
            .await
            .expect_err("wait should fail");

        assert_eq!(err.to_string(), "Unexpected pod watch event: DELETED");
        assert_eq!(cluster.open_watches(), 0);
    }

    #[tokio::test]
    async fn test_error_event_is_surfaced() {
        let cluster = FakeCluster::new("ctx", "bosh");
        cluster.state().watch_events = vec![WatchEvent::Error(ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version".to_string(),
            reason: "Expired".to_string(),
            code: 410,
        })];

        let err = PodWatcher::new(cluster.as_ref(), TIMEOUT)
            .wait_until_ready("app=x", "1")
            .await
            .expect_err("wait should fail");

        assert!(err.to_string().contains("too old resource version"));
    }

    #[tokio::test]
    async fn test_watch_start_failure() {
        let cluster = FakeCluster::new("ctx", "bosh");
        cluster.fail("watch_pods", "no watch for you");

        let err = PodWatcher::new(cluster.as_ref(), TIMEOUT)
            .wait_until_ready("app=x", "1")
            .await
            .expect_err("wait should fail");

        assert_eq!(err.to_string(), "Kubernetes error: no watch for you");
        assert_eq!(cluster.open_watches(), 0);
    }
}
