pub mod client;
pub mod provider;
pub mod types;
pub mod watcher;

#[cfg(test)]
pub mod fake;

pub use client::{ClusterClient, K8sClient, PodEventStream};
pub use provider::{ClientProvider, KubeconfigProvider};
pub use watcher::PodWatcher;
