pub mod commands;

use crate::config::{ReconcilerConfig, DEFAULT_POD_READY_TIMEOUT, DEFAULT_POST_RECREATE_DELAY};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// One invocation serves one request: read from stdin, answered on stdout.
#[derive(Parser, Debug)]
#[command(name = "kube-cpi")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "BOSH cloud provider interface backed by Kubernetes", long_about = None)]
pub struct Cli {
    #[arg(
        long,
        alias = "kubeConfig",
        value_name = "PATH",
        help = "Path to the kubeconfig document (YAML or JSON)"
    )]
    pub kube_config: PathBuf,

    #[arg(
        long,
        alias = "agentConfig",
        value_name = "PATH",
        help = "Path to the agent configuration (YAML or JSON)"
    )]
    pub agent_config: PathBuf,

    #[arg(short, long, help = "Enable debug logging of requests and responses")]
    pub debug: bool,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = DEFAULT_POD_READY_TIMEOUT.as_secs(),
        help = "How long attach and detach wait for the recreated pod"
    )]
    pub pod_ready_timeout: u64,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = DEFAULT_POST_RECREATE_DELAY.as_secs(),
        help = "Pause after the recreated pod is ready"
    )]
    pub post_recreate_delay: u64,
}

impl Cli {
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            pod_ready_timeout: Duration::from_secs(self.pod_ready_timeout),
            post_recreate_delay: Duration::from_secs(self.post_recreate_delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from([
            "kube-cpi",
            "--kube-config",
            "/var/vcap/jobs/cpi/config/kubeconfig",
            "--agent-config",
            "/var/vcap/jobs/cpi/config/agent.json",
        ])
        .expect("arguments should parse");

        assert!(!cli.debug);
        assert_eq!(cli.reconciler_config(), ReconcilerConfig::default());
    }

    #[test]
    fn test_overrides_and_aliases() {
        let cli = Cli::try_parse_from([
            "kube-cpi",
            "--kubeConfig",
            "kube.yml",
            "--agentConfig",
            "agent.yml",
            "--debug",
            "--pod-ready-timeout",
            "120",
            "--post-recreate-delay",
            "0",
        ])
        .expect("arguments should parse");

        assert!(cli.debug);
        assert_eq!(cli.kube_config, PathBuf::from("kube.yml"));
        assert_eq!(
            cli.reconciler_config(),
            ReconcilerConfig {
                pod_ready_timeout: Duration::from_secs(120),
                post_recreate_delay: Duration::ZERO,
            }
        );
    }

    #[test]
    fn test_config_paths_are_required() {
        assert!(Cli::try_parse_from(["kube-cpi", "--debug"]).is_err());
    }
}
