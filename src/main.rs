use anyhow::Context;
use clap::Parser;
use kube_cpi::cli::{commands, Cli};
use std::io::Read;
use std::process;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    // stdout carries the response document only
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: failed to set tracing subscriber: {}", e);
        process::exit(1);
    }

    info!("Starting kube-cpi v{}", kube_cpi::VERSION);

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let dispatcher = commands::build_dispatcher(cli).context("Failed to load configuration")?;

    let mut payload = String::new();
    std::io::stdin()
        .read_to_string(&mut payload)
        .context("Failed to read request from stdin")?;
    debug!("request: {}", payload.trim());

    let response = commands::handle_request(&dispatcher, &payload).await?;

    let encoded = serde_json::to_string(&response).context("Failed to encode response")?;
    debug!("response: {}", encoded);

    print!("{}", encoded);
    Ok(())
}
