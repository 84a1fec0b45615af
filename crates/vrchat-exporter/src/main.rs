//! VRChat presence exporter.

use anyhow::Context as _;
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;
use vrchat_api::Client;
use vrchat_exporter::{Config, MetricsExporter, PresenceCollector, RunMode};

use std::{process, sync::Arc};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: &Config) -> anyhow::Result<()> {
    tracing::debug!(?config, "Parsed configuration");

    let client = Client::new(config.api_url.clone()).context("Failed to create API client")?;
    let session = client
        .authenticate(&config.credentials())
        .await
        .context("Failed to authenticate")?;
    let user = session
        .current_user()
        .await
        .context("Failed to get current user")?;
    tracing::info!(user_id = %user.id, "Current user: {}", user.display_name);

    let mut registry = Registry::default();
    PresenceCollector::new(Arc::new(session), Handle::current()).register(&mut registry);
    let exporter = MetricsExporter::new(Arc::new(registry));

    match config.run_mode() {
        RunMode::Push(gateway) => {
            let never = exporter
                .push_to_gateway(gateway)
                .await
                .context("Failed to push metrics")?;
            match never {}
        }
        RunMode::Serve { bind_address } => exporter
            .start(bind_address)
            .await
            .with_context(|| format!("Failed to listen on {bind_address}")),
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    let config = Config::parse();

    if let Err(err) = run(&config).await {
        tracing::error!("{err:#}");
        process::exit(1);
    }
}
