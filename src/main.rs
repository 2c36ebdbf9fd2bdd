//! mqtt-sysmon - host telemetry agent with Home Assistant discovery.
//!
//! Startup order matters: resolve identity, enumerate host entities, build
//! the catalog, publish the retained discovery document, and only then let
//! the scheduler produce state messages.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mqtt_sysmon::catalog::Catalog;
use mqtt_sysmon::config::MonitorConfig;
use mqtt_sysmon::device::Device;
use mqtt_sysmon::discovery::{self, TopicScheme};
use mqtt_sysmon::error::StartupError;
use mqtt_sysmon::facts::HostFacts;
use mqtt_sysmon::probe::{self, SystemProbes};
use mqtt_sysmon::publish::{DryRunGateway, MqttGateway, PublishGateway};
use mqtt_sysmon::scheduler::Scheduler;

#[derive(Debug, Parser)]
#[command(name = "mqtt-sysmon", version, about = "Linux system monitor with MQTT and Home Assistant discovery")]
struct Cli {
    /// Print MQTT topics and payloads instead of publishing them.
    #[arg(long)]
    dry_run: bool,

    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mqtt_sysmon=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = MonitorConfig::load(cli.config.as_deref())
        .await
        .context("failed to load configuration")?;

    if cli.dry_run {
        info!("dry-run mode: skipping dependency checks, nothing will be published");
    } else {
        probe::check_dependencies().await?;
    }

    let device = Device::resolve(&config.device.name)?;
    info!(device = %device.id, version = %device.sw_version, "resolved device identity");

    let facts = HostFacts::discover(&config.sampling.interfaces).await;
    let catalog = Arc::new(Catalog::build(&device, &facts));
    if catalog.is_empty() {
        return Err(StartupError::EmptyCatalog.into());
    }
    info!(
        sensors = catalog.len(),
        disks = facts.disks.len(),
        interfaces = facts.interfaces.len(),
        "sensor catalog built"
    );

    let gateway: Arc<dyn PublishGateway> = if cli.dry_run {
        Arc::new(DryRunGateway::new())
    } else {
        Arc::new(MqttGateway::connect(&config.mqtt, &device.id))
    };

    let topics = TopicScheme::new(&config.device.discovery_prefix, &device.id);
    let document = discovery::build_document(&device, &catalog, &topics);
    let payload = serde_json::to_string(&document).context("failed to serialize discovery document")?;
    gateway
        .publish(&topics.discovery_topic(), payload, true)
        .await
        .context("failed to publish discovery document")?;
    info!(topic = %topics.discovery_topic(), components = document.cmps.len(), "discovery published");

    let fast_interval = Duration::from_secs(config.sampling.fast_interval_secs);
    let slow_interval = Duration::from_secs(config.sampling.slow_interval_secs);
    let source = Arc::new(SystemProbes::new(fast_interval));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut scheduler = Scheduler::new(
        catalog,
        source,
        gateway,
        topics,
        fast_interval,
        slow_interval,
    );
    scheduler.run(shutdown_rx).await;

    info!("clean shutdown");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
