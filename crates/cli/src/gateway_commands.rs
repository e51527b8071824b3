//! `gatehouse gateway`: boot the scheduling core and run until interrupted.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    gatehouse_config::GatehouseConfig,
    gatehouse_gateway::{Gateway, NoopAgentRunner, maintenance_interval, spawn_maintenance},
    tracing::info,
};

pub async fn run_gateway(config: GatehouseConfig) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _metrics = init_metrics(&config)?;

    let every = maintenance_interval(&config.maintenance)?;
    let grace = Duration::from_secs(config.maintenance.shutdown_grace_secs);
    let gateway = Arc::new(Gateway::new(config, Arc::new(NoopAgentRunner)));

    let limits = gateway.limits();
    info!(
        main = limits.main,
        cron = limits.cron,
        subagent = limits.subagent,
        nested = limits.nested,
        "gateway ready"
    );

    let maintenance = every.map(|every| {
        info!(every_ms = every.as_millis() as u64, "maintenance sweep enabled");
        spawn_maintenance(Arc::clone(&gateway), every)
    });

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");

    if let Some(task) = maintenance {
        task.abort();
    }
    let report = gateway.shutdown(grace).await;
    info!(
        drained = report.drained,
        abandoned_followups = report.abandoned_followups,
        "gateway stopped"
    );
    Ok(())
}

#[cfg(feature = "metrics")]
fn init_metrics(config: &GatehouseConfig) -> Result<gatehouse_metrics::MetricsHandle> {
    let mut global_labels: Vec<(String, String)> = config
        .metrics
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    global_labels.sort();
    let handle = gatehouse_metrics::init_metrics(gatehouse_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels,
    })?;
    Ok(handle)
}
