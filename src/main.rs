use std::sync::Arc;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zombie_ns::{
    api::{api_router, metrics_router, start_server, AppState},
    auth::{AuthorizationGate, CredentialStore},
    cluster::KubeCluster,
    controllers::{BackgroundJobs, FleetMonitor, StaleNamespaceReaper, StaleWorkloadReaper},
    lifecycle::{provisioning::ProvisioningConfig, NamespaceLifecycleManager},
    metrics::MetricsRegistry,
    Config, SharedCluster,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zombie_ns=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting zombie-ns workspace service");

    let config = Config::from_env()?;

    let cluster: SharedCluster = Arc::new(KubeCluster::try_default(config.call_timeout).await?);

    let metrics = Arc::new(MetricsRegistry::new()?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // Background jobs
    let mut jobs = BackgroundJobs::default();

    let monitor = FleetMonitor::new(cluster.clone(), metrics.fleet(), config.monitor_interval);
    jobs.spawn("Fleet monitor", monitor.run(shutdown_rx.clone()));

    let workload_reaper = StaleWorkloadReaper::new(cluster.clone(), &config.reaper);
    jobs.spawn("Workload reaper", workload_reaper.run(shutdown_rx.clone()));

    if let Some(max_age_hours) = config.namespace_max_age_hours {
        let namespace_reaper =
            StaleNamespaceReaper::new(cluster.clone(), max_age_hours, config.monitor_interval);
        jobs.spawn("Namespace reaper", namespace_reaper.run(shutdown_rx.clone()));
    }

    let gate = AuthorizationGate::new(CredentialStore::new(
        cluster.clone(),
        config.service_namespace.clone(),
    ));
    let manager = NamespaceLifecycleManager::new(cluster, gate, ProvisioningConfig::default());

    let metrics_server = tokio::spawn(start_server(
        "Metrics server",
        config.metrics_addr,
        metrics_router(metrics),
        shutdown_rx.clone(),
    ));

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                let _ = signal_tx.send(true);
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signals: {}", e),
        }
    });

    let result = start_server(
        "Workspace API",
        config.listen_addr,
        api_router(AppState::new(manager)),
        shutdown_rx,
    )
    .await;

    // A failed API server stops everything else too.
    let _ = shutdown_tx.send(true);

    match metrics_server.await {
        Ok(Err(e)) => tracing::error!("Metrics server failed: {}", e),
        Err(e) => tracing::error!("Metrics server task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    jobs.join().await;

    tracing::info!("zombie-ns stopped");
    result
}

async fn wait_for_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
