use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::cluster::{ClusterError, SharedCluster};
use crate::config::STALE_AFTER_HOURS;
use crate::metrics::FleetMetrics;
use crate::models::workspace::is_workspace;

use super::{older_than, wait_or_shutdown};

/// What one scan saw.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FleetSnapshot {
    pub total: usize,
    pub stale: Vec<String>,
}

/// Periodically counts workspaces, their pods and how many are stale.
///
/// Series for namespaces that disappeared since the previous scan are
/// removed, so the exposition only lists live workspaces.
pub struct FleetMonitor {
    cluster: SharedCluster,
    metrics: FleetMetrics,
    interval: Duration,
    stale_after: chrono::Duration,
    published: HashSet<String>,
}

impl FleetMonitor {
    pub fn new(cluster: SharedCluster, metrics: FleetMetrics, interval: Duration) -> Self {
        Self {
            cluster,
            metrics,
            interval,
            stale_after: chrono::Duration::hours(STALE_AFTER_HOURS),
            published: HashSet::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting fleet monitor");

        loop {
            match self.scan(Utc::now()).await {
                Ok(snapshot) => debug!(
                    total = snapshot.total,
                    stale = snapshot.stale.len(),
                    "fleet scan complete"
                ),
                Err(e) => error!("Fleet monitor skipped a cycle: {}", e),
            }

            if wait_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        info!("Fleet monitor stopped");
    }

    /// One pass over the cluster. A failed namespace listing abandons the
    /// pass and leaves every gauge as it was.
    pub async fn scan(&mut self, now: DateTime<Utc>) -> Result<FleetSnapshot, ClusterError> {
        let namespaces = self.cluster.list_namespaces().await?;

        let mut snapshot = FleetSnapshot::default();
        let mut seen = HashSet::new();

        for namespace in namespaces.iter().filter(|ns| is_workspace(ns)) {
            let Some(name) = namespace.metadata.name.as_deref() else {
                continue;
            };
            snapshot.total += 1;
            seen.insert(name.to_string());

            let stale = older_than(&namespace.metadata, self.stale_after, now);
            self.metrics.set_stale(name, stale);
            if stale {
                snapshot.stale.push(name.to_string());
            }

            match self.cluster.list_pods(name, None).await {
                Ok(pods) => self.metrics.set_pod_count(name, pods.len()),
                Err(e) => error!("Failed to list pods in namespace {}: {}", name, e),
            }
        }

        self.metrics.set_namespace_count(snapshot.total);

        for gone in self.published.difference(&seen) {
            debug!(namespace = %gone, "dropping metrics for removed workspace");
            self.metrics.forget(gone);
        }
        self.published = seen;

        Ok(snapshot)
    }
}
