use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::cluster::{ClusterError, SharedCluster};
use crate::config::ReaperConfig;

use super::{age_limit, older_than, wait_or_shutdown};

/// Deletes CI runner pods that outlived their job.
pub struct StaleWorkloadReaper {
    cluster: SharedCluster,
    namespace: String,
    label_key: String,
    label_prefix: String,
    max_age: chrono::Duration,
    interval: Duration,
}

impl StaleWorkloadReaper {
    pub fn new(cluster: SharedCluster, config: &ReaperConfig) -> Self {
        Self {
            cluster,
            namespace: config.namespace.clone(),
            label_key: config.label_key.clone(),
            label_prefix: config.label_prefix.clone(),
            max_age: age_limit(config.max_age_hours),
            interval: config.interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting workload reaper for namespace {} (max age {}h)",
            self.namespace,
            self.max_age.num_hours()
        );

        loop {
            if let Err(e) = self.reap(Utc::now()).await {
                error!("Error listing pods in namespace {}: {}", self.namespace, e);
            }

            if wait_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        info!("Workload reaper stopped");
    }

    /// Delete every matching pod older than the threshold at `now`. Returns
    /// the names that were deleted; failures on single pods are logged.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<Vec<String>, ClusterError> {
        let pods = self
            .cluster
            .list_pods(&self.namespace, Some(&self.label_key))
            .await?;

        let mut deleted = Vec::new();
        for pod in pods.iter().filter(|pod| self.is_runner(pod)) {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            if !older_than(&pod.metadata, self.max_age, now) {
                debug!(pod = %name, "runner pod still within age limit");
                continue;
            }

            match self.cluster.delete_pod(&self.namespace, name).await {
                Ok(()) => {
                    info!("Deleted pod {} in namespace {}", name, self.namespace);
                    deleted.push(name.to_string());
                }
                Err(e) => error!(
                    "Failed to delete pod {} in namespace {}: {}",
                    name, self.namespace, e
                ),
            }
        }

        Ok(deleted)
    }

    fn is_runner(&self, pod: &Pod) -> bool {
        pod.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(&self.label_key))
            .map_or(false, |value| value.starts_with(&self.label_prefix))
    }
}
