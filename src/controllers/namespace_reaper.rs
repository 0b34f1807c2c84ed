use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cluster::{ClusterError, SharedCluster};
use crate::models::workspace::is_workspace;

use super::{age_limit, older_than, wait_or_shutdown};

/// Deletes workspaces older than a fixed age, ownership notwithstanding.
pub struct StaleNamespaceReaper {
    cluster: SharedCluster,
    max_age: chrono::Duration,
    interval: Duration,
}

impl StaleNamespaceReaper {
    pub fn new(cluster: SharedCluster, max_age_hours: i64, interval: Duration) -> Self {
        Self {
            cluster,
            max_age: age_limit(max_age_hours),
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting namespace reaper (max age {}h)",
            self.max_age.num_hours()
        );

        loop {
            if let Err(e) = self.reap(Utc::now()).await {
                error!("Error listing namespaces: {}", e);
            }

            if wait_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        info!("Namespace reaper stopped");
    }

    pub async fn reap(&self, now: DateTime<Utc>) -> Result<Vec<String>, ClusterError> {
        let namespaces = self.cluster.list_namespaces().await?;

        let mut deleted = Vec::new();
        for namespace in namespaces
            .iter()
            .filter(|ns| is_workspace(ns) && older_than(&ns.metadata, self.max_age, now))
        {
            let Some(name) = namespace.metadata.name.as_deref() else {
                continue;
            };
            match self.cluster.delete_namespace(name).await {
                Ok(()) => {
                    warn!("Deleted zombie namespace {}", name);
                    deleted.push(name.to_string());
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => error!("Failed to delete namespace {}: {}", name, e),
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{MemoryCluster, Operation};
    use crate::cluster::ClusterApi;
    use crate::models::workspace::workspace_namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::Arc;

    fn aged(name: &str, created: DateTime<Utc>) -> k8s_openapi::api::core::v1::Namespace {
        let mut ns = workspace_namespace(name, "alice");
        ns.metadata.creation_timestamp = Some(Time(created));
        ns
    }

    async fn names(cluster: &MemoryCluster) -> Vec<String> {
        cluster
            .list_namespaces()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect()
    }

    #[tokio::test]
    async fn test_deletes_only_old_workspaces() {
        let now = Utc::now();
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_namespace(aged("zombie-old", now - chrono::Duration::hours(30)));
        cluster.insert_namespace(aged("zombie-new", now - chrono::Duration::hours(2)));
        cluster.insert_namespace(aged("kube-system", now - chrono::Duration::days(400)));

        let reaper = StaleNamespaceReaper::new(cluster.clone(), 12, Duration::from_secs(60));
        assert_eq!(reaper.reap(now).await.unwrap(), vec!["zombie-old".to_string()]);
        assert_eq!(names(&cluster).await, vec!["zombie-new", "kube-system"]);
    }

    #[tokio::test]
    async fn test_non_positive_age_keeps_fresh_workspaces() {
        let now = Utc::now();
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_namespace(aged("zombie-fresh", now - chrono::Duration::milliseconds(5)));

        for hours in [0, -1] {
            let reaper =
                StaleNamespaceReaper::new(cluster.clone(), hours, Duration::from_secs(60));
            assert!(reaper.reap(now).await.unwrap().is_empty());
        }
        assert_eq!(names(&cluster).await, vec!["zombie-fresh"]);
    }

    #[tokio::test]
    async fn test_failure_on_one_namespace_continues() {
        let now = Utc::now();
        let old = now - chrono::Duration::days(2);
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_namespace(aged("zombie-a", old));
        cluster.insert_namespace(aged("zombie-b", old));
        cluster.fail_next(Operation::DeleteNamespace, 1);

        let reaper = StaleNamespaceReaper::new(cluster.clone(), 12, Duration::from_secs(60));
        assert_eq!(reaper.reap(now).await.unwrap(), vec!["zombie-b".to_string()]);
        assert_eq!(names(&cluster).await, vec!["zombie-a"]);
    }
}
