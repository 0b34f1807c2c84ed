pub mod fleet_monitor;
pub mod namespace_reaper;
pub mod pod_reaper;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

pub use fleet_monitor::FleetMonitor;
pub use namespace_reaper::StaleNamespaceReaper;
pub use pod_reaper::StaleWorkloadReaper;

/// Background loops spawned at startup and joined at shutdown.
#[derive(Default)]
pub struct BackgroundJobs {
    jobs: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundJobs {
    pub fn spawn<F>(&mut self, name: &'static str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.jobs.push((name, tokio::spawn(job)));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Wait for every job to finish. Jobs that panicked are logged and
    /// their names returned.
    pub async fn join(self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for (name, job) in self.jobs {
            if let Err(e) = job.await {
                error!("{} task panicked: {}", name, e);
                failed.push(name);
            }
        }
        failed
    }
}

/// Sleep for `interval`, returning `true` early if shutdown was requested.
///
/// A dropped sender counts as a shutdown request.
pub(crate) async fn wait_or_shutdown(
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Age limit for a reaper configured in hours. Values that are not positive
/// or do not fit in a `chrono::Duration` never match anything.
pub(crate) fn age_limit(hours: i64) -> chrono::Duration {
    if hours < 1 {
        return chrono::Duration::MAX;
    }
    chrono::Duration::try_hours(hours).unwrap_or(chrono::Duration::MAX)
}

/// Whether an object was created strictly more than `max_age` before `now`.
/// Objects without a creation timestamp are never considered old.
pub(crate) fn older_than(
    meta: &ObjectMeta,
    max_age: chrono::Duration,
    now: DateTime<Utc>,
) -> bool {
    meta.creation_timestamp
        .as_ref()
        .map_or(false, |created| now - created.0 > max_age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn created(hours_ago: i64, now: DateTime<Utc>) -> ObjectMeta {
        ObjectMeta {
            creation_timestamp: Some(Time(now - chrono::Duration::hours(hours_ago))),
            ..Default::default()
        }
    }

    #[test]
    fn test_older_than_is_strict() {
        let now = Utc::now();
        let limit = chrono::Duration::hours(48);
        assert!(older_than(&created(72, now), limit, now));
        assert!(!older_than(&created(48, now), limit, now));
        assert!(!older_than(&created(1, now), limit, now));
        assert!(!older_than(&ObjectMeta::default(), limit, now));
    }

    #[test]
    fn test_age_limit_rejects_unusable_hours() {
        let now = Utc::now();
        assert_eq!(age_limit(12), chrono::Duration::hours(12));
        for hours in [0, -1, 9_999_999_999_999_999, i64::MAX] {
            let limit = age_limit(hours);
            assert_eq!(limit, chrono::Duration::MAX, "hours {}", hours);
            assert!(!older_than(&created(24 * 365 * 100, now), limit, now));
        }
    }

    #[tokio::test]
    async fn test_wait_returns_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waiter =
            tokio::spawn(async move { wait_or_shutdown(Duration::from_secs(3600), &mut rx).await });
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_join_reports_panicked_jobs() {
        let mut jobs = BackgroundJobs::default();
        jobs.spawn("steady", async {});
        jobs.spawn("crashing", async { panic!("job failed"); });
        assert_eq!(jobs.len(), 2);

        assert_eq!(jobs.join().await, vec!["crashing"]);
    }

    #[tokio::test]
    async fn test_join_waits_for_shutdown_of_loops() {
        let (tx, mut rx) = watch::channel(false);
        let mut jobs = BackgroundJobs::default();
        jobs.spawn("looping", async move {
            while !wait_or_shutdown(Duration::from_millis(1), &mut rx).await {}
        });
        tx.send(true).unwrap();
        assert!(jobs.join().await.is_empty());
    }

    #[tokio::test]
    async fn test_wait_elapses_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!wait_or_shutdown(Duration::from_millis(1), &mut rx).await);
    }
}
