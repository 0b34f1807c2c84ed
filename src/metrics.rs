//! Prometheus metrics for the workspace fleet.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `zombie_namespace_count` | Gauge | |
//! | `zombie_namespace_pods_count` | Gauge | `namespace` |
//! | `zombie_namespace_old` | Gauge | `namespace` |
//!
//! The registry is built once at startup and handed to the fleet monitor and
//! the metrics server; nothing here is a process-wide static.

use std::sync::Arc;

use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Gauges published by the fleet monitor.
#[derive(Clone)]
pub struct FleetMetrics {
    namespace_count: IntGauge,
    pods_count: IntGaugeVec,
    namespace_old: IntGaugeVec,
}

impl FleetMetrics {
    fn new(registry: &Registry) -> MetricsResult<Self> {
        let namespace_count = IntGauge::with_opts(Opts::new(
            "zombie_namespace_count",
            "Number of namespaces with names starting with 'zombie-'",
        ))?;
        registry.register(Box::new(namespace_count.clone()))?;

        let pods_count = IntGaugeVec::new(
            Opts::new(
                "zombie_namespace_pods_count",
                "Number of pods in namespaces with names starting with 'zombie-'",
            ),
            &["namespace"],
        )?;
        registry.register(Box::new(pods_count.clone()))?;

        let namespace_old = IntGaugeVec::new(
            Opts::new(
                "zombie_namespace_old",
                "Indicates if a namespace with a name starting with 'zombie-' is older than 2 days",
            ),
            &["namespace"],
        )?;
        registry.register(Box::new(namespace_old.clone()))?;

        Ok(Self {
            namespace_count,
            pods_count,
            namespace_old,
        })
    }

    pub fn set_namespace_count(&self, count: usize) {
        self.namespace_count.set(count as i64);
    }

    pub fn set_pod_count(&self, namespace: &str, count: usize) {
        self.pods_count
            .with_label_values(&[namespace])
            .set(count as i64);
    }

    pub fn set_stale(&self, namespace: &str, stale: bool) {
        self.namespace_old
            .with_label_values(&[namespace])
            .set(i64::from(stale));
    }

    /// Drop every series labelled with `namespace`.
    pub fn forget(&self, namespace: &str) {
        // Absent series are fine: the pod gauge may never have been set.
        let _ = self.pods_count.remove_label_values(&[namespace]);
        let _ = self.namespace_old.remove_label_values(&[namespace]);
    }

    pub fn namespace_count(&self) -> i64 {
        self.namespace_count.get()
    }

    /// Current pod count for `namespace`, if a series exists.
    pub fn pod_count(&self, namespace: &str) -> Option<i64> {
        self.series_value(&self.pods_count, namespace)
    }

    /// Current staleness flag for `namespace`, if a series exists.
    pub fn stale_flag(&self, namespace: &str) -> Option<i64> {
        self.series_value(&self.namespace_old, namespace)
    }

    fn series_value(&self, vec: &IntGaugeVec, namespace: &str) -> Option<i64> {
        use prometheus::core::Collector;

        vec.collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|label| label.get_name() == "namespace" && label.get_value() == namespace)
            })
            .map(|metric| metric.get_gauge().get_value() as i64)
    }
}

pub struct MetricsRegistry {
    registry: Registry,
    fleet: FleetMetrics,
}

impl MetricsRegistry {
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let fleet = FleetMetrics::new(&registry)?;
        Ok(Self { registry, fleet })
    }

    pub fn fleet(&self) -> FleetMetrics {
        self.fleet.clone()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauges_roundtrip_through_exposition() {
        let registry = MetricsRegistry::new().unwrap();
        let fleet = registry.fleet();
        fleet.set_namespace_count(2);
        fleet.set_pod_count("zombie-a", 3);
        fleet.set_stale("zombie-a", true);

        let text = registry.encode_text().unwrap();
        assert!(text.contains("zombie_namespace_count 2"));
        assert!(text.contains("zombie_namespace_pods_count{namespace=\"zombie-a\"} 3"));
        assert!(text.contains("zombie_namespace_old{namespace=\"zombie-a\"} 1"));
    }

    #[test]
    fn test_forget_removes_series() {
        let registry = MetricsRegistry::new().unwrap();
        let fleet = registry.fleet();
        fleet.set_stale("zombie-gone", false);
        assert_eq!(fleet.stale_flag("zombie-gone"), Some(0));
        assert_eq!(fleet.pod_count("zombie-gone"), None);

        fleet.forget("zombie-gone");
        assert_eq!(fleet.stale_flag("zombie-gone"), None);
        assert!(!registry.encode_text().unwrap().contains("zombie-gone"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = MetricsRegistry::new().unwrap();
        let b = MetricsRegistry::new().unwrap();
        a.fleet().set_namespace_count(5);
        assert_eq!(b.fleet().namespace_count(), 0);
    }
}
