//! Observability infrastructure for the exporter
//!
//! Provides:
//! - The Prometheus collector exposing per-pod TCP connection counts
//! - Self metrics of the refresh loop (latency, pods tracked, errors)
//! - Structured JSON lifecycle logging with tracing

use crate::collector::StatsSource;
use crate::models::PodStats;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Gauge, GaugeVec, Histogram,
    IntCounter, IntGauge, Opts,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};

/// Name of the per-pod TCP connection gauge
pub const TCP_CONNECTIONS_METRIC: &str = "pod_tcp_connections";
const TCP_CONNECTIONS_HELP: &str = "tcp(include tcp6) connections usage statistic for pod";

/// Name of the scrape error indicator gauge
pub const SCRAPE_ERROR_METRIC: &str = "container_scrape_error";
const SCRAPE_ERROR_HELP: &str =
    "1 if there was an error while getting container metrics, 0 otherwise";

/// Labels of [`TCP_CONNECTIONS_METRIC`], pod labels first
pub const TCP_CONNECTIONS_LABELS: [&str; 4] = ["pod", "namespace", "tcp_state", "proto"];

/// Refresh latency buckets (in seconds)
const REFRESH_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// One labeled TCP connection count of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSample {
    pub tcp_state: &'static str,
    pub proto: &'static str,
    pub value: u64,
}

/// Flatten a pod's stats into labeled samples, IPv4 states then IPv6
pub fn pod_samples(stats: &PodStats) -> Vec<TcpSample> {
    let families = [("tcp", &stats.network.tcp), ("tcp6", &stats.network.tcp6)];

    families
        .into_iter()
        .flat_map(|(proto, stat)| {
            stat.by_state()
                .into_iter()
                .map(move |(tcp_state, value)| TcpSample {
                    tcp_state,
                    proto,
                    value,
                })
        })
        .collect()
}

/// Prometheus collector computing pod TCP stats on every scrape
pub struct PodTcpCollector {
    source: Arc<dyn StatsSource>,
    tcp_desc: Desc,
    error_desc: Desc,
}

impl PodTcpCollector {
    pub fn new(source: Arc<dyn StatsSource>) -> prometheus::Result<Self> {
        let tcp_desc = Desc::new(
            TCP_CONNECTIONS_METRIC.to_string(),
            TCP_CONNECTIONS_HELP.to_string(),
            TCP_CONNECTIONS_LABELS.iter().map(|l| l.to_string()).collect(),
            HashMap::new(),
        )?;
        let error_desc = Desc::new(
            SCRAPE_ERROR_METRIC.to_string(),
            SCRAPE_ERROR_HELP.to_string(),
            Vec::new(),
            HashMap::new(),
        )?;

        Ok(Self {
            source,
            tcp_desc,
            error_desc,
        })
    }

    fn tcp_families(&self, stats: &[PodStats]) -> prometheus::Result<Vec<MetricFamily>> {
        if stats.is_empty() {
            return Ok(Vec::new());
        }

        let gauges = GaugeVec::new(
            Opts::new(TCP_CONNECTIONS_METRIC, TCP_CONNECTIONS_HELP),
            &TCP_CONNECTIONS_LABELS,
        )?;

        let mut seen = HashSet::with_capacity(stats.len());
        for pod in stats {
            if !seen.insert((pod.namespace.as_str(), pod.pod_name.as_str())) {
                debug!(
                    pod = %pod.pod_name,
                    namespace = %pod.namespace,
                    "Duplicate pod name in snapshot, keeping the last stats"
                );
            }
            for sample in pod_samples(pod) {
                gauges
                    .get_metric_with_label_values(&[
                        &pod.pod_name,
                        &pod.namespace,
                        sample.tcp_state,
                        sample.proto,
                    ])?
                    .set(sample.value as f64);
            }
        }

        Ok(gauges.collect())
    }

    /// Scrape error gauge owned by a single collect call
    fn error_families(failed: bool) -> prometheus::Result<Vec<MetricFamily>> {
        let errors = Gauge::with_opts(Opts::new(SCRAPE_ERROR_METRIC, SCRAPE_ERROR_HELP))?;
        errors.set(if failed { 1.0 } else { 0.0 });
        Ok(errors.collect())
    }
}

impl Collector for PodTcpCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.tcp_desc, &self.error_desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        let mut failed = false;

        match self.source.list_stats() {
            Ok(stats) => match self.tcp_families(&stats) {
                Ok(tcp) => families.extend(tcp),
                Err(e) => {
                    failed = true;
                    error!(error = %e, "Failed to encode pod tcp metrics");
                }
            },
            Err(e) => {
                failed = true;
                error!(error = %e, "Failed to get pod stats");
            }
        }

        match Self::error_families(failed) {
            Ok(errors) => families.extend(errors),
            Err(e) => error!(error = %e, "Failed to encode scrape error metric"),
        }
        families
    }
}

/// Global self metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ExporterMetricsInner> = OnceLock::new();

struct ExporterMetricsInner {
    refresh_duration_seconds: Histogram,
    pods_tracked: IntGauge,
    refresh_errors: IntCounter,
    pod_stats_errors: IntCounter,
}

impl ExporterMetricsInner {
    fn new() -> Self {
        Self {
            refresh_duration_seconds: register_histogram!(
                "tcp_exporter_refresh_duration_seconds",
                "Time spent rebuilding the pod snapshot",
                REFRESH_BUCKETS.to_vec()
            )
            .expect("Failed to register refresh_duration_seconds"),

            pods_tracked: register_int_gauge!(
                "tcp_exporter_pods_tracked",
                "Number of running pods in the current snapshot"
            )
            .expect("Failed to register pods_tracked"),

            refresh_errors: register_int_counter!(
                "tcp_exporter_refresh_errors_total",
                "Total number of refresh cycles aborted by a pod listing failure"
            )
            .expect("Failed to register refresh_errors"),

            pod_stats_errors: register_int_counter!(
                "tcp_exporter_pod_stats_errors_total",
                "Total number of pods skipped during a scrape because their stats were unavailable"
            )
            .expect("Failed to register pod_stats_errors"),
        }
    }
}

/// Lightweight handle to the exporter's self metrics
///
/// Clones share the same underlying metrics in the default registry.
#[derive(Clone)]
pub struct ExporterMetrics {
    _private: (),
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ExporterMetricsInner {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new)
    }

    pub fn observe_refresh_duration(&self, duration_secs: f64) {
        self.inner().refresh_duration_seconds.observe(duration_secs);
    }

    pub fn set_pods_tracked(&self, count: i64) {
        self.inner().pods_tracked.set(count);
    }

    pub fn inc_refresh_errors(&self) {
        self.inner().refresh_errors.inc();
    }

    pub fn inc_pod_stats_errors(&self) {
        self.inner().pod_stats_errors.inc();
    }
}

/// Structured logger for exporter lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, rootfs: &str, refresh_interval_secs: u64) {
        info!(
            event = "exporter_started",
            node = %self.node_name,
            exporter_version = %version,
            rootfs = %rootfs,
            refresh_interval_secs = refresh_interval_secs,
            "TCP exporter started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            node = %self.node_name,
            reason = %reason,
            "TCP exporter shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::models::{NetworkStats, TcpStat};
    use prometheus::Registry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource(Vec<PodStats>);

    impl StatsSource for FixedSource {
        fn list_stats(&self) -> Result<Vec<PodStats>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    impl StatsSource for FailingSource {
        fn list_stats(&self) -> Result<Vec<PodStats>> {
            Err(Error::SnapshotPoisoned)
        }
    }

    fn stats(name: &str, established: u64, listen6: u64) -> PodStats {
        PodStats {
            pod_name: name.to_string(),
            namespace: "prod".to_string(),
            network: NetworkStats {
                tcp: TcpStat {
                    established,
                    ..Default::default()
                },
                tcp6: TcpStat {
                    listen: listen6,
                    ..Default::default()
                },
            },
        }
    }

    fn gather(source: Arc<dyn StatsSource>) -> Vec<MetricFamily> {
        let registry = Registry::new();
        registry
            .register(Box::new(PodTcpCollector::new(source).unwrap()))
            .unwrap();
        registry.gather()
    }

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> Option<&'a MetricFamily> {
        families.iter().find(|f| f.get_name() == name)
    }

    fn label<'a>(metric: &'a prometheus::proto::Metric, name: &str) -> &'a str {
        metric
            .get_label()
            .iter()
            .find(|l| l.get_name() == name)
            .map(|l| l.get_value())
            .unwrap_or_default()
    }

    #[test]
    fn test_pod_samples() {
        let samples = pod_samples(&stats("web", 3, 2));

        assert_eq!(samples.len(), 22);
        assert_eq!(
            samples[0],
            TcpSample {
                tcp_state: "established",
                proto: "tcp",
                value: 3
            }
        );
        assert_eq!(samples[11].proto, "tcp6");
        assert_eq!(samples[11].tcp_state, "established");
        assert_eq!(samples[20].tcp_state, "listen");
        assert_eq!(samples[20].value, 2);
        assert_eq!(samples.iter().map(|s| s.value).sum::<u64>(), 5);
    }

    #[test]
    fn test_collector_exports_pod_samples() {
        let source = Arc::new(FixedSource(vec![stats("web", 3, 1), stats("db", 0, 0)]));
        let families = gather(source);

        let tcp = family(&families, TCP_CONNECTIONS_METRIC).unwrap();
        assert_eq!(tcp.get_metric().len(), 44);

        let established = tcp
            .get_metric()
            .iter()
            .find(|m| {
                label(m, "pod") == "web"
                    && label(m, "tcp_state") == "established"
                    && label(m, "proto") == "tcp"
            })
            .unwrap();
        assert_eq!(label(established, "namespace"), "prod");
        assert_eq!(established.get_gauge().get_value(), 3.0);

        let errors = family(&families, SCRAPE_ERROR_METRIC).unwrap();
        assert_eq!(errors.get_metric()[0].get_gauge().get_value(), 0.0);
    }

    #[test]
    fn test_collector_sets_error_gauge_on_failure() {
        let families = gather(Arc::new(FailingSource));

        assert!(family(&families, TCP_CONNECTIONS_METRIC).is_none());
        let errors = family(&families, SCRAPE_ERROR_METRIC).unwrap();
        assert_eq!(errors.get_metric()[0].get_gauge().get_value(), 1.0);
    }

    #[test]
    fn test_collector_descriptors() {
        let collector = PodTcpCollector::new(Arc::new(FixedSource(vec![]))).unwrap();
        let names: Vec<&str> = collector.desc().iter().map(|d| d.fq_name.as_str()).collect();

        assert_eq!(names, vec![TCP_CONNECTIONS_METRIC, SCRAPE_ERROR_METRIC]);
    }

    /// Fails every other call
    struct AlternatingSource(AtomicUsize);

    impl StatsSource for AlternatingSource {
        fn list_stats(&self) -> Result<Vec<PodStats>> {
            if self.0.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(Error::SnapshotPoisoned)
            } else {
                Ok(vec![stats("web", 1, 0)])
            }
        }
    }

    #[test]
    fn test_error_gauge_matches_each_concurrent_collect() {
        let collector = Arc::new(
            PodTcpCollector::new(Arc::new(AlternatingSource(AtomicUsize::new(0)))).unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let collector = collector.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let families = collector.collect();
                        let has_pods = family(&families, TCP_CONNECTIONS_METRIC).is_some();
                        let errors = family(&families, SCRAPE_ERROR_METRIC).unwrap();
                        let expected = if has_pods { 0.0 } else { 1.0 };
                        assert_eq!(errors.get_metric()[0].get_gauge().get_value(), expected);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_duplicate_pod_names_share_series() {
        let families = gather(Arc::new(FixedSource(vec![stats("web", 1, 0), stats("web", 5, 0)])));

        let tcp = family(&families, TCP_CONNECTIONS_METRIC).unwrap();
        assert_eq!(tcp.get_metric().len(), 22);
        let established = tcp
            .get_metric()
            .iter()
            .find(|m| label(m, "tcp_state") == "established" && label(m, "proto") == "tcp")
            .unwrap();
        assert_eq!(established.get_gauge().get_value(), 5.0);
    }

    #[test]
    fn test_exporter_metrics_registered_globally() {
        let metrics = ExporterMetrics::new();

        let before = metrics.inner().pod_stats_errors.get();
        metrics.inc_pod_stats_errors();
        assert!(metrics.inner().pod_stats_errors.get() > before);

        metrics.observe_refresh_duration(0.002);
        metrics.inc_refresh_errors();
        metrics.set_pods_tracked(4);

        let families = prometheus::default_registry().gather();
        let duration = family(&families, "tcp_exporter_refresh_duration_seconds").unwrap();
        assert!(duration.get_metric()[0].get_histogram().get_sample_count() >= 1);
        let refresh_errors = family(&families, "tcp_exporter_refresh_errors_total").unwrap();
        assert!(refresh_errors.get_metric()[0].get_counter().get_value() >= 1.0);
        assert!(family(&families, "tcp_exporter_pods_tracked").is_some());
        assert!(family(&families, "tcp_exporter_pod_stats_errors_total").is_some());
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name, "test-node");
    }
}
