//! Pod refresh loop
//!
//! The [`Manager`] periodically lists the pods on the node, rebuilds the
//! pod -> pid snapshot and swaps it in atomically. Stats queries read the
//! current snapshot and compute connection counts live from procfs.

use super::discovery::{PodSnapshot, SnapshotBuilder, WorkloadLister};
use super::netstat::{pod_network_stats, NetworkStatsProvider, ProcNetworkStats};
use super::{CgroupResolver, StatsSource};
use crate::error::{Error, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{PodData, PodStats};
use crate::observability::ExporterMetrics;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the pod refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between snapshot rebuilds (default: 5 seconds)
    pub interval: Duration,
    /// Host root filesystem holding the cgroup and proc mounts
    pub rootfs: PathBuf,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            rootfs: PathBuf::from("/rootfs"),
        }
    }
}

/// Lifecycle state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No snapshot has been built yet
    Priming,
    /// At least one snapshot has been built
    Steady,
}

/// Results from a refresh cycle
#[derive(Debug, Clone, Copy)]
pub struct RefreshResults {
    pub pod_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub elapsed: Duration,
}

/// Owns the pod snapshot and answers stats queries against it
pub struct Manager {
    lister: Arc<dyn WorkloadLister>,
    builder: SnapshotBuilder,
    stats_provider: Arc<dyn NetworkStatsProvider>,
    health: Option<HealthRegistry>,
    metrics: ExporterMetrics,
    config: RefreshConfig,
    /// Replaced wholesale on every successful refresh, never mutated in place
    pods: RwLock<Arc<PodSnapshot>>,
    primed: AtomicBool,
}

impl Manager {
    /// Create a manager reading cgroups and procfs under `config.rootfs`
    pub fn new(lister: Arc<dyn WorkloadLister>, config: RefreshConfig) -> Self {
        let stats_provider = Arc::new(ProcNetworkStats::new(&config.rootfs));
        Self::with_provider(lister, stats_provider, config)
    }

    /// Create a manager with a custom network stats provider
    pub fn with_provider(
        lister: Arc<dyn WorkloadLister>,
        stats_provider: Arc<dyn NetworkStatsProvider>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            lister,
            builder: SnapshotBuilder::new(CgroupResolver::new(&config.rootfs)),
            stats_provider,
            health: None,
            metrics: ExporterMetrics::new(),
            config,
            pods: RwLock::new(Arc::new(PodSnapshot::new())),
            primed: AtomicBool::new(false),
        }
    }

    fn set_health_registry(&mut self, health: HealthRegistry) {
        self.health = Some(health);
    }

    /// Run the refresh loop until a shutdown signal is received
    ///
    /// The first refresh happens immediately. Shutdown is only observed
    /// between cycles; a cycle in progress always completes its swap.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            rootfs = %self.config.rootfs.display(),
            "Starting pod refresh loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!(
                            event = "refresh_failed",
                            error = %e,
                            "Failed to refresh pod infos"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down pod refresh loop");
                    break;
                }
            }
        }
    }

    /// Rebuild the pod snapshot and swap it in
    ///
    /// A listing failure leaves the previous snapshot in place. Pods that
    /// fail to build are dropped from the new snapshot without affecting
    /// the others.
    pub async fn refresh(&self) -> Result<RefreshResults> {
        let start = Instant::now();

        let workloads = match self.lister.list().await {
            Ok(workloads) => workloads,
            Err(e) => {
                self.metrics.inc_refresh_errors();
                if let Some(health) = &self.health {
                    health.set_degraded(components::LISTER, e.to_string()).await;
                }
                return Err(e);
            }
        };

        let built = self.builder.build(&workloads).await;
        let results = RefreshResults {
            pod_count: built.pods.len(),
            skipped_count: built.skipped_count,
            error_count: built.error_count,
            elapsed: start.elapsed(),
        };

        if let Err(e) = self.swap_snapshot(built.pods) {
            if let Some(health) = &self.health {
                health.set_unhealthy(components::REFRESHER, e.to_string()).await;
            }
            return Err(e);
        }

        self.metrics.observe_refresh_duration(results.elapsed.as_secs_f64());
        self.metrics.set_pods_tracked(results.pod_count as i64);
        if let Some(health) = &self.health {
            health.set_healthy(components::LISTER).await;
            if results.error_count > 0 {
                health
                    .set_degraded(
                        components::REFRESHER,
                        format!("{} pods failed to build", results.error_count),
                    )
                    .await;
            } else {
                health.set_healthy(components::REFRESHER).await;
            }
            health.set_ready(true).await;
        }

        debug!(
            event = "refresh_completed",
            pods = results.pod_count,
            skipped = results.skipped_count,
            errors = results.error_count,
            elapsed_ms = results.elapsed.as_millis(),
            "Refresh cycle complete"
        );

        Ok(results)
    }

    fn swap_snapshot(&self, pods: PodSnapshot) -> Result<()> {
        let pods = Arc::new(pods);
        {
            let mut guard = self.pods.write().map_err(|_| Error::SnapshotPoisoned)?;
            *guard = pods;
        }

        if !self.primed.swap(true, Ordering::AcqRel) {
            info!("Initial pod snapshot built");
        }
        Ok(())
    }

    fn current(&self) -> Result<Arc<PodSnapshot>> {
        let guard = self.pods.read().map_err(|_| Error::SnapshotPoisoned)?;
        Ok(Arc::clone(&guard))
    }

    /// Compute live TCP stats for every pod in the current snapshot
    ///
    /// Pods whose stats cannot be read are logged and left out of the
    /// result.
    pub fn list_stats(&self) -> Result<Vec<PodStats>> {
        let pods = self.current()?;
        let mut stats = Vec::with_capacity(pods.len());

        for pod in pods.values() {
            match pod_network_stats(self.stats_provider.as_ref(), pod) {
                Ok(network) => stats.push(PodStats {
                    pod_name: pod.name.clone(),
                    namespace: pod.namespace.clone(),
                    network,
                }),
                Err(e) => {
                    self.metrics.inc_pod_stats_errors();
                    warn!(
                        pod = %pod.name,
                        namespace = %pod.namespace,
                        error = %e,
                        "Failed to get network stats for pod"
                    );
                }
            }
        }

        Ok(stats)
    }

    pub fn state(&self) -> ManagerState {
        if self.primed.load(Ordering::Acquire) {
            ManagerState::Steady
        } else {
            ManagerState::Priming
        }
    }

    /// Number of pods in the current snapshot
    pub fn pod_count(&self) -> usize {
        self.current().map(|pods| pods.len()).unwrap_or(0)
    }

    /// Copy of the current snapshot, ordered by pod UID
    pub fn snapshot(&self) -> Result<Vec<PodData>> {
        Ok(self.current()?.values().cloned().collect())
    }
}

impl StatsSource for Manager {
    fn list_stats(&self) -> Result<Vec<PodStats>> {
        Manager::list_stats(self)
    }
}

/// Builder for creating a [`Manager`]
pub struct ManagerBuilder {
    lister: Option<Arc<dyn WorkloadLister>>,
    stats_provider: Option<Arc<dyn NetworkStatsProvider>>,
    health: Option<HealthRegistry>,
    config: RefreshConfig,
}

impl ManagerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            lister: None,
            stats_provider: None,
            health: None,
            config: RefreshConfig::default(),
        }
    }

    /// Set the pod lister
    pub fn lister(mut self, lister: Arc<dyn WorkloadLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    /// Override the network stats provider (defaults to procfs under the rootfs)
    pub fn stats_provider(mut self, provider: Arc<dyn NetworkStatsProvider>) -> Self {
        self.stats_provider = Some(provider);
        self
    }

    /// Report refresh health and readiness to a registry
    pub fn health_registry(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Set the refresh interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the host root filesystem path
    pub fn rootfs(mut self, rootfs: impl Into<PathBuf>) -> Self {
        self.config.rootfs = rootfs.into();
        self
    }

    /// Build the manager
    pub fn build(self) -> anyhow::Result<Manager> {
        let lister = self
            .lister
            .ok_or_else(|| anyhow::anyhow!("Lister is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Refresh interval must be greater than zero");
        }

        let mut manager = match self.stats_provider {
            Some(provider) => Manager::with_provider(lister, provider, self.config),
            None => Manager::new(lister, self.config),
        };
        if let Some(health) = self.health {
            manager.set_health_registry(health);
        }

        Ok(manager)
    }
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
