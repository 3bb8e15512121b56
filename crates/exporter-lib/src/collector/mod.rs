//! Pod network stats collection
//!
//! This module discovers the pods running on the node, resolves their
//! processes through the cgroup v1 hierarchy and reads per-process TCP
//! connection tables from procfs.

mod cgroup;
mod discovery;
mod r#loop;
mod netstat;


pub use cgroup::{parse_container_id, parse_tasks, CgroupResolver};
pub use discovery::{BuildResults, PodSnapshot, SnapshotBuilder, WorkloadLister};
pub use netstat::{parse_tcp_table, pod_network_stats, NetworkStatsProvider, ProcNetworkStats};
pub use r#loop::{Manager, ManagerBuilder, ManagerState, RefreshConfig, RefreshResults};

use crate::error::Result;
use crate::models::PodStats;

pub use async_trait::async_trait;

/// Source of point-in-time pod stats for metric exposition
pub trait StatsSource: Send + Sync {
    /// List TCP stats of all known pods
    ///
    /// Pods whose stats are unavailable are omitted; an error means no
    /// stats could be produced at all.
    fn list_stats(&self) -> Result<Vec<PodStats>>;
}
