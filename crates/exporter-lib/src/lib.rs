//! Library for exporting per-pod TCP connection stats
//!
//! This crate provides the core functionality for:
//! - Discovering pod processes through the cgroup hierarchy
//! - Parsing kernel TCP connection tables into per-state counts
//! - Maintaining a consistent pod snapshot under concurrent scrapes
//! - Prometheus exposition, health checks and observability

pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;

pub use collector::{Manager, ManagerBuilder, StatsSource, WorkloadLister};
pub use error::{Error, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ExporterMetrics, PodTcpCollector, StructuredLogger};
