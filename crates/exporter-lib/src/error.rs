//! Error types for pod discovery and connection-table collection

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to list pods: {0}")]
    Listing(String),

    #[error("invalid QoS class {0:?}")]
    InvalidQosClass(String),

    #[error("cgroup path {} not found", path.display())]
    CgroupNotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pid {line:?} in {}", path.display())]
    InvalidPid { path: PathBuf, line: String },

    #[error("couldn't read tcp stats of pid {pid} from {}: {source}", path.display())]
    UnreadableTable {
        pid: u32,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TCP stats line in {}: {line:?}", path.display())]
    InvalidTcpState { path: PathBuf, line: String },

    #[error("no process found for pod {pod}")]
    NoProcess { pod: String },

    #[error("pod snapshot lock poisoned")]
    SnapshotPoisoned,
}

impl Error {
    /// Whether this is the expected transient state of a container whose
    /// cgroup has not been created yet or was already removed
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::CgroupNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
