//! cgroup path resolution for pod containers
//!
//! Maps a pod's QoS class, UID and container ID onto the container's
//! directory in the cgroup v1 `cpu` controller hierarchy and reads the
//! pids listed in its `tasks` file.

use crate::error::{Error, Result};
use crate::models::QosClass;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// kubepods hierarchy relative to the host root filesystem
const KUBEPODS_CGROUP: &str = "sys/fs/cgroup/cpu/kubepods";

/// File listing the pids attached to a cgroup
const TASKS_FILE: &str = "tasks";

/// Remove the runtime scheme prefix from a container ID
///
/// `docker://999a54e3...` becomes `999a54e3...`; IDs without a scheme are
/// returned unchanged.
pub fn parse_container_id(id: &str) -> &str {
    match id.find("://") {
        Some(i) => &id[i + 3..],
        None => id,
    }
}

/// Resolves container cgroup directories under a host root filesystem
#[derive(Debug, Clone)]
pub struct CgroupResolver {
    /// Host root filesystem as mounted into the exporter (typically /rootfs)
    rootfs: PathBuf,
}

impl CgroupResolver {
    pub fn new(rootfs: impl Into<PathBuf>) -> Self {
        Self {
            rootfs: rootfs.into(),
        }
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    /// Build the cgroup directory path for a container without touching
    /// the filesystem
    pub fn container_path(&self, qos: QosClass, pod_uid: &str, container_id: &str) -> PathBuf {
        let mut path = self.rootfs.join(KUBEPODS_CGROUP);
        if let Some(subdir) = qos.cgroup_subdir() {
            path.push(subdir);
        }
        path.push(format!("pod{}", pod_uid));
        path.push(container_id);
        path
    }

    /// Resolve and verify the cgroup directory of a container
    ///
    /// Returns [`Error::CgroupNotFound`] when the directory does not exist,
    /// which happens while a container is starting or being torn down.
    pub async fn resolve(
        &self,
        qos: QosClass,
        pod_uid: &str,
        container_id: &str,
    ) -> Result<PathBuf> {
        let path = self.container_path(qos, pod_uid, container_id);

        match fs::metadata(&path).await {
            Ok(_) => Ok(path),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::CgroupNotFound { path }),
            Err(source) => Err(Error::Io { path, source }),
        }
    }

    /// Read the pids attached to a container cgroup
    pub async fn read_tasks(&self, cgroup_path: &Path) -> Result<Vec<u32>> {
        let tasks_file = cgroup_path.join(TASKS_FILE);
        let content = match fs::read_to_string(&tasks_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::CgroupNotFound {
                    path: cgroup_path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(Error::Io {
                    path: tasks_file,
                    source,
                })
            }
        };

        let pids = parse_tasks(&content, &tasks_file)?;
        if pids.is_empty() {
            warn!(
                path = %cgroup_path.display(),
                content = %content.trim(),
                "No pid found in cgroup tasks"
            );
        }

        Ok(pids)
    }
}

/// Parse the contents of a cgroup `tasks` file
///
/// One decimal pid per line; blank lines are ignored and anything else is
/// an error.
pub fn parse_tasks(content: &str, path: &Path) -> Result<Vec<u32>> {
    let mut pids = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.parse::<u32>() {
            Ok(pid) if pid > 0 => pids.push(pid),
            _ => {
                return Err(Error::InvalidPid {
                    path: path.to_path_buf(),
                    line: line.to_string(),
                })
            }
        }
    }

    Ok(pids)
}
