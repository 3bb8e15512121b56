//! Pod discovery and process snapshot building
//!
//! Turns the pods reported by a [`WorkloadLister`] into a snapshot of
//! pod -> container -> pid mappings by walking each container's cgroup.

use super::cgroup::{parse_container_id, CgroupResolver};
use crate::error::Result;
use crate::models::{ContainerData, PodData, QosClass, Workload};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Snapshot of running pods keyed by pod UID
pub type PodSnapshot = BTreeMap<String, PodData>;

/// Lists the pods scheduled on the local node
#[async_trait]
pub trait WorkloadLister: Send + Sync {
    async fn list(&self) -> Result<Vec<Workload>>;
}

/// Outcome of a snapshot build over one pod listing
#[derive(Debug, Default)]
pub struct BuildResults {
    pub pods: PodSnapshot,
    /// Pods skipped because they are not in the running phase
    pub skipped_count: usize,
    /// Pods dropped from the snapshot because their build failed
    pub error_count: usize,
}

/// Builds pod snapshots from cgroup `tasks` files
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    resolver: CgroupResolver,
}

impl SnapshotBuilder {
    pub fn new(resolver: CgroupResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &CgroupResolver {
        &self.resolver
    }

    /// Build a snapshot from a pod listing
    ///
    /// Non-running pods are skipped. A pod whose build fails is logged and
    /// left out so the remaining pods are still reported.
    pub async fn build(&self, workloads: &[Workload]) -> BuildResults {
        let mut results = BuildResults::default();

        for workload in workloads {
            if !workload.is_running() {
                results.skipped_count += 1;
                continue;
            }

            match self.build_pod(workload).await {
                Ok(pod) => {
                    results.pods.insert(pod.uid.clone(), pod);
                }
                Err(e) => {
                    results.error_count += 1;
                    warn!(
                        pod = %workload.name,
                        namespace = %workload.namespace,
                        uid = %workload.uid,
                        error = %e,
                        "Failed to build pod data"
                    );
                }
            }
        }

        results
    }

    /// Build the container and pid data of a single pod, preserving
    /// container order
    pub async fn build_pod(&self, workload: &Workload) -> Result<PodData> {
        let qos: QosClass = workload.qos_class.parse()?;
        let mut pod = PodData::new(&workload.uid, &workload.name, &workload.namespace, qos);

        for container_id in &workload.container_ids {
            let container = self.build_container(qos, &workload.uid, container_id).await?;
            pod.containers.push(container);
        }

        Ok(pod)
    }

    /// Resolve a container's cgroup and read its pids
    ///
    /// A missing cgroup is not an error: the container contributes no pids.
    pub async fn build_container(
        &self,
        qos: QosClass,
        pod_uid: &str,
        container_id: &str,
    ) -> Result<ContainerData> {
        let id = parse_container_id(container_id).to_string();

        let pids = match self.read_pids(qos, pod_uid, &id).await {
            Ok(pids) => pids,
            Err(e) if e.is_not_found() => {
                debug!(
                    pod_uid = %pod_uid,
                    container_id = %id,
                    error = %e,
                    "Container cgroup not present"
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        Ok(ContainerData { id, pids })
    }

    async fn read_pids(
        &self,
        qos: QosClass,
        pod_uid: &str,
        container_id: &str,
    ) -> Result<Vec<u32>> {
        let cgroup_path = self.resolver.resolve(qos, pod_uid, container_id).await?;
        self.resolver.read_tasks(&cgroup_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::PodPhase;
    use tempfile::TempDir;
    use tokio::fs;

    fn workload(
        uid: &str,
        name: &str,
        qos: &str,
        phase: PodPhase,
        containers: &[&str],
    ) -> Workload {
        Workload {
            uid: uid.to_string(),
            name: name.to_string(),
            namespace: "default".to_string(),
            qos_class: qos.to_string(),
            phase,
            container_ids: containers.iter().map(|c| c.to_string()).collect(),
        }
    }

    async fn write_tasks(
        resolver: &CgroupResolver,
        qos: QosClass,
        uid: &str,
        id: &str,
        content: &str,
    ) {
        let path = resolver.container_path(qos, uid, id);
        fs::create_dir_all(&path).await.unwrap();
        fs::write(path.join("tasks"), content).await.unwrap();
    }

    #[tokio::test]
    async fn test_build_pod_preserves_container_order() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = CgroupResolver::new(temp_dir.path());
        write_tasks(&resolver, QosClass::Burstable, "p1", "bbb", "5\n").await;
        write_tasks(&resolver, QosClass::Burstable, "p1", "aaa", "4\n6\n").await;

        let builder = SnapshotBuilder::new(resolver);
        let workload = workload(
            "p1",
            "web",
            "Burstable",
            PodPhase::Running,
            &["docker://bbb", "docker://aaa"],
        );
        let pod = builder.build_pod(&workload).await.unwrap();

        assert_eq!(pod.qos, QosClass::Burstable);
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[0].id, "bbb");
        assert_eq!(pod.containers[0].pids, vec![5]);
        assert_eq!(pod.containers[1].id, "aaa");
        assert_eq!(pod.containers[1].pids, vec![4, 6]);
        assert_eq!(pod.one_pid(), Some(5));
    }

    #[tokio::test]
    async fn test_build_container_missing_cgroup_has_no_pids() {
        let temp_dir = TempDir::new().unwrap();
        let builder = SnapshotBuilder::new(CgroupResolver::new(temp_dir.path()));

        let container = builder
            .build_container(QosClass::BestEffort, "p1", "containerd://abc")
            .await
            .unwrap();

        assert_eq!(container.id, "abc");
        assert!(container.pids.is_empty());
    }

    #[tokio::test]
    async fn test_build_container_empty_tasks() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = CgroupResolver::new(temp_dir.path());
        write_tasks(&resolver, QosClass::Guaranteed, "p1", "abc", "").await;

        let builder = SnapshotBuilder::new(resolver);
        let container = builder
            .build_container(QosClass::Guaranteed, "p1", "abc")
            .await
            .unwrap();

        assert!(container.pids.is_empty());
    }

    #[tokio::test]
    async fn test_build_pod_invalid_tasks_fails() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = CgroupResolver::new(temp_dir.path());
        write_tasks(&resolver, QosClass::Guaranteed, "p1", "abc", "1\nnot-a-pid\n").await;

        let builder = SnapshotBuilder::new(resolver);
        let err = builder
            .build_pod(&workload("p1", "web", "Guaranteed", PodPhase::Running, &["abc"]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidPid { .. }));
    }

    #[tokio::test]
    async fn test_build_pod_invalid_qos_fails() {
        let temp_dir = TempDir::new().unwrap();
        let builder = SnapshotBuilder::new(CgroupResolver::new(temp_dir.path()));

        let err = builder
            .build_pod(&workload("p1", "web", "Premium", PodPhase::Running, &["abc"]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidQosClass(_)));
    }

    #[tokio::test]
    async fn test_build_isolates_failed_pods() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = CgroupResolver::new(temp_dir.path());
        write_tasks(&resolver, QosClass::Guaranteed, "good", "c1", "10\n").await;
        write_tasks(&resolver, QosClass::Guaranteed, "bad", "c2", "garbage\n").await;

        let builder = SnapshotBuilder::new(resolver);
        let results = builder
            .build(&[
                workload("good", "good-pod", "Guaranteed", PodPhase::Running, &["c1"]),
                workload("bad", "bad-pod", "Guaranteed", PodPhase::Running, &["c2"]),
                workload("done", "done-pod", "Guaranteed", PodPhase::Succeeded, &["c3"]),
            ])
            .await;

        assert_eq!(results.pods.len(), 1);
        assert_eq!(results.pods["good"].one_pid(), Some(10));
        assert_eq!(results.error_count, 1);
        assert_eq!(results.skipped_count, 1);
    }
}
