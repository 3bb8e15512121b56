//! Kubernetes pod lister scoped to the local node
//!
//! Keeps a reflector store of the pods scheduled on this node, fed by a
//! watch on `spec.nodeName`, and serves listings from the local store.

use async_trait::async_trait;
use exporter_lib::{Error, PodPhase, Result, Workload, WorkloadLister};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::Store;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lists pods on one node from a watch-backed local cache
pub struct KubeWorkloadLister {
    store: Store<Pod>,
    synced: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl KubeWorkloadLister {
    /// Start watching pods scheduled on `node_name`
    pub fn new(client: Client, node_name: &str) -> Self {
        let pods: Api<Pod> = Api::all(client);
        let config = watcher::Config::default().fields(&format!("spec.nodeName={}", node_name));
        let (store, writer) = reflector::store();
        let synced = Arc::new(AtomicBool::new(false));

        let mut stream = reflector(writer, watcher(pods, config))
            .default_backoff()
            .boxed();
        let task_synced = synced.clone();
        let node = node_name.to_string();

        let task = tokio::spawn(async move {
            info!(node = %node, "Starting pod watcher");
            while let Some(event) = stream.next().await {
                match event {
                    Ok(watcher::Event::Restarted(pods)) => {
                        if !task_synced.swap(true, Ordering::AcqRel) {
                            info!(pods = pods.len(), "Pod watcher initial sync complete");
                        } else {
                            debug!(pods = pods.len(), "Pod watcher resynced");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Pod watch failed, retrying"),
                }
            }
            warn!("Pod watch stream ended");
        });

        Self {
            store,
            synced,
            task,
        }
    }
}

impl Drop for KubeWorkloadLister {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl WorkloadLister for KubeWorkloadLister {
    async fn list(&self) -> Result<Vec<Workload>> {
        if !self.synced.load(Ordering::Acquire) {
            return Err(Error::Listing("pod cache not synced yet".to_string()));
        }

        Ok(self
            .store
            .state()
            .iter()
            .filter_map(|pod| workload_from_pod(pod))
            .collect())
    }
}

/// Convert a pod object into a workload; pods without a UID are ignored
pub fn workload_from_pod(pod: &Pod) -> Option<Workload> {
    let uid = pod.metadata.uid.clone().filter(|uid| !uid.is_empty())?;
    let status = pod.status.as_ref();

    let container_ids = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|cs| cs.container_id.clone())
                .filter(|id| !id.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some(Workload {
        uid,
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        qos_class: status
            .and_then(|s| s.qos_class.clone())
            .unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.as_deref())
            .map(PodPhase::from)
            .unwrap_or(PodPhase::Unknown),
        container_ids,
    })
}
