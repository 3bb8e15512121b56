//! Core data models for the exporter

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kubernetes QoS class of a pod
///
/// The set is fixed by the platform, so each class maps directly onto its
/// own cgroup subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QosClass {
    Guaranteed,
    BestEffort,
    Burstable,
}

impl QosClass {
    /// Subdirectory under `kubepods` holding pods of this class
    pub fn cgroup_subdir(&self) -> Option<&'static str> {
        match self {
            QosClass::Guaranteed => None,
            QosClass::BestEffort => Some("besteffort"),
            QosClass::Burstable => Some("burstable"),
        }
    }
}

impl FromStr for QosClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "guaranteed" => Ok(QosClass::Guaranteed),
            "besteffort" => Ok(QosClass::BestEffort),
            "burstable" => Ok(QosClass::Burstable),
            _ => Err(Error::InvalidQosClass(s.to_string())),
        }
    }
}

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// A pod scheduled on the local node, as reported by the workload lister
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    /// Raw QoS class string from the pod status
    pub qos_class: String,
    pub phase: PodPhase,
    /// Runtime-qualified container IDs, e.g. `docker://<hex>`
    pub container_ids: Vec<String>,
}

impl Workload {
    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }
}

/// A container and the processes found in its cgroup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerData {
    /// Container ID with the runtime scheme stripped
    pub id: String,
    pub pids: Vec<u32>,
}

/// Snapshot entry for a single pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodData {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub qos: QosClass,
    pub containers: Vec<ContainerData>,
}

impl PodData {
    pub fn new(
        uid: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        qos: QosClass,
    ) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            namespace: namespace.into(),
            qos,
            containers: Vec::new(),
        }
    }

    /// First pid of the first container that has any, in container order
    pub fn one_pid(&self) -> Option<u32> {
        self.containers
            .iter()
            .find_map(|c| c.pids.first().copied())
    }
}

/// Count of TCP connections per state for one address family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpStat {
    pub established: u64,
    pub syn_sent: u64,
    pub syn_recv: u64,
    pub fin_wait1: u64,
    pub fin_wait2: u64,
    pub time_wait: u64,
    pub close: u64,
    pub close_wait: u64,
    pub last_ack: u64,
    pub listen: u64,
    pub closing: u64,
}

impl TcpStat {
    /// Counters paired with their exposition label, in kernel state order
    pub fn by_state(&self) -> [(&'static str, u64); 11] {
        [
            ("established", self.established),
            ("synsent", self.syn_sent),
            ("synrecv", self.syn_recv),
            ("finwait1", self.fin_wait1),
            ("finwait2", self.fin_wait2),
            ("timewait", self.time_wait),
            ("close", self.close),
            ("closewait", self.close_wait),
            ("lastack", self.last_ack),
            ("listen", self.listen),
            ("closing", self.closing),
        ]
    }

    pub fn total(&self) -> u64 {
        self.by_state().iter().map(|(_, v)| v).sum()
    }
}

/// TCP stats for both address families of a network namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub tcp: TcpStat,
    pub tcp6: TcpStat,
}

/// Per-pod output record of a stats query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStats {
    pub pod_name: String,
    pub namespace: String,
    pub network: NetworkStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, pids: &[u32]) -> ContainerData {
        ContainerData {
            id: id.to_string(),
            pids: pids.to_vec(),
        }
    }

    #[test]
    fn test_qos_class_parse() {
        assert_eq!("Guaranteed".parse::<QosClass>().unwrap(), QosClass::Guaranteed);
        assert_eq!("BestEffort".parse::<QosClass>().unwrap(), QosClass::BestEffort);
        assert_eq!("best-effort".parse::<QosClass>().unwrap(), QosClass::BestEffort);
        assert_eq!("burstable".parse::<QosClass>().unwrap(), QosClass::Burstable);
    }

    #[test]
    fn test_qos_class_parse_invalid() {
        let err = "Premium".parse::<QosClass>().unwrap_err();
        assert!(matches!(err, Error::InvalidQosClass(ref s) if s == "Premium"));
        assert!("".parse::<QosClass>().is_err());
    }

    #[test]
    fn test_pod_phase_from_str() {
        assert_eq!(PodPhase::from("Running"), PodPhase::Running);
        assert_eq!(PodPhase::from("Pending"), PodPhase::Pending);
        assert_eq!(PodPhase::from("Evicted"), PodPhase::Unknown);
    }

    #[test]
    fn test_one_pid_skips_empty_containers() {
        let mut pod = PodData::new("uid", "foo", "default", QosClass::Guaranteed);
        pod.containers.push(container("a", &[]));
        pod.containers.push(container("b", &[2, 3]));

        assert_eq!(pod.one_pid(), Some(2));
    }

    #[test]
    fn test_one_pid_none_without_pids() {
        let mut pod = PodData::new("uid", "foo", "default", QosClass::Burstable);
        assert_eq!(pod.one_pid(), None);

        pod.containers.push(container("a", &[]));
        pod.containers.push(container("b", &[]));
        assert_eq!(pod.one_pid(), None);
    }

    #[test]
    fn test_tcp_stat_total() {
        let stat = TcpStat {
            established: 3,
            listen: 2,
            time_wait: 1,
            ..Default::default()
        };

        assert_eq!(stat.total(), 6);
        assert_eq!(stat.by_state()[0], ("established", 3));
        assert_eq!(stat.by_state()[9], ("listen", 2));
    }
}
