//! TCP connection-state collection from procfs
//!
//! Parses the kernel's `net/tcp` and `net/tcp6` tables as seen from a
//! process's network namespace (`/proc/<pid>/net/tcp[6]`) into per-state
//! connection counts.

use crate::error::{Error, Result};
use crate::models::{NetworkStats, PodData, TcpStat};
use std::fs;
use std::path::{Path, PathBuf};

/// Source of per-process network stats
pub trait NetworkStatsProvider: Send + Sync {
    /// Collect IPv4 and IPv6 TCP stats for the network namespace of `pid`
    fn stats(&self, pid: u32) -> Result<NetworkStats>;
}

/// Reads connection tables from a procfs mounted under the host root
#[derive(Debug, Clone)]
pub struct ProcNetworkStats {
    proc_path: PathBuf,
}

impl ProcNetworkStats {
    /// Create a provider reading `<rootfs>/proc`
    pub fn new(rootfs: impl AsRef<Path>) -> Self {
        Self {
            proc_path: rootfs.as_ref().join("proc"),
        }
    }

    fn table_path(&self, pid: u32, table: &str) -> PathBuf {
        self.proc_path.join(pid.to_string()).join("net").join(table)
    }

    fn read_table(&self, pid: u32, table: &str) -> Result<TcpStat> {
        let path = self.table_path(pid, table);
        let content = fs::read_to_string(&path).map_err(|source| Error::UnreadableTable {
            pid,
            path: path.clone(),
            source,
        })?;

        parse_tcp_table(&content, &path)
    }
}

impl NetworkStatsProvider for ProcNetworkStats {
    fn stats(&self, pid: u32) -> Result<NetworkStats> {
        Ok(NetworkStats {
            tcp: self.read_table(pid, "tcp")?,
            tcp6: self.read_table(pid, "tcp6")?,
        })
    }
}

/// Collect network stats for a pod through its first known process
pub fn pod_network_stats(
    provider: &dyn NetworkStatsProvider,
    pod: &PodData,
) -> Result<NetworkStats> {
    let pid = pod.one_pid().ok_or_else(|| Error::NoProcess {
        pod: format!("{}/{}", pod.namespace, pod.name),
    })?;

    provider.stats(pid)
}

/// Parse a `net/tcp` or `net/tcp6` table into state counts
///
/// The first line is a header. The connection state is the 4th column:
///
/// ```text
///   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
///    0: 00000000:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 12345
/// ```
///
/// An unknown state code fails the whole table; partial counts are never
/// returned.
pub fn parse_tcp_table(content: &str, path: &Path) -> Result<TcpStat> {
    let mut stat = TcpStat::default();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }

        let state = fields.get(3).copied().unwrap_or_default();
        match state_counter(&mut stat, state) {
            Some(counter) => *counter += 1,
            None => {
                return Err(Error::InvalidTcpState {
                    path: path.to_path_buf(),
                    line: line.to_string(),
                })
            }
        }
    }

    Ok(stat)
}

/// Map a two-hex-digit kernel state code (include/net/tcp_states.h) to
/// its counter
fn state_counter<'a>(stat: &'a mut TcpStat, code: &str) -> Option<&'a mut u64> {
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    match u8::from_str_radix(code, 16).ok()? {
        0x01 => Some(&mut stat.established),
        0x02 => Some(&mut stat.syn_sent),
        0x03 => Some(&mut stat.syn_recv),
        0x04 => Some(&mut stat.fin_wait1),
        0x05 => Some(&mut stat.fin_wait2),
        0x06 => Some(&mut stat.time_wait),
        0x07 => Some(&mut stat.close),
        0x08 => Some(&mut stat.close_wait),
        0x09 => Some(&mut stat.last_ack),
        0x0A => Some(&mut stat.listen),
        0x0B => Some(&mut stat.closing),
        _ => None,
    }
}
