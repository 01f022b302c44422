//! Host gauges sampled alongside a run.
//!
//! Tracks CPU load, memory use, NIC counters and TCP health so
//! throughput numbers can be read against what the machine itself was
//! doing.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sysinfo::{Networks, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::MetricsCollector;

const MIB: f64 = 1024.0 * 1024.0;

/// One reading of host-level gauges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemGauges {
    /// Global CPU usage (0.0 - 100.0)
    pub cpu_usage_pct: f32,
    pub memory_used_pct: f64,
    pub memory_used_bytes: u64,
    /// Cumulative counters across all interfaces
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Sent + received since the previous reading, per second
    pub network_mb_per_sec: f64,
    /// Established TCP connections; `None` where the kernel does not
    /// expose `/proc/net/snmp`
    pub tcp_active_connections: Option<u64>,
    /// Cumulative TCP segments retransmitted
    pub tcp_retransmits: Option<u64>,
}

/// Stateful reader; the first CPU figure is zero since sysinfo needs two refreshes.
pub struct GaugeReader {
    system: System,
    networks: Networks,
}

impl GaugeReader {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
        }
    }

    /// Refresh and read. `interval` is the time since the previous call,
    /// used to turn the NIC deltas into a rate.
    pub fn read(&mut self, interval: Duration) -> SystemGauges {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.networks.refresh();

        let total_memory = self.system.total_memory();
        let used_memory = self.system.used_memory();

        let mut gauges = SystemGauges {
            cpu_usage_pct: self.system.global_cpu_info().cpu_usage(),
            memory_used_pct: if total_memory > 0 {
                used_memory as f64 / total_memory as f64 * 100.0
            } else {
                0.0
            },
            memory_used_bytes: used_memory,
            ..SystemGauges::default()
        };

        let mut delta_bytes = 0u64;
        for (_name, data) in &self.networks {
            gauges.bytes_sent += data.total_transmitted();
            gauges.bytes_received += data.total_received();
            gauges.packets_sent += data.total_packets_transmitted();
            gauges.packets_received += data.total_packets_received();
            delta_bytes += data.transmitted() + data.received();
        }

        let secs = interval.as_secs_f64();
        if secs > 0.0 {
            gauges.network_mb_per_sec = delta_bytes as f64 / MIB / secs;
        }

        if let Some(tcp) = read_tcp_counters() {
            gauges.tcp_active_connections = Some(tcp.curr_estab);
            gauges.tcp_retransmits = Some(tcp.retrans_segs);
        }

        gauges
    }
}

// ─── TCP counters ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TcpCounters {
    curr_estab: u64,
    retrans_segs: u64,
}

#[cfg(target_os = "linux")]
fn read_tcp_counters() -> Option<TcpCounters> {
    let raw = std::fs::read_to_string("/proc/net/snmp").ok()?;
    parse_snmp_tcp(&raw)
}

#[cfg(not(target_os = "linux"))]
fn read_tcp_counters() -> Option<TcpCounters> {
    None
}

/// Pull `CurrEstab` and `RetransSegs` out of the two `Tcp:` lines of
/// `/proc/net/snmp` (header row, then value row).
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_snmp_tcp(raw: &str) -> Option<TcpCounters> {
    let mut rows = raw.lines().filter(|l| l.starts_with("Tcp:"));
    let header: Vec<&str> = rows.next()?.split_whitespace().collect();
    let values: Vec<&str> = rows.next()?.split_whitespace().collect();

    let field = |name: &str| -> Option<u64> {
        let idx = header.iter().position(|h| *h == name)?;
        values.get(idx)?.parse().ok()
    };
    Some(TcpCounters {
        curr_estab: field("CurrEstab")?,
        retrans_segs: field("RetransSegs")?,
    })
}

impl Default for GaugeReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task pushing a gauge reading into the collector every tick.
pub struct SystemSampler {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SystemSampler {
    pub fn spawn(collector: Arc<MetricsCollector>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut reader = GaugeReader::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let gauges = reader.read(interval);
                        collector.update_gauges(gauges);
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::debug!("system sampler stopped");
        });

        Self { stop_tx, handle }
    }

    /// Stop sampling and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}
