//! End-of-run flow report.
//!
//! Built from a closed [`FlowRegistry`] without mutating it, so generating
//! the report twice yields identical output.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ExperimentConfig;
use crate::flow::{FiveTuple, FlowRecord, FlowRegistry};
use crate::topology::{Role, Topology};

/// File name of the structured statistics artifact.
pub const FLOW_STATS_FILE: &str = "flow-stats.json";

/// Errors raised while persisting or loading a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Average bit rate of `rx_bytes` over the active traffic period.
///
/// `None` ("undefined") when the period is absent or empty.
pub fn throughput_bps(rx_bytes: u64, active_period: Option<Duration>) -> Option<f64> {
    let seconds = active_period?.as_secs_f64();
    if seconds <= 0.0 {
        return None;
    }
    Some(rx_bytes as f64 * 8.0 / seconds)
}

/// Statistics of one flow as reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub flow_id: u32,
    pub tuple: FiveTuple,
    pub source_role: Role,
    pub destination_role: Role,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub echo_replies: u64,
    /// Bits per second over the active period, None when undefined
    pub throughput_bps: Option<f64>,
    /// Delivered / transmitted
    pub delivery_ratio: f64,
    /// (Transmitted - delivered) / transmitted
    pub loss_ratio: f64,
    pub mean_delay_ms: Option<f64>,
    pub mean_jitter_ms: Option<f64>,
    pub delay_sum_ns: u64,
    pub jitter_sum_ns: u64,
    pub time_first_tx_ns: Option<u64>,
    pub time_last_tx_ns: Option<u64>,
    pub time_first_rx_ns: Option<u64>,
    pub time_last_rx_ns: Option<u64>,
}

impl FlowSummary {
    fn from_record(record: &FlowRecord, topology: &Topology, period: Option<Duration>) -> Self {
        let stats = &record.stats;
        let ratio = |part: u64| {
            if stats.tx_packets == 0 {
                0.0
            } else {
                part as f64 / stats.tx_packets as f64
            }
        };
        let per_delivery = |total: Duration| {
            (stats.rx_packets > 0).then(|| total.as_secs_f64() * 1e3 / stats.rx_packets as f64)
        };

        Self {
            flow_id: record.id.0,
            tuple: record.tuple,
            source_role: topology.role_of(record.tuple.source),
            destination_role: topology.role_of(record.tuple.destination),
            tx_packets: stats.tx_packets,
            rx_packets: stats.rx_packets,
            lost_packets: stats.lost_packets,
            tx_bytes: stats.tx_bytes,
            rx_bytes: stats.rx_bytes,
            echo_replies: stats.echo_replies,
            throughput_bps: throughput_bps(stats.rx_bytes, period),
            delivery_ratio: ratio(stats.rx_packets),
            loss_ratio: ratio(stats.tx_packets.saturating_sub(stats.rx_packets)),
            mean_delay_ms: per_delivery(stats.delay_sum),
            mean_jitter_ms: per_delivery(stats.jitter_sum),
            delay_sum_ns: nanos(stats.delay_sum),
            jitter_sum_ns: nanos(stats.jitter_sum),
            time_first_tx_ns: stats.time_first_tx.map(nanos),
            time_last_tx_ns: stats.time_last_tx.map(nanos),
            time_first_rx_ns: stats.time_first_rx.map(nanos),
            time_last_rx_ns: stats.time_last_rx.map(nanos),
        }
    }

    /// Header line identifying the flow with role labels.
    pub fn headline(&self) -> String {
        format!(
            "Flow {} ({}:{} -> {}:{})",
            self.flow_id,
            self.source_role,
            self.tuple.source_port,
            self.destination_role,
            self.tuple.destination_port
        )
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Totals across all flows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowTotals {
    pub flows: usize,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub rx_bytes: u64,
    pub throughput_bps: Option<f64>,
}

/// Complete statistics set of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowReport {
    pub observation_window_secs: f64,
    /// Throughput denominator, None for a degenerate window
    pub active_period_secs: Option<f64>,
    pub totals: FlowTotals,
    pub flows: Vec<FlowSummary>,
}

impl FlowReport {
    /// Builds the report by walking the registry in flow-identity order.
    pub fn generate(
        registry: &FlowRegistry,
        topology: &Topology,
        config: &ExperimentConfig,
    ) -> Self {
        if !registry.is_closed() {
            tracing::warn!("Generating report from a registry whose window is still open");
        }

        let period = config.throughput_window();
        if period.is_none() {
            tracing::warn!(
                "Observation window {:?} does not exceed warm-up offset {:?}; throughput undefined",
                config.observation_window,
                config.traffic.warmup_offset
            );
        }

        let flows: Vec<FlowSummary> = registry
            .flows()
            .map(|record| FlowSummary::from_record(record, topology, period))
            .collect();

        let mut totals = FlowTotals {
            flows: flows.len(),
            ..Default::default()
        };
        for flow in &flows {
            totals.tx_packets += flow.tx_packets;
            totals.rx_packets += flow.rx_packets;
            totals.lost_packets += flow.lost_packets;
            totals.rx_bytes += flow.rx_bytes;
        }
        totals.throughput_bps = throughput_bps(totals.rx_bytes, period);

        Self {
            observation_window_secs: config.observation_window.as_secs_f64(),
            active_period_secs: period.map(|p| p.as_secs_f64()),
            totals,
            flows,
        }
    }

    /// Human-readable rendering, throughput in Kbps.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Flow monitor results:");

        for flow in &self.flows {
            let _ = writeln!(out, "{}", flow.headline());
            let _ = writeln!(out, "  Five-tuple: {}", flow.tuple);
            let _ = writeln!(out, "  Tx Packets: {}", flow.tx_packets);
            let _ = writeln!(out, "  Rx Packets: {}", flow.rx_packets);
            let _ = writeln!(out, "  Lost Packets: {}", flow.lost_packets);
            let _ = writeln!(out, "  Throughput: {}", format_kbps(flow.throughput_bps));
        }

        let _ = writeln!(
            out,
            "Totals: {} flows, tx={} rx={} lost={}, aggregate throughput {}",
            self.totals.flows,
            self.totals.tx_packets,
            self.totals.rx_packets,
            self.totals.lost_packets,
            format_kbps(self.totals.throughput_bps)
        );
        out
    }

    /// Emits every report line through tracing at info level.
    pub fn log_summary(&self) {
        for flow in &self.flows {
            tracing::info!(
                "{}: tx={} rx={} lost={} throughput={}",
                flow.headline(),
                flow.tx_packets,
                flow.rx_packets,
                flow.lost_packets,
                format_kbps(flow.throughput_bps)
            );
        }
    }

    /// Persists the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// - `ReportError::Io` - File could not be created or written
    /// - `ReportError::Serialization` - Report could not be encoded
    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a report previously written by [`FlowReport::write_json`].
    ///
    /// # Errors
    ///
    /// - `ReportError::Io` - File could not be opened
    /// - `ReportError::Serialization` - Content is not a valid report
    pub fn read_json(path: &Path) -> Result<Self, ReportError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn format_kbps(bps: Option<f64>) -> String {
    match bps {
        Some(bps) => format!("{:.2} Kbps", bps / 1000.0),
        None => "undefined".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{PacketObservation, PacketOutcome};

    fn populated(topology: &Topology) -> FlowRegistry {
        let mut registry = FlowRegistry::new();
        let client = topology.endpoints()[0].address;
        let ap = topology.ap_address();
        let uplink = FiveTuple::udp(client, 49153, ap, 9);
        let downlink = FiveTuple::udp(ap, 49153, client, 10);

        for (uid, tuple) in [(0, uplink), (1, downlink), (2, uplink)] {
            registry.observe(PacketObservation {
                tuple,
                packet_uid: uid,
                bytes: 540,
                time: Duration::from_secs(2),
                outcome: PacketOutcome::Sent,
            });
        }
        registry.observe(PacketObservation {
            tuple: uplink,
            packet_uid: 0,
            bytes: 540,
            time: Duration::from_millis(2001),
            outcome: PacketOutcome::Delivered,
        });
        registry.close();
        registry
    }

    #[test]
    fn test_throughput_formula() {
        let bps = throughput_bps(18_000, Some(Duration::from_secs(18))).unwrap();
        assert!((bps - 8_000.0).abs() < 1e-9);
        assert_eq!(throughput_bps(18_000, None), None);
        assert_eq!(throughput_bps(18_000, Some(Duration::ZERO)), None);
    }

    #[test]
    fn test_report_labels_roles() {
        let topology = Topology::builder(10).build().unwrap();
        let registry = populated(&topology);
        let report = FlowReport::generate(&registry, &topology, &ExperimentConfig::for_testing());

        assert_eq!(report.flows.len(), 2);
        let uplink = &report.flows[0];
        assert_eq!(uplink.flow_id, 1);
        assert_eq!(uplink.source_role, Role::Client);
        assert_eq!(uplink.destination_role, Role::AccessPoint);
        assert_eq!(uplink.tx_packets, 2);
        assert_eq!(uplink.rx_packets, 1);
        assert_eq!(uplink.lost_packets, 1);
        assert_eq!(uplink.delivery_ratio, 0.5);
        assert_eq!(uplink.headline(), "Flow 1 (Client:49153 -> AccessPoint:9)");

        let downlink = &report.flows[1];
        assert_eq!(downlink.source_role, Role::AccessPoint);
        assert_eq!(downlink.mean_delay_ms, None);
        assert_eq!(report.totals.tx_packets, 3);
    }

    #[test]
    fn test_degenerate_window_reports_undefined() {
        let topology = Topology::builder(10).build().unwrap();
        let registry = populated(&topology);
        let mut config = ExperimentConfig::for_testing();
        config.observation_window = Duration::from_secs(2);

        let report = FlowReport::generate(&registry, &topology, &config);
        assert!(report.flows.iter().all(|f| f.throughput_bps.is_none()));
        assert_eq!(report.active_period_secs, None);
        assert!(report.render_text().contains("Throughput: undefined"));
    }

    #[test]
    fn test_report_generation_is_idempotent() {
        let topology = Topology::builder(10).build().unwrap();
        let registry = populated(&topology);
        let config = ExperimentConfig::for_testing();

        let first = FlowReport::generate(&registry, &topology, &config);
        let second = FlowReport::generate(&registry, &topology, &config);
        assert_eq!(first, second);
        assert_eq!(first.render_text(), second.render_text());
    }

    #[test]
    fn test_json_artifact_reparses() {
        let topology = Topology::builder(10).build().unwrap();
        let registry = populated(&topology);
        let report = FlowReport::generate(&registry, &topology, &ExperimentConfig::for_testing());

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(FLOW_STATS_FILE);
        report.write_json(&path).unwrap();

        let loaded = FlowReport::read_json(&path).unwrap();
        assert_eq!(loaded.flows.len(), report.flows.len());
        assert_eq!(loaded.flows[0].tuple, report.flows[0].tuple);
        assert_eq!(loaded.totals.rx_bytes, report.totals.rx_bytes);
    }
}
