//! End-to-end experiment scenarios

use std::time::Duration;

use apnet_core::ApnetError;
use apnet_core::config::{ConfigError, ExperimentConfig, MAX_PACKET_SIZE};
use apnet_core::report::FlowReport;
use apnet_core::topology::Role;
use apnet_sim::{Experiment, ExperimentError};
use proptest::prelude::*;

fn reference_config() -> ExperimentConfig {
    let mut config = ExperimentConfig::for_testing();
    config.topology.node_count = 10;
    config.topology.ap_index = Some(9);
    config.traffic.packet_size = 512;
    config.traffic.max_packets = 50;
    config.traffic.interval = Duration::from_millis(100);
    config.observation_window = Duration::from_secs(20);
    config
}

#[test]
fn test_reference_scenario_eighteen_flows() {
    let experiment = Experiment::new(reference_config()).unwrap();
    let outcome = experiment.run().unwrap();
    let report = &outcome.report;

    assert_eq!(report.flows.len(), 18);

    let uplinks = report
        .flows
        .iter()
        .filter(|f| f.source_role == Role::Client && f.destination_role == Role::AccessPoint)
        .count();
    let downlinks = report
        .flows
        .iter()
        .filter(|f| f.source_role == Role::AccessPoint && f.destination_role == Role::Client)
        .count();
    assert_eq!(uplinks, 9);
    assert_eq!(downlinks, 9);

    for flow in &report.flows {
        assert!(flow.tx_packets <= 50);
        assert!(flow.rx_packets <= flow.tx_packets);
        assert!(flow.lost_packets <= flow.tx_packets);
        let throughput = flow.throughput_bps.expect("window exceeds warm-up");
        assert!(throughput >= 0.0);
    }
}

#[test]
fn test_reference_scenario_throughput_value() {
    let experiment = Experiment::new(reference_config()).unwrap();
    let outcome = experiment.run().unwrap();

    // 50 packets of 540 bytes over the 18 s active period
    let expected = 50.0 * 540.0 * 8.0 / 18.0;
    for flow in &outcome.report.flows {
        let throughput = flow.throughput_bps.unwrap();
        assert!((throughput - expected).abs() < 1e-6);
    }
}

#[test]
fn test_out_of_range_ap_rejected_before_construction() {
    let mut config = reference_config();
    config.topology.ap_index = Some(15);

    let result = Experiment::new(config);
    assert!(matches!(
        result,
        Err(ExperimentError::Core(ApnetError::Config(
            ConfigError::ApIndexOutOfRange {
                ap_index: 15,
                node_count: 10
            }
        )))
    ));
}

#[test]
fn test_clamped_ap_runs_normally() {
    let mut config = reference_config();
    config.topology.ap_index = Some(50);

    let experiment = Experiment::new(config.normalized()).unwrap();
    assert_eq!(experiment.topology().access_point().id.0, 9);
    assert_eq!(experiment.run().unwrap().report.flows.len(), 18);
}

#[test]
fn test_short_window_truncates_senders() {
    let mut config = reference_config();
    config.observation_window = Duration::from_secs(4);

    let outcome = Experiment::new(config).unwrap().run().unwrap();

    assert_eq!(outcome.report.flows.len(), 18);
    for flow in &outcome.report.flows {
        assert!(flow.tx_packets < 50);
        assert!(flow.tx_packets >= 1);
    }
}

#[test]
fn test_degenerate_window_reports_undefined_throughput() {
    let mut config = reference_config();
    config.observation_window = Duration::from_secs(2);

    let outcome = Experiment::new(config).unwrap().run().unwrap();

    // Nothing starts strictly before 2 s, so no flows and no throughput
    assert!(outcome.report.flows.is_empty());
    assert_eq!(outcome.report.totals.throughput_bps, None);
    assert!(outcome.report.render_text().contains("undefined"));
}

#[test]
fn test_runs_are_reproducible_under_loss() {
    let mut config = reference_config();
    config.channel.loss_rate = 0.1;
    config.channel.seed = 7;

    let first = Experiment::new(config.clone()).unwrap().run().unwrap();
    let second = Experiment::new(config).unwrap().run().unwrap();

    assert_eq!(first.report, second.report);
    assert_eq!(first.simulation.event_count, second.simulation.event_count);
}

#[test]
fn test_report_generation_is_idempotent() {
    let config = reference_config();
    let experiment = Experiment::new(config.clone()).unwrap();
    let outcome = experiment.run().unwrap();

    let again = FlowReport::generate(&outcome.registry, experiment.topology(), &config);
    assert_eq!(outcome.report, again);
    assert_eq!(outcome.report.render_text(), again.render_text());
}

#[test]
fn test_overloaded_segment_degrades_into_loss() {
    let mut config = reference_config();
    config.topology.node_count = 40;
    config.topology.ap_index = None;
    config.traffic.packet_size = MAX_PACKET_SIZE;
    config.traffic.max_packets = 200;
    config.traffic.interval = Duration::from_millis(1);
    config.observation_window = Duration::from_secs(6);

    let outcome = Experiment::new(config).unwrap().run().unwrap();
    let metrics = &outcome.simulation.metrics;

    assert!(outcome.simulation.success);
    assert!(metrics.queue_drops > 0);
    assert!(outcome.report.totals.lost_packets > 0);
    assert!(outcome.report.totals.rx_packets > 0);
    // Backlog drops keep pending arrivals near the backlog size
    assert!(metrics.peak_queue_depth < 1_000);

    for flow in outcome.registry.flows() {
        let stats = &flow.stats;
        assert_eq!(stats.rx_packets + stats.lost_packets, stats.tx_packets);
    }
}

#[test]
fn test_largest_payload_runs_with_capture() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = reference_config();
    config.traffic.packet_size = MAX_PACKET_SIZE;
    config.traffic.max_packets = 3;
    config.output.pcap = true;

    let experiment = Experiment::new(config).unwrap();
    let outcome = experiment.run().unwrap();
    let artifacts = experiment.write_artifacts(&outcome, dir.path()).unwrap();

    assert_eq!(outcome.report.flows.len(), 18);
    assert!(artifacts.pcap.is_some_and(|path| path.exists()));
}

#[test]
fn test_oversized_payload_rejected() {
    let mut config = reference_config();
    config.traffic.packet_size = u32::MAX;

    assert!(matches!(
        Experiment::new(config),
        Err(ExperimentError::Core(ApnetError::Config(
            ConfigError::InvalidPacketSize { .. }
        )))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_two_flows_per_client(
        (node_count, ap_index) in (10u32..=40).prop_flat_map(|n| (Just(n), 0..n))
    ) {
        let mut config = reference_config();
        config.topology.node_count = node_count;
        config.topology.ap_index = Some(ap_index);
        config.traffic.max_packets = 2;
        // Last AP sender starts at 3 s + 39 * 100 ms
        config.observation_window = Duration::from_secs(8);

        let outcome = Experiment::new(config).unwrap().run().unwrap();
        prop_assert_eq!(outcome.report.flows.len(), 2 * (node_count as usize - 1));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_counters_bounded_for_any_loss(loss in 0.0f64..=1.0, seed in any::<u64>()) {
        let mut config = reference_config();
        config.traffic.max_packets = 10;
        config.observation_window = Duration::from_secs(6);
        config.channel.loss_rate = loss;
        config.channel.seed = seed;

        let outcome = Experiment::new(config).unwrap().run().unwrap();
        prop_assert!(outcome.simulation.success);

        for flow in outcome.registry.flows() {
            let stats = &flow.stats;
            prop_assert!(stats.rx_packets <= stats.tx_packets);
            prop_assert_eq!(stats.rx_packets + stats.lost_packets, stats.tx_packets);
            prop_assert!(stats.echo_replies <= stats.rx_packets);
            prop_assert!(stats.tx_packets <= 10);
        }
    }
}
