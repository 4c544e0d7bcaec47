//! Artifacts written by a finished experiment

use std::fs;

use apnet_core::config::ExperimentConfig;
use apnet_core::report::{FLOW_STATS_FILE, FlowReport};
use apnet_sim::Experiment;
use apnet_sim::animation::ANIMATION_FILE;
use apnet_sim::capture::PCAP_FILE;

fn config_with_artifacts(dir: &std::path::Path) -> ExperimentConfig {
    let mut config = ExperimentConfig::for_testing();
    config.output.pcap = true;
    config.output.animation = true;
    config.output.output_dir = dir.to_path_buf();
    config
}

#[test]
fn test_all_artifacts_written() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_artifacts(dir.path());

    let experiment = Experiment::new(config).unwrap();
    let outcome = experiment.run().unwrap();
    experiment.write_artifacts(&outcome, dir.path()).unwrap();

    assert!(dir.path().join(FLOW_STATS_FILE).exists());
    assert!(dir.path().join(PCAP_FILE).exists());
    assert!(dir.path().join(ANIMATION_FILE).exists());
}

#[test]
fn test_flow_stats_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let experiment = Experiment::new(config_with_artifacts(dir.path())).unwrap();
    let outcome = experiment.run().unwrap();
    let artifacts = experiment.write_artifacts(&outcome, dir.path()).unwrap();

    let loaded = FlowReport::read_json(&artifacts.flow_stats).unwrap();
    assert_eq!(loaded.flows.len(), outcome.report.flows.len());
    assert_eq!(loaded.totals.tx_packets, outcome.report.totals.tx_packets);
    for (read, original) in loaded.flows.iter().zip(&outcome.report.flows) {
        assert_eq!(read.tuple, original.tuple);
        assert_eq!(read.rx_bytes, original.rx_bytes);
        assert_eq!(read.source_role, original.source_role);
    }

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&artifacts.flow_stats).unwrap()).unwrap();
    assert_eq!(raw["flows"].as_array().unwrap().len(), 18);
    assert_eq!(raw["flows"][0]["flow_id"], 1);
}

#[test]
fn test_pcap_contains_ap_frames() {
    let dir = tempfile::tempdir().unwrap();
    let experiment = Experiment::new(config_with_artifacts(dir.path())).unwrap();
    let outcome = experiment.run().unwrap();
    let artifacts = experiment.write_artifacts(&outcome, dir.path()).unwrap();

    let bytes = fs::read(artifacts.pcap.unwrap()).unwrap();
    assert_eq!(&bytes[0..4], &0xa1b2_c3d4u32.to_le_bytes());

    // Count records by walking the captured lengths
    let mut offset = 24;
    let mut records = 0;
    while offset < bytes.len() {
        let length = u32::from_le_bytes(bytes[offset + 8..offset + 12].try_into().unwrap());
        offset += 16 + length as usize;
        records += 1;
    }
    assert_eq!(offset, bytes.len());
    assert_eq!(records, outcome.capture.as_ref().unwrap().len());
}

#[test]
fn test_animation_marks_ap() {
    let dir = tempfile::tempdir().unwrap();
    let experiment = Experiment::new(config_with_artifacts(dir.path())).unwrap();
    let outcome = experiment.run().unwrap();
    let artifacts = experiment.write_artifacts(&outcome, dir.path()).unwrap();

    let xml = fs::read_to_string(artifacts.animation.unwrap()).unwrap();
    assert_eq!(xml.matches(r#"descr="AP""#).count(), 1);
    assert_eq!(xml.matches(r#"descr="Client""#).count(), 9);
}

#[test]
fn test_rejected_config_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("run");
    let mut config = config_with_artifacts(&output);
    config.topology.ap_index = Some(15);

    assert!(Experiment::new(config).is_err());
    assert!(!output.exists());
}

#[test]
fn test_disabled_artifacts_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let experiment = Experiment::new(ExperimentConfig::for_testing()).unwrap();
    let outcome = experiment.run().unwrap();
    let artifacts = experiment.write_artifacts(&outcome, dir.path()).unwrap();

    assert!(artifacts.pcap.is_none());
    assert!(artifacts.animation.is_none());
    assert!(!dir.path().join(PCAP_FILE).exists());
}
