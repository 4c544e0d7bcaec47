//! Integration tests for Apnet
//!
//! These tests drive whole experiments through the public APIs of
//! `apnet-core` and `apnet-sim` and check the properties an operator relies
//! on: topology shape, flow counts, counter bounds and the written artifacts.

#[path = "integration/experiment_scenarios.rs"]
mod experiment_scenarios;
#[path = "integration/report_artifacts.rs"]
mod report_artifacts;
#[path = "integration/topology_properties.rs"]
mod topology_properties;
