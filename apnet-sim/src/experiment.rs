//! End-to-end experiment: build the topology, schedule traffic, run the
//! engine for the observation window, then report.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use apnet_core::ApnetError;
use apnet_core::config::{ConfigError, ExperimentConfig};
use apnet_core::flow::FlowRegistry;
use apnet_core::report::{FLOW_STATS_FILE, FlowReport, ReportError};
use apnet_core::topology::Topology;
use thiserror::Error;

use crate::animation::{ANIMATION_FILE, AnimationWriter};
use crate::capture::{ApCapture, PCAP_FILE, PcapWriter};
use crate::channel::CsmaChannel;
use crate::deterministic::{
    DeterministicSimulation, EchoBoundInvariant, LostBoundInvariant, PacketCeilingInvariant,
    SimulationError, SimulationReport, TxCoversRxInvariant,
};
use crate::traffic::TrafficScheduler;

/// Errors that can end an experiment.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Core(#[from] ApnetError),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),
}

impl ExperimentError {
    /// Checks if this error is due to operator input.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ExperimentError::Core(e) if e.is_user_error())
    }

    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ExperimentError::Core(e) => e.user_message(),
            ExperimentError::Simulation(e) => format!("Simulation aborted: {e}"),
        }
    }
}

impl From<ConfigError> for ExperimentError {
    fn from(error: ConfigError) -> Self {
        ExperimentError::Core(error.into())
    }
}

impl From<ReportError> for ExperimentError {
    fn from(error: ReportError) -> Self {
        ExperimentError::Core(error.into())
    }
}

impl From<std::io::Error> for ExperimentError {
    fn from(error: std::io::Error) -> Self {
        ExperimentError::Core(error.into())
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct ExperimentOutcome {
    /// Closed registry; read-only from here on
    pub registry: FlowRegistry,
    pub report: FlowReport,
    pub simulation: SimulationReport,
    pub capture: Option<ApCapture>,
}

/// Paths of the artifacts written for one run.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub flow_stats: PathBuf,
    pub pcap: Option<PathBuf>,
    pub animation: Option<PathBuf>,
}

/// One configured experiment.
pub struct Experiment {
    config: ExperimentConfig,
    topology: Topology,
}

impl Experiment {
    /// Validates `config` and builds its topology.
    ///
    /// # Errors
    ///
    /// - `ExperimentError::Core` - Configuration rejected or endpoints could not be created
    pub fn new(config: ExperimentConfig) -> Result<Self, ExperimentError> {
        let topology = Topology::from_config(&config)?;
        Ok(Self { config, topology })
    }

    /// Configuration the experiment runs with.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Endpoints of the experiment.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Runs the whole observation window and builds the report.
    ///
    /// # Errors
    ///
    /// - `ExperimentError::Simulation` - Engine aborted the run
    pub fn run(&self) -> Result<ExperimentOutcome, ExperimentError> {
        let config = &self.config;
        let ap = self.topology.access_point();
        tracing::info!(
            "Starting experiment: {} endpoints, AP {} ({}), window {:?}",
            self.topology.len(),
            ap.id,
            ap.address,
            config.observation_window
        );

        let plan = TrafficScheduler::new(&self.topology, config).plan();
        let channel = CsmaChannel::from_config(&config.channel);
        let mut sim = DeterministicSimulation::new(Box::new(channel), config.channel.seed);
        sim.add_invariant(Arc::new(TxCoversRxInvariant));
        sim.add_invariant(Arc::new(LostBoundInvariant));
        sim.add_invariant(Arc::new(EchoBoundInvariant));
        sim.add_invariant(Arc::new(PacketCeilingInvariant::new(u64::from(
            config.traffic.max_packets,
        ))));
        sim.log_packets(config.output.verbose);
        if config.output.pcap {
            sim.enable_capture(ap.id);
        }
        sim.install(plan)?;

        let mut registry = FlowRegistry::new();
        let simulation = sim.execute_until(&mut registry, config.observation_window)?;
        let stranded = registry.close();
        if stranded > 0 {
            tracing::info!("{stranded} packets still in flight at window close, counted as lost");
        }

        let report = FlowReport::generate(&registry, &self.topology, config);
        tracing::info!(
            "Experiment finished: {} flows, {} events",
            report.flows.len(),
            simulation.event_count
        );

        Ok(ExperimentOutcome {
            registry,
            report,
            simulation,
            capture: sim.take_capture(),
        })
    }

    /// Writes the statistics file and the enabled capture and animation files.
    ///
    /// # Errors
    ///
    /// - `ExperimentError::Core` - Output directory, statistics or another file could not be written
    pub fn write_artifacts(
        &self,
        outcome: &ExperimentOutcome,
        dir: &Path,
    ) -> Result<Artifacts, ExperimentError> {
        fs::create_dir_all(dir)?;

        let flow_stats = dir.join(FLOW_STATS_FILE);
        outcome.report.write_json(&flow_stats)?;
        let mut artifacts = Artifacts {
            flow_stats,
            ..Default::default()
        };

        if let Some(capture) = outcome.capture.as_ref().filter(|_| self.config.output.pcap) {
            let path = dir.join(PCAP_FILE);
            PcapWriter::new(&self.topology).write(capture, &path)?;
            artifacts.pcap = Some(path);
        }

        if self.config.output.animation {
            let path = dir.join(ANIMATION_FILE);
            let mut writer = AnimationWriter::new(&self.topology);
            if let Some(capture) = &outcome.capture {
                writer = writer.with_packets(capture);
            }
            writer.write(&path)?;
            artifacts.animation = Some(path);
        }

        tracing::info!("Artifacts written to {}", dir.display());
        Ok(artifacts)
    }
}
