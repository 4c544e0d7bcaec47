//! Apnet Core - Experiment building blocks for a shared-medium AP network
//!
//! This crate provides configuration, the topology builder, the flow
//! registry and classifier, and the end-of-run report generator. The
//! event engine that drives them lives in `apnet-sim`.

pub mod config;
pub mod flow;
pub mod report;
pub mod topology;
pub mod tracing_setup;

pub use config::{ConfigError, ExperimentConfig};
pub use flow::{FiveTuple, FlowId, FlowRegistry, FlowStats, PacketObservation, PacketOutcome};
pub use report::{FlowReport, FlowSummary, ReportError};
pub use topology::{Endpoint, NodeId, Role, Topology, TopologyError};

/// Core errors that can bubble up from any Apnet subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ApnetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApnetError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ApnetError::Config(e) => format!("Invalid configuration: {e}"),
            ApnetError::Topology(e) => format!("Topology could not be built: {e}"),
            ApnetError::Report(_) => "Statistics could not be written".to_string(),
            ApnetError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to operator input.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ApnetError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, ApnetError>;
