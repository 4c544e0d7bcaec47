//! Apnet Simulation - Deterministic runs of a shared-medium AP experiment.

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! One endpoint acts as the access point, every other endpoint is a client,
//! and all of them share a single CSMA segment. Each client exchanges UDP
//! echo traffic with the AP in both directions; the flow registry classifies
//! every packet and the report summarises each flow once the observation
//! window closes.
//!
//! # Example
//!
//! ```rust,no_run
//! use apnet_core::ExperimentConfig;
//! use apnet_sim::Experiment;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExperimentConfig::default().normalized();
//! let experiment = Experiment::new(config)?;
//!
//! let outcome = experiment.run()?;
//! println!("{}", outcome.report.render_text());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Deterministic Engine**: event queue ordered by time then insertion
//! - **Channel**: serialising shared medium with optional seeded loss
//! - **Traffic**: echo senders and listeners with staggered starts
//! - **Capture**: AP interface frames, written as a pcap file
//! - **Animation**: node layout for NetAnim-style viewers

#[allow(missing_docs)]
pub mod animation;
#[allow(missing_docs)]
pub mod capture;
pub mod channel;
pub mod deterministic;
#[allow(missing_docs)]
pub mod experiment;
#[allow(missing_docs)]
pub mod packet;
#[allow(missing_docs)]
pub mod traffic;

pub use channel::{Channel, CsmaChannel, DropCause, Transmission};
pub use deterministic::{
    DeterministicClock, DeterministicRng, DeterministicSimulation, SimulationError,
    SimulationReport,
};
pub use experiment::{Artifacts, Experiment, ExperimentError, ExperimentOutcome};
pub use traffic::{AppId, TrafficPlan, TrafficScheduler};
