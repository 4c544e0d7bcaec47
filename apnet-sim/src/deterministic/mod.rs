//! Deterministic discrete-event engine.
//!
//! Simulation time is a `Duration` since start, events are ordered by
//! timestamp with ties broken by insertion order, and all randomness comes
//! from one seeded generator. The same configuration and seed always
//! produce the same run.

mod clock;
mod events;
mod invariants;
mod simulation;
mod state;

pub use clock::{DeterministicClock, DeterministicRng};
pub use events::{EventType, SimulationEvent};
pub use invariants::{
    EchoBoundInvariant, Invariant, InvariantViolation, LostBoundInvariant, PacketCeilingInvariant,
    TxCoversRxInvariant,
};
pub use simulation::{DeterministicSimulation, SimulationError, SimulationReport};
pub use state::SimulationMetrics;
