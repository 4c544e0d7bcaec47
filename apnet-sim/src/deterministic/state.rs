//! Metrics collected by the event loop.

use std::collections::BTreeMap;

use super::invariants::InvariantViolation;

/// Metrics collected during simulation.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    /// Total events processed
    pub events_processed: u64,
    /// Events by type
    pub events_by_type: BTreeMap<String, u64>,
    /// Frames put on the medium, requests and echoes alike
    pub frames_transmitted: u64,
    /// Frames the medium dropped
    pub frames_dropped: u64,
    /// Frames refused because the medium's backlog was full
    pub queue_drops: u64,
    /// Echo replies produced by listeners
    pub echoes_sent: u64,
    /// Arrivals with no running listener on the destination port
    pub unanswered_arrivals: u64,
    /// Deepest the event queue got
    pub peak_queue_depth: usize,
    /// Invariant violations detected
    pub invariant_violations: Vec<InvariantViolation>,
}

impl SimulationMetrics {
    /// Creates new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event being processed.
    pub fn record_event(&mut self, event_type_str: &str) {
        self.events_processed += 1;
        *self
            .events_by_type
            .entry(event_type_str.to_string())
            .or_insert(0) += 1;
    }

    /// Records one frame handed to the medium.
    pub fn record_transmission(&mut self, dropped: bool) {
        self.frames_transmitted += 1;
        if dropped {
            self.frames_dropped += 1;
        }
    }

    /// Updates peak queue depth.
    pub fn update_peak_queue_depth(&mut self, depth: usize) {
        self.peak_queue_depth = self.peak_queue_depth.max(depth);
    }

    /// Records an invariant violation.
    pub fn record_invariant_violation(&mut self, violation: InvariantViolation) {
        self.invariant_violations.push(violation);
    }

    /// Generates summary statistics.
    pub fn summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str(&format!("Events processed: {}\n", self.events_processed));
        summary.push_str(&format!("Frames transmitted: {}\n", self.frames_transmitted));
        summary.push_str(&format!("Frames dropped: {}\n", self.frames_dropped));
        summary.push_str(&format!("Backlog drops: {}\n", self.queue_drops));
        summary.push_str(&format!("Echoes sent: {}\n", self.echoes_sent));
        summary.push_str(&format!(
            "Unanswered arrivals: {}\n",
            self.unanswered_arrivals
        ));
        summary.push_str(&format!("Peak queue depth: {}\n", self.peak_queue_depth));
        summary.push_str(&format!(
            "Invariant violations: {}\n",
            self.invariant_violations.len()
        ));

        summary
    }
}
