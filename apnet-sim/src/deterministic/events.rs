//! Event types and scheduling for deterministic simulations.

use std::cmp::Ordering;
use std::time::Duration;

use crate::packet::Packet;
use crate::traffic::AppId;

/// Types of events that can occur in the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// Application begins running
    ApplicationStart { app: AppId },
    /// Application stops; pending sends are never re-armed
    ApplicationStop { app: AppId },
    /// Sender emits its next packet
    SendPacket { app: AppId },
    /// Packet reaches the destination's network layer
    PacketArrival { packet: Packet },
}

impl EventType {
    /// Returns string representation of event type for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ApplicationStart { .. } => "ApplicationStart",
            EventType::ApplicationStop { .. } => "ApplicationStop",
            EventType::SendPacket { .. } => "SendPacket",
            EventType::PacketArrival { .. } => "PacketArrival",
        }
    }
}

/// Simulation event with timestamp.
#[derive(Debug, Clone)]
pub struct SimulationEvent {
    /// Insertion sequence number; breaks timestamp ties
    pub id: u64,
    /// Scheduled execution time
    pub timestamp: Duration,
    /// Type of event
    pub event_type: EventType,
}

impl SimulationEvent {
    /// Creates new simulation event.
    pub fn new(id: u64, timestamp: Duration, event_type: EventType) -> Self {
        Self {
            id,
            timestamp,
            event_type,
        }
    }
}

impl Eq for SimulationEvent {}

impl PartialEq for SimulationEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Ord for SimulationEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on both keys so BinaryHeap pops the earliest, oldest event
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Equal => self.id.cmp(&other.id).reverse(),
            other => other.reverse(),
        }
    }
}

impl PartialOrd for SimulationEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    #[test]
    fn test_event_timestamp_ordering() {
        let early = SimulationEvent::new(
            2,
            Duration::from_secs(1),
            EventType::SendPacket { app: AppId(0) },
        );
        let late = SimulationEvent::new(
            1,
            Duration::from_secs(2),
            EventType::SendPacket { app: AppId(1) },
        );

        // Ord is reversed for min-heap behavior, so early > late
        assert!(early > late);
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let mut heap = BinaryHeap::new();
        let at = Duration::from_secs(3);
        for id in [4, 1, 3, 0, 2] {
            heap.push(SimulationEvent::new(
                id,
                at,
                EventType::ApplicationStart { app: AppId(id as usize) },
            ));
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.id)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_event_type_string_conversion() {
        let event = EventType::ApplicationStop { app: AppId(3) };
        assert_eq!(event.as_str(), "ApplicationStop");
    }
}
