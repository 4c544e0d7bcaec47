//! Invariant checking over the flow registry.

use std::fmt;
use std::time::Duration;

use apnet_core::flow::{FlowRecord, FlowRegistry};

/// Violation of a simulation invariant.
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: String,
    /// Detailed description of the violation
    pub description: String,
    /// Simulation time of the violation
    pub timestamp: Duration,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invariant '{}' violated at {:?}: {}",
            self.invariant, self.timestamp, self.description
        )
    }
}

/// Trait for checking simulation invariants.
pub trait Invariant: Send + Sync {
    /// Checks if invariant holds for the registry at time `now`.
    ///
    /// # Errors
    /// Returns `InvariantViolation` if the invariant condition is not met.
    fn check(&self, registry: &FlowRegistry, now: Duration) -> Result<(), InvariantViolation>;

    /// Returns name of this invariant.
    fn name(&self) -> &str;
}

/// Applies a per-flow predicate; the first failing flow becomes the violation.
fn check_flows(
    name: &str,
    registry: &FlowRegistry,
    now: Duration,
    failure: impl Fn(&FlowRecord) -> Option<String>,
) -> Result<(), InvariantViolation> {
    match registry.flows().find_map(|flow| failure(flow)) {
        Some(description) => Err(InvariantViolation {
            invariant: name.to_string(),
            description,
            timestamp: now,
        }),
        None => Ok(()),
    }
}

/// Received packets never exceed transmitted ones.
pub struct TxCoversRxInvariant;

impl Invariant for TxCoversRxInvariant {
    fn check(&self, registry: &FlowRegistry, now: Duration) -> Result<(), InvariantViolation> {
        check_flows(self.name(), registry, now, |flow| {
            let stats = &flow.stats;
            (stats.rx_packets > stats.tx_packets).then(|| {
                format!(
                    "Flow {} received {} of {} transmitted",
                    flow.id, stats.rx_packets, stats.tx_packets
                )
            })
        })
    }

    fn name(&self) -> &str {
        "TxCoversRx"
    }
}

/// Lost packets fit inside what was transmitted and not received.
pub struct LostBoundInvariant;

impl Invariant for LostBoundInvariant {
    fn check(&self, registry: &FlowRegistry, now: Duration) -> Result<(), InvariantViolation> {
        check_flows(self.name(), registry, now, |flow| {
            let stats = &flow.stats;
            (stats.rx_packets + stats.lost_packets > stats.tx_packets).then(|| {
                format!(
                    "Flow {} has rx={} lost={} but tx={}",
                    flow.id, stats.rx_packets, stats.lost_packets, stats.tx_packets
                )
            })
        })
    }

    fn name(&self) -> &str {
        "LostBound"
    }
}

/// Echo replies never exceed delivered requests.
pub struct EchoBoundInvariant;

impl Invariant for EchoBoundInvariant {
    fn check(&self, registry: &FlowRegistry, now: Duration) -> Result<(), InvariantViolation> {
        check_flows(self.name(), registry, now, |flow| {
            let stats = &flow.stats;
            (stats.echo_replies > stats.rx_packets).then(|| {
                format!(
                    "Flow {} got {} echoes for {} deliveries",
                    flow.id, stats.echo_replies, stats.rx_packets
                )
            })
        })
    }

    fn name(&self) -> &str {
        "EchoBound"
    }
}

/// Senders respect their packet ceiling.
pub struct PacketCeilingInvariant {
    max_packets: u64,
}

impl PacketCeilingInvariant {
    /// Creates invariant with the per-flow packet ceiling.
    pub fn new(max_packets: u64) -> Self {
        Self { max_packets }
    }
}

impl Invariant for PacketCeilingInvariant {
    fn check(&self, registry: &FlowRegistry, now: Duration) -> Result<(), InvariantViolation> {
        check_flows(self.name(), registry, now, |flow| {
            (flow.stats.tx_packets > self.max_packets).then(|| {
                format!(
                    "Flow {} transmitted {} packets, ceiling {}",
                    flow.id, flow.stats.tx_packets, self.max_packets
                )
            })
        })
    }

    fn name(&self) -> &str {
        "PacketCeiling"
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use apnet_core::flow::{FiveTuple, PacketObservation, PacketOutcome};

    use super::*;

    fn sent(registry: &mut FlowRegistry, uid: u64) {
        registry.observe(PacketObservation {
            tuple: FiveTuple::udp(
                Ipv4Addr::new(10, 1, 1, 1),
                49153,
                Ipv4Addr::new(10, 1, 1, 10),
                9,
            ),
            packet_uid: uid,
            bytes: 540,
            time: Duration::ZERO,
            outcome: PacketOutcome::Sent,
        });
    }

    #[test]
    fn test_counter_invariants_hold_for_registry() {
        let mut registry = FlowRegistry::new();
        for uid in 0..3 {
            sent(&mut registry, uid);
        }
        registry.close();

        assert!(TxCoversRxInvariant.check(&registry, Duration::ZERO).is_ok());
        assert!(LostBoundInvariant.check(&registry, Duration::ZERO).is_ok());
        assert!(EchoBoundInvariant.check(&registry, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_packet_ceiling_invariant() {
        let mut registry = FlowRegistry::new();
        for uid in 0..3 {
            sent(&mut registry, uid);
        }

        assert!(PacketCeilingInvariant::new(3).check(&registry, Duration::ZERO).is_ok());

        let violation = PacketCeilingInvariant::new(2)
            .check(&registry, Duration::from_secs(4))
            .unwrap_err();
        assert_eq!(violation.invariant, "PacketCeiling");
        assert_eq!(violation.timestamp, Duration::from_secs(4));
        assert!(violation.description.contains("ceiling 2"));
    }
}
