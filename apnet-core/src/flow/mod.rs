//! Flow identity and per-flow accounting.
//!
//! A flow is a directional packet stream keyed by its five-tuple. Flows are
//! never declared up front; the registry creates one the first time a packet
//! carrying its key is observed.

mod registry;

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

pub use registry::{FlowRecord, FlowRegistry, FlowStats, PacketObservation, PacketOutcome};

/// Transport protocol of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Udp,
}

impl Protocol {
    /// IANA protocol number.
    pub fn number(self) -> u8 {
        match self {
            Protocol::Udp => 17,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Identity key of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    pub source: Ipv4Addr,
    pub source_port: u16,
    pub destination: Ipv4Addr,
    pub destination_port: u16,
    pub protocol: Protocol,
}

impl FiveTuple {
    /// Creates a UDP five-tuple.
    pub fn udp(
        source: Ipv4Addr,
        source_port: u16,
        destination: Ipv4Addr,
        destination_port: u16,
    ) -> Self {
        Self {
            source,
            source_port,
            destination,
            destination_port,
            protocol: Protocol::Udp,
        }
    }

    /// The same conversation seen from the other end.
    pub fn reversed(&self) -> Self {
        Self {
            source: self.destination,
            source_port: self.destination_port,
            destination: self.source,
            destination_port: self.source_port,
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{}",
            self.protocol, self.source, self.source_port, self.destination, self.destination_port
        )
    }
}

/// Sequential flow identifier, assigned from 1 in first-observation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(pub u32);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_tuple_reversal() {
        let tuple = FiveTuple::udp(
            Ipv4Addr::new(10, 1, 1, 1),
            49153,
            Ipv4Addr::new(10, 1, 1, 10),
            9,
        );

        let reversed = tuple.reversed();
        assert_eq!(reversed.source, Ipv4Addr::new(10, 1, 1, 10));
        assert_eq!(reversed.source_port, 9);
        assert_eq!(reversed.reversed(), tuple);
        assert_eq!(tuple.to_string(), "UDP 10.1.1.1:49153 -> 10.1.1.10:9");
    }
}
