//! Packets carried over the shared medium.

use apnet_core::flow::FiveTuple;
use apnet_core::topology::NodeId;

/// UDP header size in bytes.
pub const UDP_HEADER_BYTES: u32 = 8;

/// IPv4 header size in bytes (no options).
pub const IPV4_HEADER_BYTES: u32 = 20;

/// Ethernet header plus trailer in bytes.
pub const ETHERNET_OVERHEAD_BYTES: u32 = 18;

/// Smallest frame the medium carries.
pub const MIN_FRAME_BYTES: u32 = 64;

/// Whether a packet is a request or the echo of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Request,
    EchoReply,
}

/// One UDP datagram in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Unique for the whole run
    pub uid: u64,
    pub tuple: FiveTuple,
    pub source_node: NodeId,
    pub destination_node: NodeId,
    /// UDP payload size
    pub payload_bytes: u32,
    pub kind: PacketKind,
}

impl Packet {
    /// Size at the network layer, as accounted by the flow registry.
    pub fn ip_bytes(&self) -> u32 {
        self.payload_bytes
            .saturating_add(UDP_HEADER_BYTES + IPV4_HEADER_BYTES)
    }

    /// Size on the wire.
    pub fn frame_bytes(&self) -> u32 {
        self.ip_bytes()
            .saturating_add(ETHERNET_OVERHEAD_BYTES)
            .max(MIN_FRAME_BYTES)
    }

    /// Builds the echo of this packet with a fresh uid.
    pub fn echo(&self, uid: u64) -> Self {
        Self {
            uid,
            tuple: self.tuple.reversed(),
            source_node: self.destination_node,
            destination_node: self.source_node,
            payload_bytes: self.payload_bytes,
            kind: PacketKind::EchoReply,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn request(payload_bytes: u32) -> Packet {
        Packet {
            uid: 1,
            tuple: FiveTuple::udp(
                Ipv4Addr::new(10, 1, 1, 1),
                49153,
                Ipv4Addr::new(10, 1, 1, 10),
                9,
            ),
            source_node: NodeId(0),
            destination_node: NodeId(9),
            payload_bytes,
            kind: PacketKind::Request,
        }
    }

    #[test]
    fn test_packet_sizes() {
        let packet = request(512);
        assert_eq!(packet.ip_bytes(), 540);
        assert_eq!(packet.frame_bytes(), 558);

        // Tiny payloads are padded to the minimum frame
        assert_eq!(request(1).frame_bytes(), MIN_FRAME_BYTES);
    }

    #[test]
    fn test_echo_reverses_direction() {
        let packet = request(512);
        let echo = packet.echo(2);

        assert_eq!(echo.uid, 2);
        assert_eq!(echo.kind, PacketKind::EchoReply);
        assert_eq!(echo.tuple, packet.tuple.reversed());
        assert_eq!(echo.source_node, NodeId(9));
        assert_eq!(echo.destination_node, NodeId(0));
    }
}
