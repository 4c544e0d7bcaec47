//! Packet capture on the access point's interface.
//!
//! The event loop records every frame the AP puts on the medium or receives
//! from it. [`PcapWriter`] turns those records into a libpcap file with
//! synthesised Ethernet, IPv4 and UDP headers; payload bytes are zero.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use apnet_core::topology::{MacAddress, NodeId, Topology};
use bytes::{BufMut, Bytes, BytesMut};

use crate::packet::{Packet, UDP_HEADER_BYTES};

/// File name of the capture artifact.
pub const PCAP_FILE: &str = "ap-trace.pcap";

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const PCAP_SNAPLEN: u32 = 65_535;
const LINKTYPE_ETHERNET: u32 = 1;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERNET_HEADER_BYTES: usize = 14;
/// Minimum captured frame, FCS excluded.
const MIN_CAPTURED_FRAME: usize = 60;
const DEFAULT_TTL: u8 = 64;

/// Which way a captured frame crossed the AP interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDirection {
    Outbound,
    Inbound,
}

/// One frame seen on the AP interface.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub time: Duration,
    pub direction: CaptureDirection,
    pub packet: Packet,
}

/// In-memory capture of the AP's traffic.
#[derive(Debug, Clone)]
pub struct ApCapture {
    ap: NodeId,
    frames: Vec<CapturedFrame>,
}

impl ApCapture {
    /// Creates an empty capture for the AP endpoint.
    pub fn new(ap: NodeId) -> Self {
        Self {
            ap,
            frames: Vec::new(),
        }
    }

    /// Endpoint whose interface is captured.
    pub fn access_point(&self) -> NodeId {
        self.ap
    }

    /// Records a frame handed to the medium at `time`, if the AP sent it.
    pub fn record_transmit(&mut self, time: Duration, packet: &Packet) {
        if packet.source_node == self.ap {
            self.push(time, CaptureDirection::Outbound, packet);
        }
    }

    /// Records a frame arriving at `time`, if the AP received it.
    pub fn record_receive(&mut self, time: Duration, packet: &Packet) {
        if packet.destination_node == self.ap {
            self.push(time, CaptureDirection::Inbound, packet);
        }
    }

    /// Captured frames in capture order.
    pub fn frames(&self) -> &[CapturedFrame] {
        &self.frames
    }

    /// Number of captured frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn push(&mut self, time: Duration, direction: CaptureDirection, packet: &Packet) {
        self.frames.push(CapturedFrame {
            time,
            direction,
            packet: packet.clone(),
        });
    }
}

/// Encodes a capture as a libpcap v2.4 file.
pub struct PcapWriter<'a> {
    topology: &'a Topology,
}

impl<'a> PcapWriter<'a> {
    /// Creates a writer resolving MAC addresses through `topology`.
    pub fn new(topology: &'a Topology) -> Self {
        Self { topology }
    }

    /// Encodes the global header followed by one record per frame.
    ///
    /// Frames longer than the snapshot length are truncated in the record,
    /// with the original length kept in the record header.
    ///
    /// # Errors
    ///
    /// - `io::ErrorKind::InvalidData` - A packet does not fit in one IPv4 datagram
    pub fn encode(&self, capture: &ApCapture) -> io::Result<Bytes> {
        let mut buf = BytesMut::with_capacity(24 + capture.len() * 128);

        buf.put_u32_le(PCAP_MAGIC);
        buf.put_u16_le(PCAP_VERSION_MAJOR);
        buf.put_u16_le(PCAP_VERSION_MINOR);
        buf.put_i32_le(0); // thiszone
        buf.put_u32_le(0); // sigfigs
        buf.put_u32_le(PCAP_SNAPLEN);
        buf.put_u32_le(LINKTYPE_ETHERNET);

        for frame in capture.frames() {
            let data = self.encode_frame(&frame.packet)?;
            let original_len = u32::try_from(data.len()).map_err(|_| oversized(&frame.packet))?;
            let included_len = original_len.min(PCAP_SNAPLEN);
            let timestamp_secs = u32::try_from(frame.time.as_secs()).unwrap_or(u32::MAX);
            buf.put_u32_le(timestamp_secs);
            buf.put_u32_le(frame.time.subsec_micros());
            buf.put_u32_le(included_len);
            buf.put_u32_le(original_len);
            buf.put_slice(&data[..included_len as usize]);
        }

        Ok(buf.freeze())
    }

    /// Writes the encoded capture to `path`.
    ///
    /// # Errors
    ///
    /// - `io::Error` - File could not be written
    /// - `io::ErrorKind::InvalidData` - A packet does not fit in one IPv4 datagram
    pub fn write(&self, capture: &ApCapture, path: &Path) -> io::Result<()> {
        fs::write(path, self.encode(capture)?)?;
        tracing::debug!("Wrote {} frames to {}", capture.len(), path.display());
        Ok(())
    }

    fn mac_of(&self, node: NodeId) -> MacAddress {
        self.topology
            .endpoint(node)
            .map(|endpoint| endpoint.mac)
            .unwrap_or_else(MacAddress::broadcast)
    }

    fn encode_frame(&self, packet: &Packet) -> io::Result<BytesMut> {
        let ip_len = u16::try_from(packet.ip_bytes()).map_err(|_| oversized(packet))?;
        let udp_len = u16::try_from(packet.payload_bytes.saturating_add(UDP_HEADER_BYTES))
            .map_err(|_| oversized(packet))?;
        let mut frame = BytesMut::with_capacity(
            (ETHERNET_HEADER_BYTES + usize::from(ip_len)).max(MIN_CAPTURED_FRAME),
        );

        frame.put_slice(&self.mac_of(packet.destination_node).octets());
        frame.put_slice(&self.mac_of(packet.source_node).octets());
        frame.put_u16(ETHERTYPE_IPV4);

        let mut ip_header = [0u8; 20];
        ip_header[0] = 0x45;
        ip_header[2..4].copy_from_slice(&ip_len.to_be_bytes());
        // Identification wraps every 65536 packets
        ip_header[4..6].copy_from_slice(&(packet.uid as u16).to_be_bytes());
        ip_header[8] = DEFAULT_TTL;
        ip_header[9] = packet.tuple.protocol.number();
        ip_header[12..16].copy_from_slice(&packet.tuple.source.octets());
        ip_header[16..20].copy_from_slice(&packet.tuple.destination.octets());
        let checksum = ipv4_checksum(&ip_header);
        ip_header[10..12].copy_from_slice(&checksum.to_be_bytes());
        frame.put_slice(&ip_header);

        frame.put_u16(packet.tuple.source_port);
        frame.put_u16(packet.tuple.destination_port);
        frame.put_u16(udp_len);
        frame.put_u16(0); // checksum disabled
        frame.put_bytes(0, usize::from(udp_len) - UDP_HEADER_BYTES as usize);

        if frame.len() < MIN_CAPTURED_FRAME {
            let padding = MIN_CAPTURED_FRAME - frame.len();
            frame.put_bytes(0, padding);
        }
        Ok(frame)
    }
}

fn oversized(packet: &Packet) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "packet {} with {} payload bytes does not fit in an IPv4 datagram",
            packet.uid, packet.payload_bytes
        ),
    )
}

/// Ones-complement checksum over an IPv4 header.
fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)])))
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
