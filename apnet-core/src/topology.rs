//! Endpoint creation, grid placement and address assignment.
//!
//! A topology is a star over one shared segment: exactly one endpoint is the
//! access point, every other endpoint is a client that exchanges traffic with it.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ExperimentConfig, MAX_NODE_COUNT, MIN_NODE_COUNT};

/// Endpoints per grid row.
pub const GRID_WIDTH: u32 = 5;

/// Distance between neighbouring grid positions, in both axes.
pub const GRID_SPACING: f64 = 10.0;

/// Fixed vantage point the AP is moved to after grid placement.
pub const AP_POSITION: Position = Position { x: 25.0, y: 25.0 };

/// Network part of the address block; hosts are numbered from `.1`.
pub const NETWORK_BASE: Ipv4Addr = Ipv4Addr::new(10, 1, 1, 0);

/// Errors raised while building a topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("Resolved AP index {ap_index} is not below node count {node_count}")]
    ApIndexOutOfRange { ap_index: u32, node_count: u32 },

    #[error("Address block cannot hold {node_count} endpoints")]
    AddressPoolExhausted { node_count: u32 },
}

/// Zero-based index of an endpoint within the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Returns the index as a usize for slice access.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Role an endpoint plays in the star.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    AccessPoint,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::AccessPoint => write!(f, "AccessPoint"),
            Role::Client => write!(f, "Client"),
        }
    }
}

/// Planar coordinate of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Row-major grid slot for the endpoint at `index`.
    pub fn grid(index: u32) -> Self {
        Self {
            x: f64::from(index % GRID_WIDTH) * GRID_SPACING,
            y: f64::from(index / GRID_WIDTH) * GRID_SPACING,
        }
    }
}

/// 48-bit link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Creates address from raw octets.
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Broadcast address ff:ff:ff:ff:ff:ff.
    pub fn broadcast() -> Self {
        Self([0xff; 6])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Collision-free pool of link-layer addresses, handed out in sequence.
#[derive(Debug, Clone)]
pub struct MacAllocator {
    next: u64,
}

impl Default for MacAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl MacAllocator {
    /// Creates a pool whose first address is 00:00:00:00:00:01.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocates the next unused address.
    pub fn allocate(&mut self) -> MacAddress {
        let value = self.next;
        self.next += 1;

        let bytes = value.to_be_bytes();
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[2..]);
        MacAddress(octets)
    }
}

/// One network participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: NodeId,
    pub role: Role,
    pub position: Position,
    pub mac: MacAddress,
    pub address: Ipv4Addr,
}

impl Endpoint {
    /// Returns true for the access point.
    pub fn is_access_point(&self) -> bool {
        self.role == Role::AccessPoint
    }
}

/// Complete set of endpoints for one experiment.
#[derive(Debug, Clone)]
pub struct Topology {
    endpoints: Vec<Endpoint>,
    access_point: NodeId,
}

impl Topology {
    /// Returns builder for a topology of `node_count` endpoints.
    pub fn builder(node_count: u32) -> TopologyBuilder {
        TopologyBuilder::new(node_count)
    }

    /// Validates `config` strictly, then builds its endpoints.
    ///
    /// Nothing is created when validation fails.
    ///
    /// # Errors
    ///
    /// - `ApnetError::Config` - Configuration rejected by validation
    /// - `ApnetError::Topology` - Endpoints could not be created
    pub fn from_config(config: &ExperimentConfig) -> crate::Result<Self> {
        config.validate()?;
        let topology = Self::builder(config.topology.node_count)
            .ap_index(config.topology.requested_ap_index())
            .build()?;
        Ok(topology)
    }

    /// All endpoints in creation order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns true when the topology holds no endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The access point endpoint.
    pub fn access_point(&self) -> &Endpoint {
        &self.endpoints[self.access_point.index()]
    }

    /// Network address of the access point.
    pub fn ap_address(&self) -> Ipv4Addr {
        self.access_point().address
    }

    /// Every non-AP endpoint, in index order.
    pub fn clients(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(|e| !e.is_access_point())
    }

    /// Looks up an endpoint by index.
    pub fn endpoint(&self, id: NodeId) -> Option<&Endpoint> {
        self.endpoints.get(id.index())
    }

    /// Labels an address for reporting: AccessPoint if it is the AP's, Client otherwise.
    pub fn role_of(&self, address: Ipv4Addr) -> Role {
        if address == self.ap_address() {
            Role::AccessPoint
        } else {
            Role::Client
        }
    }
}

/// Builder that places endpoints on the grid and assigns their addresses.
pub struct TopologyBuilder {
    node_count: u32,
    ap_index: Option<u32>,
    min_nodes: u32,
}

impl TopologyBuilder {
    fn new(node_count: u32) -> Self {
        Self {
            node_count,
            ap_index: None,
            min_nodes: MIN_NODE_COUNT,
        }
    }

    /// Sets the requested AP index; out-of-range requests clamp to the last endpoint.
    pub fn ap_index(mut self, index: u32) -> Self {
        self.ap_index = Some(index);
        self
    }

    /// Overrides the node-count floor (defaults to `MIN_NODE_COUNT`).
    pub fn min_nodes(mut self, floor: u32) -> Self {
        self.min_nodes = floor.max(1);
        self
    }

    /// Creates the endpoints.
    ///
    /// # Errors
    ///
    /// - `TopologyError::AddressPoolExhausted` - More endpoints than the /24 block holds
    /// - `TopologyError::ApIndexOutOfRange` - AP index still out of range after clamping
    pub fn build(self) -> Result<Topology, TopologyError> {
        let node_count = self.node_count.max(self.min_nodes);
        if node_count > MAX_NODE_COUNT {
            return Err(TopologyError::AddressPoolExhausted { node_count });
        }

        let requested = self.ap_index.unwrap_or(node_count - 1);
        let ap_index = requested.min(node_count - 1);
        if ap_index >= node_count {
            return Err(TopologyError::ApIndexOutOfRange {
                ap_index,
                node_count,
            });
        }

        let mut macs = MacAllocator::new();
        let base = u32::from(NETWORK_BASE);

        let endpoints = (0..node_count)
            .map(|index| {
                let is_ap = index == ap_index;
                Endpoint {
                    id: NodeId(index),
                    role: if is_ap { Role::AccessPoint } else { Role::Client },
                    position: if is_ap {
                        AP_POSITION
                    } else {
                        Position::grid(index)
                    },
                    mac: macs.allocate(),
                    address: Ipv4Addr::from(base + index + 1),
                }
            })
            .collect();

        tracing::debug!(
            "Built topology: {} endpoints, AP={} at {:?}",
            node_count,
            ap_index,
            AP_POSITION
        );

        Ok(Topology {
            endpoints,
            access_point: NodeId(ap_index),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::ApnetError;
    use crate::config::ConfigError;

    #[test]
    fn test_from_config_validates_first() {
        let mut config = ExperimentConfig::for_testing();
        config.topology.ap_index = Some(15);

        let err = Topology::from_config(&config).unwrap_err();
        assert!(matches!(
            err,
            ApnetError::Config(ConfigError::ApIndexOutOfRange {
                ap_index: 15,
                node_count: 10
            })
        ));
        assert!(err.is_user_error());

        config.topology.ap_index = Some(0);
        let topology = Topology::from_config(&config).unwrap();
        assert_eq!(topology.access_point().id, NodeId(0));
    }

    #[test]
    fn test_grid_positions_row_major() {
        assert_eq!(Position::grid(0), Position { x: 0.0, y: 0.0 });
        assert_eq!(Position::grid(4), Position { x: 40.0, y: 0.0 });
        assert_eq!(Position::grid(5), Position { x: 0.0, y: 10.0 });
        assert_eq!(Position::grid(12), Position { x: 20.0, y: 20.0 });
    }

    #[test]
    fn test_mac_allocation_sequence() {
        let mut pool = MacAllocator::new();
        assert_eq!(pool.allocate().to_string(), "00:00:00:00:00:01");
        assert_eq!(pool.allocate().to_string(), "00:00:00:00:00:02");

        let mut pool = MacAllocator { next: 0x1ff };
        assert_eq!(pool.allocate().octets(), [0, 0, 0, 0, 0x01, 0xff]);
    }

    #[test]
    fn test_default_topology_layout() {
        let topology = Topology::builder(25).build().unwrap();

        assert_eq!(topology.len(), 25);
        assert_eq!(topology.access_point().id, NodeId(24));
        assert_eq!(topology.access_point().position, AP_POSITION);
        assert_eq!(topology.ap_address(), Ipv4Addr::new(10, 1, 1, 25));
        assert_eq!(topology.endpoints()[0].address, Ipv4Addr::new(10, 1, 1, 1));
        assert_eq!(topology.clients().count(), 24);
    }

    #[test]
    fn test_addresses_are_unique() {
        let topology = Topology::builder(40).ap_index(7).build().unwrap();

        let macs: HashSet<_> = topology.endpoints().iter().map(|e| e.mac).collect();
        let ips: HashSet<_> = topology.endpoints().iter().map(|e| e.address).collect();
        assert_eq!(macs.len(), 40);
        assert_eq!(ips.len(), 40);
    }

    #[test]
    fn test_small_node_count_raised_to_floor() {
        let topology = Topology::builder(4).build().unwrap();
        assert_eq!(topology.len(), MIN_NODE_COUNT as usize);
        assert_eq!(topology.access_point().id, NodeId(9));
    }

    #[test]
    fn test_ap_index_clamped() {
        let topology = Topology::builder(10).ap_index(50).build().unwrap();
        assert_eq!(topology.access_point().id, NodeId(9));
    }

    #[test]
    fn test_ap_at_index_zero_relocated() {
        let topology = Topology::builder(10).ap_index(0).build().unwrap();

        let ap = topology.access_point();
        assert_eq!(ap.id, NodeId(0));
        assert_eq!(ap.position, AP_POSITION);
        assert_eq!(topology.endpoints()[1].position, Position { x: 10.0, y: 0.0 });
        assert_eq!(topology.role_of(ap.address), Role::AccessPoint);
        assert_eq!(
            topology.role_of(topology.endpoints()[1].address),
            Role::Client
        );
    }

    #[test]
    fn test_oversized_topology_rejected() {
        let result = Topology::builder(255).build();
        assert_eq!(
            result.unwrap_err(),
            TopologyError::AddressPoolExhausted { node_count: 255 }
        );
    }

    #[test]
    fn test_single_endpoint_topology() {
        let topology = Topology::builder(1).min_nodes(1).build().unwrap();
        assert_eq!(topology.len(), 1);
        assert!(topology.access_point().is_access_point());
        assert_eq!(topology.clients().count(), 0);
    }
}
