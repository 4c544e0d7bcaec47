//! Property tests for topology construction and role relabeling

use std::collections::HashSet;

use apnet_core::config::{ExperimentConfig, MAX_NODE_COUNT, MIN_NODE_COUNT};
use apnet_core::topology::{AP_POSITION, NodeId, Position, Role, Topology};
use proptest::prelude::*;

fn node_count_and_ap() -> impl Strategy<Value = (u32, u32)> {
    (MIN_NODE_COUNT..=MAX_NODE_COUNT).prop_flat_map(|n| (Just(n), 0..n))
}

proptest! {
    #[test]
    fn prop_topology_has_unique_addresses_and_one_ap((n, ap) in node_count_and_ap()) {
        let topology = Topology::builder(n).ap_index(ap).build().unwrap();

        prop_assert_eq!(topology.len(), n as usize);

        let aps: Vec<_> = topology
            .endpoints()
            .iter()
            .filter(|e| e.role == Role::AccessPoint)
            .collect();
        prop_assert_eq!(aps.len(), 1);
        prop_assert_eq!(aps[0].id, NodeId(ap));
        prop_assert_eq!(aps[0].position, AP_POSITION);

        let addresses: HashSet<_> = topology.endpoints().iter().map(|e| e.address).collect();
        let macs: HashSet<_> = topology.endpoints().iter().map(|e| e.mac).collect();
        prop_assert_eq!(addresses.len(), n as usize);
        prop_assert_eq!(macs.len(), n as usize);
    }

    #[test]
    fn prop_normalized_ap_index_always_in_range(n in 0u32..=MAX_NODE_COUNT, ap in 0u32..1000) {
        let mut config = ExperimentConfig::for_testing();
        config.topology.node_count = n;
        config.topology.ap_index = Some(ap);

        let config = config.normalized();
        prop_assert!(config.validate().is_ok());
        prop_assert!(config.topology.requested_ap_index() < config.topology.node_count);
    }

    #[test]
    fn prop_clients_keep_grid_positions((n, ap) in node_count_and_ap()) {
        let topology = Topology::builder(n).ap_index(ap).build().unwrap();

        for client in topology.clients() {
            prop_assert_eq!(client.position, Position::grid(client.id.0));
        }
    }
}

#[test]
fn test_ap_at_first_and_last_index() {
    for ap in [0, 9] {
        let topology = Topology::builder(10).ap_index(ap).build().unwrap();
        let access_point = topology.access_point();

        assert_eq!(access_point.id, NodeId(ap));
        assert_eq!(access_point.position, AP_POSITION);
        assert_eq!(topology.clients().count(), 9);
        assert!(topology.clients().all(|c| c.role == Role::Client));
    }
}

#[test]
fn test_out_of_range_ap_clamped_by_normalization() {
    let mut config = ExperimentConfig::for_testing();
    config.topology.ap_index = Some(50);

    let config = config.normalized();
    assert_eq!(config.topology.ap_index, Some(9));

    let topology = Topology::builder(config.topology.node_count)
        .ap_index(config.topology.requested_ap_index())
        .build()
        .unwrap();
    assert_eq!(topology.access_point().id, NodeId(9));
}
