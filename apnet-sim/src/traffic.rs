//! Request/response traffic between the AP and every client.
//!
//! Each client gets two independent echo flows: client→AP towards the AP's
//! listener, and AP→client towards a listener on the client. Sender start
//! times are staggered by endpoint index so the segment never sees all
//! senders fire at once.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use apnet_core::config::{ExperimentConfig, TrafficConfig};
use apnet_core::topology::{NodeId, Topology};

/// First port handed out to an unbound sender on each node.
pub const EPHEMERAL_PORT_START: u16 = 49153;

/// Index of an installed application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppId(pub usize);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app-{}", self.0)
    }
}

/// Start of the client→AP sender on endpoint `node`.
pub fn client_sender_start(config: &TrafficConfig, node: NodeId) -> Duration {
    config.client_start_base + config.stagger * node.0
}

/// Start of the AP→client sender targeting endpoint `node`.
pub fn ap_sender_start(config: &TrafficConfig, node: NodeId) -> Duration {
    config.ap_start_base + config.stagger * node.0
}

/// Direction of a sender relative to the AP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToAp,
    ApToClient,
}

/// Periodic sender with a bounded packet count that expects each packet echoed.
#[derive(Debug, Clone)]
pub struct EchoSender {
    pub node: NodeId,
    pub local_address: Ipv4Addr,
    pub local_port: u16,
    pub remote_node: NodeId,
    pub remote_address: Ipv4Addr,
    pub remote_port: u16,
    pub direction: Direction,
    pub packet_size: u32,
    pub max_packets: u32,
    pub interval: Duration,
    pub start: Duration,
    pub stop: Duration,
    pub sent: u32,
    pub running: bool,
}

impl EchoSender {
    /// Returns true while another packet may be sent at `now`.
    pub fn can_send(&self, now: Duration) -> bool {
        self.running && now < self.stop && self.sent < self.max_packets
    }

    /// Time of the next send after one at `now`, if the sender should re-arm.
    pub fn next_send(&self, now: Duration) -> Option<Duration> {
        let next = now + self.interval;
        (self.sent < self.max_packets && next < self.stop).then_some(next)
    }
}

/// Listener that echoes every request back to its sender.
#[derive(Debug, Clone)]
pub struct EchoListener {
    pub node: NodeId,
    pub port: u16,
    pub start: Duration,
    pub stop: Duration,
    pub running: bool,
}

/// Any application the scheduler installs.
#[derive(Debug, Clone)]
pub enum Application {
    Sender(EchoSender),
    Listener(EchoListener),
}

impl Application {
    /// Scheduled start time.
    pub fn start(&self) -> Duration {
        match self {
            Application::Sender(sender) => sender.start,
            Application::Listener(listener) => listener.start,
        }
    }

    /// Scheduled stop time.
    pub fn stop(&self) -> Duration {
        match self {
            Application::Sender(sender) => sender.stop,
            Application::Listener(listener) => listener.stop,
        }
    }

    /// Marks the application running or stopped.
    pub fn set_running(&mut self, running: bool) {
        match self {
            Application::Sender(sender) => sender.running = running,
            Application::Listener(listener) => listener.running = running,
        }
    }
}

/// Full set of applications for one experiment.
#[derive(Debug, Clone, Default)]
pub struct TrafficPlan {
    pub applications: Vec<Application>,
    /// Senders left out because their start fell outside the window
    pub skipped_senders: usize,
}

impl TrafficPlan {
    /// Iterates installed senders.
    pub fn senders(&self) -> impl Iterator<Item = &EchoSender> {
        self.applications.iter().filter_map(|app| match app {
            Application::Sender(sender) => Some(sender),
            Application::Listener(_) => None,
        })
    }

    /// Iterates installed listeners.
    pub fn listeners(&self) -> impl Iterator<Item = &EchoListener> {
        self.applications.iter().filter_map(|app| match app {
            Application::Listener(listener) => Some(listener),
            Application::Sender(_) => None,
        })
    }
}

/// Builds the traffic plan for a topology.
pub struct TrafficScheduler<'a> {
    topology: &'a Topology,
    traffic: &'a TrafficConfig,
    window: Duration,
    next_port: HashMap<NodeId, u16>,
    plan: TrafficPlan,
}

impl<'a> TrafficScheduler<'a> {
    /// Creates a scheduler for `topology` under `config`.
    pub fn new(topology: &'a Topology, config: &'a ExperimentConfig) -> Self {
        Self {
            topology,
            traffic: &config.traffic,
            window: config.observation_window,
            next_port: HashMap::new(),
            plan: TrafficPlan::default(),
        }
    }

    /// Produces two flows per client: client→AP, then AP→client.
    pub fn plan(mut self) -> TrafficPlan {
        let ap = self.topology.access_point().clone();
        let clients: Vec<_> = self.topology.clients().cloned().collect();

        if clients.is_empty() {
            tracing::info!("Topology has no clients; no traffic scheduled");
        }

        self.add_listener(ap.id, self.traffic.client_port);
        for client in &clients {
            self.add_sender(
                client.id,
                client.address,
                ap.id,
                ap.address,
                self.traffic.client_port,
                Direction::ClientToAp,
                client_sender_start(self.traffic, client.id),
            );
        }

        for client in &clients {
            self.add_listener(client.id, self.traffic.ap_port);
        }
        for client in &clients {
            self.add_sender(
                ap.id,
                ap.address,
                client.id,
                client.address,
                self.traffic.ap_port,
                Direction::ApToClient,
                ap_sender_start(self.traffic, client.id),
            );
        }

        tracing::debug!(
            "Traffic plan: {} senders, {} listeners, {} skipped",
            self.plan.senders().count(),
            self.plan.listeners().count(),
            self.plan.skipped_senders
        );
        self.plan
    }

    fn within_window(&self, start: Duration) -> bool {
        !start.is_zero() && start < self.window
    }

    fn add_listener(&mut self, node: NodeId, port: u16) {
        let start = self.traffic.listener_start;
        if !self.within_window(start) {
            tracing::debug!("Listener on {node}:{port} starts outside the window, skipped");
            return;
        }
        self.plan
            .applications
            .push(Application::Listener(EchoListener {
                node,
                port,
                start,
                stop: self.window,
                running: false,
            }));
    }

    #[allow(clippy::too_many_arguments)]
    fn add_sender(
        &mut self,
        node: NodeId,
        local_address: Ipv4Addr,
        remote_node: NodeId,
        remote_address: Ipv4Addr,
        remote_port: u16,
        direction: Direction,
        start: Duration,
    ) {
        if !self.within_window(start) {
            tracing::debug!(
                "Sender {node} -> {remote_node} starts at {start:?}, outside the window"
            );
            self.plan.skipped_senders += 1;
            return;
        }

        let port = self.next_port.entry(node).or_insert(EPHEMERAL_PORT_START);
        let local_port = *port;
        *port += 1;

        self.plan.applications.push(Application::Sender(EchoSender {
            node,
            local_address,
            local_port,
            remote_node,
            remote_address,
            remote_port,
            direction,
            packet_size: self.traffic.packet_size,
            max_packets: self.traffic.max_packets,
            interval: self.traffic.interval,
            start,
            stop: self.window,
            sent: 0,
            running: false,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stagger_policy() {
        let traffic = TrafficConfig::default();

        assert_eq!(client_sender_start(&traffic, NodeId(0)), Duration::from_secs(2));
        assert_eq!(
            client_sender_start(&traffic, NodeId(3)),
            Duration::from_millis(2300)
        );
        assert_eq!(ap_sender_start(&traffic, NodeId(3)), Duration::from_millis(3300));
    }

    #[test]
    fn test_two_flows_per_client() {
        let config = ExperimentConfig::for_testing();
        let topology = Topology::builder(10).ap_index(9).build().unwrap();
        let plan = TrafficScheduler::new(&topology, &config).plan();

        let senders: Vec<_> = plan.senders().collect();
        assert_eq!(senders.len(), 18);
        assert_eq!(plan.listeners().count(), 10);
        assert_eq!(plan.skipped_senders, 0);

        let uplinks = senders
            .iter()
            .filter(|s| s.direction == Direction::ClientToAp)
            .count();
        assert_eq!(uplinks, 9);

        for sender in &senders {
            match sender.direction {
                Direction::ClientToAp => {
                    assert_eq!(sender.remote_node, NodeId(9));
                    assert_eq!(sender.remote_port, 9);
                    assert_eq!(sender.local_port, EPHEMERAL_PORT_START);
                }
                Direction::ApToClient => {
                    assert_eq!(sender.node, NodeId(9));
                    assert_eq!(sender.remote_port, 10);
                    // AP senders start after the matching client sender
                    assert!(sender.start > client_sender_start(&config.traffic, sender.remote_node));
                }
            }
            assert_eq!(sender.stop, config.observation_window);
        }
    }

    #[test]
    fn test_ap_senders_get_distinct_ephemeral_ports() {
        let config = ExperimentConfig::for_testing();
        let topology = Topology::builder(10).ap_index(0).build().unwrap();
        let plan = TrafficScheduler::new(&topology, &config).plan();

        let mut ports: Vec<u16> = plan
            .senders()
            .filter(|s| s.direction == Direction::ApToClient)
            .map(|s| s.local_port)
            .collect();
        ports.dedup();
        assert_eq!(ports.len(), 9);
        assert_eq!(ports[0], EPHEMERAL_PORT_START);
        assert_eq!(ports[8], EPHEMERAL_PORT_START + 8);
    }

    #[test]
    fn test_senders_outside_window_skipped() {
        let mut config = ExperimentConfig::for_testing();
        config.observation_window = Duration::from_millis(2500);
        let topology = Topology::builder(10).ap_index(9).build().unwrap();
        let plan = TrafficScheduler::new(&topology, &config).plan();

        // Client senders on nodes 0..=4 start at 2.0..=2.4 s; everything else is late
        assert_eq!(plan.senders().count(), 5);
        assert_eq!(plan.skipped_senders, 13);
        assert!(plan.senders().all(|s| s.start < config.observation_window));
    }

    #[test]
    fn test_ap_only_topology_has_no_senders() {
        let config = ExperimentConfig::for_testing();
        let topology = Topology::builder(1).min_nodes(1).build().unwrap();
        let plan = TrafficScheduler::new(&topology, &config).plan();

        assert_eq!(plan.senders().count(), 0);
        assert_eq!(plan.listeners().count(), 1);
    }

    #[test]
    fn test_sender_rearm_bound() {
        let sender = EchoSender {
            node: NodeId(0),
            local_address: Ipv4Addr::new(10, 1, 1, 1),
            local_port: EPHEMERAL_PORT_START,
            remote_node: NodeId(9),
            remote_address: Ipv4Addr::new(10, 1, 1, 10),
            remote_port: 9,
            direction: Direction::ClientToAp,
            packet_size: 512,
            max_packets: 50,
            interval: Duration::from_millis(100),
            start: Duration::from_secs(2),
            stop: Duration::from_secs(3),
            sent: 1,
            running: true,
        };

        assert_eq!(
            sender.next_send(Duration::from_secs(2)),
            Some(Duration::from_millis(2100))
        );
        assert_eq!(sender.next_send(Duration::from_millis(2900)), None);
        assert!(!sender.can_send(Duration::from_secs(3)));
    }
}
