//! Flow registry: lazy flow creation and monotonic counters.

use std::collections::HashMap;
use std::time::Duration;

use super::{FiveTuple, FlowId};

/// What happened to a packet at an observation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Handed to the medium by its sender
    Sent,
    /// Arrived at the destination's network layer
    Delivered,
    /// Dropped by the medium, or still in flight when the window closed
    Lost,
}

/// One packet event as reported by the channel.
#[derive(Debug, Clone, Copy)]
pub struct PacketObservation {
    pub tuple: FiveTuple,
    /// Unique id of the packet for the whole run
    pub packet_uid: u64,
    /// Network-layer size in bytes
    pub bytes: u32,
    /// Simulation time of the event
    pub time: Duration,
    pub outcome: PacketOutcome,
}

/// Counters accumulated for one flow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// Echo replies the flow's sender got back
    pub echo_replies: u64,
    /// Sum of one-way delays of delivered packets
    pub delay_sum: Duration,
    /// Sum of delay variation between consecutive deliveries
    pub jitter_sum: Duration,
    pub time_first_tx: Option<Duration>,
    pub time_last_tx: Option<Duration>,
    pub time_first_rx: Option<Duration>,
    pub time_last_rx: Option<Duration>,
    last_delay: Option<Duration>,
}

impl FlowStats {
    fn record_sent(&mut self, bytes: u32, time: Duration) {
        self.tx_packets += 1;
        self.tx_bytes += u64::from(bytes);
        self.time_first_tx.get_or_insert(time);
        self.time_last_tx = Some(time);
    }

    fn record_delivered(&mut self, bytes: u32, time: Duration, delay: Duration) {
        self.rx_packets += 1;
        self.rx_bytes += u64::from(bytes);
        self.delay_sum += delay;
        if let Some(previous) = self.last_delay {
            self.jitter_sum += delay.abs_diff(previous);
        }
        self.last_delay = Some(delay);
        self.time_first_rx.get_or_insert(time);
        self.time_last_rx = Some(time);
    }

    fn record_lost(&mut self) {
        self.lost_packets += 1;
    }
}

/// A classified flow with its counters.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub id: FlowId,
    pub tuple: FiveTuple,
    pub stats: FlowStats,
}

/// Mapping from five-tuple to flow record, built lazily as packets are observed.
///
/// Only the event loop mutates the registry; it is read-only once closed.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: Vec<FlowRecord>,
    index: HashMap<FiveTuple, FlowId>,
    in_flight: HashMap<u64, (FlowId, Duration)>,
    closed: bool,
}

impl FlowRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Number of flows observed so far.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Returns true if no packet has been observed.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Returns true once the observation window has closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Packets sent but neither delivered nor lost yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Flows in flow-identity order.
    pub fn flows(&self) -> impl Iterator<Item = &FlowRecord> {
        self.flows.iter()
    }

    /// Looks up a flow by its key.
    pub fn get(&self, tuple: &FiveTuple) -> Option<&FlowRecord> {
        self.index
            .get(tuple)
            .map(|id| &self.flows[(id.0 - 1) as usize])
    }

    /// Looks up a flow by id.
    pub fn flow(&self, id: FlowId) -> Option<&FlowRecord> {
        id.0.checked_sub(1)
            .and_then(|slot| self.flows.get(slot as usize))
    }

    /// Applies one packet event.
    ///
    /// `Sent` creates the flow on first observation. `Delivered` and `Lost`
    /// resolve the packet through its uid; events for packets that were never
    /// sent, or already resolved, are ignored so `rx + lost <= tx` always holds.
    /// Returns the flow the event was attributed to.
    pub fn observe(&mut self, observation: PacketObservation) -> Option<FlowId> {
        if self.closed {
            tracing::warn!(
                "Ignoring {:?} for {} after window close",
                observation.outcome,
                observation.tuple
            );
            return None;
        }

        match observation.outcome {
            PacketOutcome::Sent => {
                let id = self.resolve(observation.tuple);
                self.record_mut(id)
                    .stats
                    .record_sent(observation.bytes, observation.time);
                self.in_flight
                    .insert(observation.packet_uid, (id, observation.time));
                Some(id)
            }
            PacketOutcome::Delivered => {
                let Some((id, sent_at)) = self.in_flight.remove(&observation.packet_uid) else {
                    tracing::warn!(
                        "Delivery of unknown packet {} on {}",
                        observation.packet_uid,
                        observation.tuple
                    );
                    return None;
                };
                let delay = observation.time.saturating_sub(sent_at);
                self.record_mut(id)
                    .stats
                    .record_delivered(observation.bytes, observation.time, delay);
                Some(id)
            }
            PacketOutcome::Lost => {
                let (id, _) = self.in_flight.remove(&observation.packet_uid)?;
                self.record_mut(id).stats.record_lost();
                Some(id)
            }
        }
    }

    /// Credits an echo reply to the flow whose request it answers.
    ///
    /// `reply` is the reply's own five-tuple; the request flow is its reverse.
    pub fn record_echo_reply(&mut self, reply: &FiveTuple) -> Option<FlowId> {
        if self.closed {
            return None;
        }
        let id = *self.index.get(&reply.reversed())?;
        self.record_mut(id).stats.echo_replies += 1;
        Some(id)
    }

    /// Closes the window: every packet still in flight is declared lost.
    ///
    /// Returns the number of packets declared lost by the close.
    pub fn close(&mut self) -> usize {
        if self.closed {
            return 0;
        }

        let stranded: Vec<FlowId> = self.in_flight.drain().map(|(_, (id, _))| id).collect();
        for id in &stranded {
            self.record_mut(*id).stats.record_lost();
        }
        self.closed = true;

        tracing::debug!(
            "Flow registry closed: {} flows, {} stranded packets declared lost",
            self.flows.len(),
            stranded.len()
        );
        stranded.len()
    }

    fn resolve(&mut self, tuple: FiveTuple) -> FlowId {
        if let Some(id) = self.index.get(&tuple) {
            return *id;
        }

        let id = FlowId(self.flows.len() as u32 + 1);
        self.flows.push(FlowRecord {
            id,
            tuple,
            stats: FlowStats::default(),
        });
        self.index.insert(tuple, id);
        tracing::trace!("New flow {id}: {tuple}");
        id
    }

    fn record_mut(&mut self, id: FlowId) -> &mut FlowRecord {
        &mut self.flows[(id.0 - 1) as usize]
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn tuple(client: u8) -> FiveTuple {
        FiveTuple::udp(
            Ipv4Addr::new(10, 1, 1, client),
            49153,
            Ipv4Addr::new(10, 1, 1, 10),
            9,
        )
    }

    fn event(tuple: FiveTuple, uid: u64, millis: u64, outcome: PacketOutcome) -> PacketObservation {
        PacketObservation {
            tuple,
            packet_uid: uid,
            bytes: 540,
            time: Duration::from_millis(millis),
            outcome,
        }
    }

    #[test]
    fn test_flow_created_on_first_send() {
        let mut registry = FlowRegistry::new();
        assert!(registry.is_empty());

        let id = registry.observe(event(tuple(1), 0, 0, PacketOutcome::Sent));
        assert_eq!(id, Some(FlowId(1)));

        let id = registry.observe(event(tuple(2), 1, 0, PacketOutcome::Sent));
        assert_eq!(id, Some(FlowId(2)));

        let again = registry.observe(event(tuple(1), 2, 100, PacketOutcome::Sent));
        assert_eq!(again, Some(FlowId(1)));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&tuple(1)).unwrap().stats.tx_packets, 2);
    }

    #[test]
    fn test_delivery_accumulates_delay_and_jitter() {
        let mut registry = FlowRegistry::new();
        let t = tuple(1);

        registry.observe(event(t, 0, 0, PacketOutcome::Sent));
        registry.observe(event(t, 0, 2, PacketOutcome::Delivered));
        registry.observe(event(t, 1, 100, PacketOutcome::Sent));
        registry.observe(event(t, 1, 105, PacketOutcome::Delivered));

        let stats = &registry.get(&t).unwrap().stats;
        assert_eq!(stats.rx_packets, 2);
        assert_eq!(stats.rx_bytes, 1080);
        assert_eq!(stats.delay_sum, Duration::from_millis(7));
        assert_eq!(stats.jitter_sum, Duration::from_millis(3));
        assert_eq!(stats.time_first_rx, Some(Duration::from_millis(2)));
        assert_eq!(stats.time_last_rx, Some(Duration::from_millis(105)));
    }

    #[test]
    fn test_unknown_delivery_ignored() {
        let mut registry = FlowRegistry::new();
        let t = tuple(1);

        registry.observe(event(t, 0, 0, PacketOutcome::Sent));
        registry.observe(event(t, 0, 1, PacketOutcome::Delivered));
        // Duplicate delivery of the same packet must not inflate rx
        assert_eq!(registry.observe(event(t, 0, 2, PacketOutcome::Delivered)), None);
        assert_eq!(registry.observe(event(t, 99, 2, PacketOutcome::Lost)), None);

        let stats = &registry.get(&t).unwrap().stats;
        assert_eq!(stats.tx_packets, 1);
        assert_eq!(stats.rx_packets, 1);
        assert_eq!(stats.lost_packets, 0);
    }

    #[test]
    fn test_close_declares_in_flight_lost() {
        let mut registry = FlowRegistry::new();
        let t = tuple(1);

        registry.observe(event(t, 0, 0, PacketOutcome::Sent));
        registry.observe(event(t, 1, 100, PacketOutcome::Sent));
        registry.observe(event(t, 0, 1, PacketOutcome::Delivered));
        assert_eq!(registry.in_flight(), 1);

        assert_eq!(registry.close(), 1);
        assert!(registry.is_closed());
        assert_eq!(registry.in_flight(), 0);

        let stats = &registry.get(&t).unwrap().stats;
        assert_eq!(stats.lost_packets, 1);
        assert!(stats.rx_packets + stats.lost_packets <= stats.tx_packets);

        // Closed registry is read-only
        assert_eq!(registry.observe(event(t, 2, 200, PacketOutcome::Sent)), None);
        assert_eq!(registry.get(&t).unwrap().stats.tx_packets, 2);
        assert_eq!(registry.close(), 0);
    }

    #[test]
    fn test_echo_reply_credited_to_request_flow() {
        let mut registry = FlowRegistry::new();
        let t = tuple(3);

        registry.observe(event(t, 0, 0, PacketOutcome::Sent));
        assert_eq!(registry.record_echo_reply(&t.reversed()), Some(FlowId(1)));
        assert_eq!(registry.record_echo_reply(&tuple(4).reversed()), None);
        assert_eq!(registry.get(&t).unwrap().stats.echo_replies, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_flow_lookup_by_id() {
        let mut registry = FlowRegistry::new();
        registry.observe(event(tuple(1), 0, 0, PacketOutcome::Sent));

        assert_eq!(registry.flow(FlowId(1)).unwrap().tuple, tuple(1));
        assert!(registry.flow(FlowId(0)).is_none());
        assert!(registry.flow(FlowId(2)).is_none());
    }
}
