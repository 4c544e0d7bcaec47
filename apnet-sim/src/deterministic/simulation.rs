//! Core event loop driving traffic over the shared medium.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use apnet_core::flow::{FiveTuple, FlowRegistry, PacketObservation, PacketOutcome};
use apnet_core::topology::NodeId;
use thiserror::Error;

use super::clock::{DeterministicClock, DeterministicRng};
use super::events::{EventType, SimulationEvent};
use super::invariants::Invariant;
use super::state::SimulationMetrics;
use crate::capture::ApCapture;
use crate::channel::{Channel, DropCause, Transmission};
use crate::packet::{Packet, PacketKind};
use crate::traffic::{AppId, Application, TrafficPlan};

/// Maximum number of events that can be scheduled.
const MAX_EVENT_QUEUE_SIZE: usize = 100_000;

/// Maximum number of invariant violations before stopping simulation.
const MAX_INVARIANT_VIOLATIONS: usize = 10;

/// Errors that can occur during simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Event queue exceeded maximum capacity
    #[error("Event queue overflow: {count} events scheduled")]
    EventQueueOverflow {
        /// Number of events that caused overflow
        count: usize,
    },

    /// Too many invariant violations occurred
    #[error("Too many invariant violations: {count}")]
    TooManyInvariantViolations {
        /// Number of violations that occurred
        count: usize,
    },

    /// Event could not be scheduled properly
    #[error("Invalid event scheduling: {reason}")]
    InvalidEventScheduling {
        /// Reason why scheduling failed
        reason: String,
    },

    /// Event referenced an application that was never installed
    #[error("Unknown application: {app}")]
    UnknownApplication {
        /// Offending application id
        app: AppId,
    },
}

/// Result of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Seed used for reproduction
    pub seed: u64,
    /// Simulation time reached
    pub duration: Duration,
    /// Collected metrics
    pub metrics: SimulationMetrics,
    /// Total events processed
    pub event_count: u64,
    /// Whether simulation completed without invariant violations
    pub success: bool,
}

impl SimulationReport {
    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Simulation Report (seed: {})\n", self.seed));
        summary.push_str(&format!("Duration: {:?}\n", self.duration));
        summary.push_str(&format!("Events processed: {}\n", self.event_count));
        summary.push_str(&format!("Success: {}\n", self.success));
        summary.push_str("\nEvent breakdown:\n");

        for (event_type, count) in &self.metrics.events_by_type {
            summary.push_str(&format!("  {event_type}: {count}\n"));
        }

        if !self.metrics.invariant_violations.is_empty() {
            summary.push_str("\nInvariant violations:\n");
            for violation in &self.metrics.invariant_violations {
                summary.push_str(&format!("  - {violation}\n"));
            }
        }

        summary.push('\n');
        summary.push_str(&self.metrics.summary());
        summary
    }
}

/// Deterministic discrete-event engine for one experiment.
///
/// The flow registry is not owned by the engine; it is threaded through
/// [`DeterministicSimulation::execute_until`] so the caller keeps it after
/// the run.
pub struct DeterministicSimulation {
    /// Controlled clock
    clock: DeterministicClock,
    /// Deterministic RNG feeding the channel's loss model
    rng: DeterministicRng,
    /// Shared medium
    channel: Box<dyn Channel>,
    /// Event queue (min-heap by timestamp, then insertion order)
    event_queue: BinaryHeap<SimulationEvent>,
    /// Next event ID
    next_event_id: u64,
    /// Next packet uid
    next_packet_uid: u64,
    /// Installed applications, indexed by `AppId`
    applications: Vec<Application>,
    /// Listener bound to each (node, port)
    listeners: HashMap<(NodeId, u16), AppId>,
    /// Sender bound to each (node, local port), for echo delivery
    senders: HashMap<(NodeId, u16), AppId>,
    /// Metrics collector
    metrics: SimulationMetrics,
    /// Active invariants
    invariants: Vec<Arc<dyn Invariant>>,
    /// Frames seen on the AP interface, when enabled
    capture: Option<ApCapture>,
    /// Per-packet application events at info level instead of trace
    log_packets: bool,
}

impl DeterministicSimulation {
    /// Creates new simulation over `channel` seeded with `seed`.
    pub fn new(channel: Box<dyn Channel>, seed: u64) -> Self {
        Self {
            clock: DeterministicClock::new(),
            rng: DeterministicRng::from_seed(seed),
            channel,
            event_queue: BinaryHeap::new(),
            next_event_id: 0,
            next_packet_uid: 0,
            applications: Vec::new(),
            listeners: HashMap::new(),
            senders: HashMap::new(),
            metrics: SimulationMetrics::new(),
            invariants: Vec::new(),
            capture: None,
            log_packets: false,
        }
    }

    /// Returns the seed used for this simulation.
    pub fn simulation_seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Returns current simulation time.
    pub fn simulation_time(&self) -> Duration {
        self.clock.now()
    }

    /// Installed applications, indexed by `AppId`.
    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    /// Number of events waiting in the queue.
    pub fn pending_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Adds an invariant to check during simulation.
    pub fn add_invariant(&mut self, invariant: Arc<dyn Invariant>) {
        self.invariants.push(invariant);
    }

    /// Logs every send, echo and reply at info level.
    pub fn log_packets(&mut self, enabled: bool) {
        self.log_packets = enabled;
    }

    /// Starts recording every frame sent or received by `ap`.
    pub fn enable_capture(&mut self, ap: NodeId) {
        self.capture = Some(ApCapture::new(ap));
    }

    /// Frames captured so far, if capture is enabled.
    pub fn capture(&self) -> Option<&ApCapture> {
        self.capture.as_ref()
    }

    /// Takes ownership of the capture, leaving capture disabled.
    pub fn take_capture(&mut self) -> Option<ApCapture> {
        self.capture.take()
    }

    /// Installs every application of `plan` and schedules its start and stop.
    ///
    /// # Errors
    /// - `SimulationError::EventQueueOverflow` - Too many events scheduled
    /// - `SimulationError::InvalidEventScheduling` - An application starts in the past
    pub fn install(&mut self, plan: TrafficPlan) -> Result<(), SimulationError> {
        for application in plan.applications {
            let app = AppId(self.applications.len());
            match &application {
                Application::Sender(sender) => {
                    self.senders.insert((sender.node, sender.local_port), app);
                }
                Application::Listener(listener) => {
                    self.listeners.insert((listener.node, listener.port), app);
                }
            }

            let (start, stop) = (application.start(), application.stop());
            self.applications.push(application);
            self.schedule_at(start, EventType::ApplicationStart { app })?;
            self.schedule_at(stop, EventType::ApplicationStop { app })?;
        }

        tracing::debug!("Installed {} applications", self.applications.len());
        Ok(())
    }

    /// Schedules an event at an absolute simulation time.
    ///
    /// # Errors
    /// - `SimulationError::EventQueueOverflow` - Event queue is full
    /// - `SimulationError::InvalidEventScheduling` - Timestamp is in the past
    pub fn schedule_at(
        &mut self,
        timestamp: Duration,
        event_type: EventType,
    ) -> Result<(), SimulationError> {
        if timestamp < self.clock.now() {
            return Err(SimulationError::InvalidEventScheduling {
                reason: format!(
                    "{} at {:?} is before current time {:?}",
                    event_type.as_str(),
                    timestamp,
                    self.clock.now()
                ),
            });
        }
        if self.event_queue.len() >= MAX_EVENT_QUEUE_SIZE {
            return Err(SimulationError::EventQueueOverflow {
                count: self.event_queue.len(),
            });
        }

        let event = SimulationEvent::new(self.next_event_id, timestamp, event_type);
        self.next_event_id += 1;
        self.event_queue.push(event);
        self.metrics.update_peak_queue_depth(self.event_queue.len());

        Ok(())
    }

    /// Runs every event strictly before `end`, then closes the window.
    ///
    /// Applications still running at `end` are stopped and the clock is
    /// advanced to `end`. Events at or after `end` stay queued and are never
    /// processed.
    ///
    /// # Errors
    /// - `SimulationError::TooManyInvariantViolations` - Too many invariant violations
    /// - `SimulationError::EventQueueOverflow` - Event queue is full
    /// - `SimulationError::UnknownApplication` - Event referenced a missing application
    pub fn execute_until(
        &mut self,
        registry: &mut FlowRegistry,
        end: Duration,
    ) -> Result<SimulationReport, SimulationError> {
        while let Some(event) = self.event_queue.pop() {
            if event.timestamp >= end {
                self.event_queue.push(event);
                break;
            }

            self.clock.advance_to(event.timestamp)?;
            self.metrics.record_event(event.event_type.as_str());
            self.process_event(registry, event.event_type)?;

            self.check_invariants(registry)?;
        }

        for application in &mut self.applications {
            application.set_running(false);
        }
        if self.clock.now() < end {
            self.clock.advance_to(end)?;
        }

        tracing::debug!(
            "Simulation reached {:?}: {} events processed, {} left queued",
            end,
            self.metrics.events_processed,
            self.event_queue.len()
        );
        Ok(self.generate_report())
    }

    /// Processes a single event.
    fn process_event(
        &mut self,
        registry: &mut FlowRegistry,
        event_type: EventType,
    ) -> Result<(), SimulationError> {
        match event_type {
            EventType::ApplicationStart { app } => {
                let application = self.application_mut(app)?;
                application.set_running(true);
                if matches!(application, Application::Sender(_)) {
                    self.send_next(registry, app)?;
                }
            }
            EventType::ApplicationStop { app } => {
                self.application_mut(app)?.set_running(false);
            }
            EventType::SendPacket { app } => {
                self.send_next(registry, app)?;
            }
            EventType::PacketArrival { packet } => {
                let now = self.clock.now();
                if let Some(capture) = &mut self.capture {
                    capture.record_receive(now, &packet);
                }
                match packet.kind {
                    PacketKind::Request => self.deliver_request(registry, packet)?,
                    PacketKind::EchoReply => self.deliver_reply(registry, &packet),
                }
            }
        }

        Ok(())
    }

    /// Emits the next packet of a sender and re-arms it.
    fn send_next(&mut self, registry: &mut FlowRegistry, app: AppId) -> Result<(), SimulationError> {
        let now = self.clock.now();
        let uid = self.next_packet_uid;

        let Application::Sender(sender) = self.application_mut(app)? else {
            return Ok(());
        };
        if !sender.can_send(now) {
            return Ok(());
        }
        sender.sent += 1;
        let next_send = sender.next_send(now);
        let packet = Packet {
            uid,
            tuple: FiveTuple::udp(
                sender.local_address,
                sender.local_port,
                sender.remote_address,
                sender.remote_port,
            ),
            source_node: sender.node,
            destination_node: sender.remote_node,
            payload_bytes: sender.packet_size,
            kind: PacketKind::Request,
        };
        self.next_packet_uid += 1;

        self.packet_event(format_args!(
            "At {:?} {} sent {} bytes to {} port {}",
            now,
            packet.tuple.source,
            packet.payload_bytes,
            packet.tuple.destination,
            packet.tuple.destination_port
        ));
        registry.observe(PacketObservation {
            tuple: packet.tuple,
            packet_uid: packet.uid,
            bytes: packet.ip_bytes(),
            time: now,
            outcome: PacketOutcome::Sent,
        });

        if !self.transmit(packet.clone())? {
            registry.observe(PacketObservation {
                tuple: packet.tuple,
                packet_uid: packet.uid,
                bytes: packet.ip_bytes(),
                time: now,
                outcome: PacketOutcome::Lost,
            });
        }

        if let Some(next) = next_send {
            self.schedule_at(next, EventType::SendPacket { app })?;
        }
        Ok(())
    }

    /// Hands a packet to the medium; returns false if the medium dropped it.
    fn transmit(&mut self, packet: Packet) -> Result<bool, SimulationError> {
        let now = self.clock.now();
        let result = self
            .channel
            .transmit(now, packet.frame_bytes(), &mut self.rng);

        if let Some(capture) = self.capture.as_mut().filter(|_| result.reached_medium()) {
            capture.record_transmit(result.start(), &packet);
        }

        match result {
            Transmission::Delivered { arrival, .. } => {
                self.metrics.record_transmission(false);
                self.schedule_at(arrival, EventType::PacketArrival { packet })?;
                Ok(true)
            }
            Transmission::Dropped {
                cause: DropCause::Medium,
                ..
            } => {
                self.metrics.record_transmission(true);
                Ok(false)
            }
            Transmission::Dropped {
                cause: DropCause::QueueFull,
                ..
            } => {
                self.metrics.queue_drops += 1;
                Ok(false)
            }
        }
    }

    /// Accounts a request arrival and echoes it if a listener is bound.
    fn deliver_request(
        &mut self,
        registry: &mut FlowRegistry,
        packet: Packet,
    ) -> Result<(), SimulationError> {
        registry.observe(PacketObservation {
            tuple: packet.tuple,
            packet_uid: packet.uid,
            bytes: packet.ip_bytes(),
            time: self.clock.now(),
            outcome: PacketOutcome::Delivered,
        });

        let listener = self
            .listeners
            .get(&(packet.destination_node, packet.tuple.destination_port))
            .copied();
        let running = match listener {
            Some(app) => match self.application_mut(app)? {
                Application::Listener(listener) => listener.running,
                Application::Sender(_) => false,
            },
            None => false,
        };

        if !running {
            self.metrics.unanswered_arrivals += 1;
            tracing::trace!("No listener for {}, request not echoed", packet.tuple);
            return Ok(());
        }

        self.packet_event(format_args!(
            "At {:?} {} received {} bytes from {}, echoing",
            self.clock.now(),
            packet.tuple.destination,
            packet.payload_bytes,
            packet.tuple.source
        ));
        let echo = packet.echo(self.next_packet_uid);
        self.next_packet_uid += 1;
        self.metrics.echoes_sent += 1;
        self.transmit(echo)?;
        Ok(())
    }

    /// Credits an echo reply to its flow if the sender is still running.
    fn deliver_reply(&mut self, registry: &mut FlowRegistry, packet: &Packet) {
        let Some(app) = self
            .senders
            .get(&(packet.destination_node, packet.tuple.destination_port))
            .copied()
        else {
            return;
        };

        if let Some(Application::Sender(sender)) = self.applications.get(app.0) {
            if sender.running {
                registry.record_echo_reply(&packet.tuple);
                self.packet_event(format_args!(
                    "At {:?} {} received echo of {} bytes from {}",
                    self.clock.now(),
                    packet.tuple.destination,
                    packet.payload_bytes,
                    packet.tuple.source
                ));
            }
        }
    }

    fn packet_event(&self, message: std::fmt::Arguments<'_>) {
        if self.log_packets {
            tracing::info!("{message}");
        } else {
            tracing::trace!("{message}");
        }
    }

    fn application_mut(&mut self, app: AppId) -> Result<&mut Application, SimulationError> {
        self.applications
            .get_mut(app.0)
            .ok_or(SimulationError::UnknownApplication { app })
    }

    /// Checks all invariants.
    fn check_invariants(&mut self, registry: &FlowRegistry) -> Result<(), SimulationError> {
        let now = self.clock.now();
        for invariant in &self.invariants {
            if let Err(violation) = invariant.check(registry, now) {
                tracing::warn!("{violation}");
                self.metrics.record_invariant_violation(violation);

                if self.metrics.invariant_violations.len() >= MAX_INVARIANT_VIOLATIONS {
                    return Err(SimulationError::TooManyInvariantViolations {
                        count: self.metrics.invariant_violations.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Generates simulation report.
    fn generate_report(&self) -> SimulationReport {
        SimulationReport {
            seed: self.simulation_seed(),
            duration: self.clock.now(),
            metrics: self.metrics.clone(),
            event_count: self.metrics.events_processed,
            success: self.metrics.invariant_violations.is_empty(),
        }
    }
}
