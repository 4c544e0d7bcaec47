//! Shared-medium channel model.
//!
//! Every endpoint sits on one CSMA segment. Frames serialise on the medium
//! one after another, then propagate with a fixed delay. Frames waiting for
//! the medium sit in a drop-tail backlog. Collisions and backoff are not
//! modelled.

use std::collections::VecDeque;
use std::time::Duration;

use apnet_core::config::ChannelConfig;

use crate::deterministic::DeterministicRng;

/// Default number of frames that may wait for the medium.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Why a frame never reached its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropCause {
    /// Lost on the medium after transmission
    Medium,
    /// Backlog was full; the frame never went on the medium
    QueueFull,
}

/// Fate of one frame handed to the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmission {
    /// Frame occupies the medium from `start` and reaches the receiver at `arrival`
    Delivered { start: Duration, arrival: Duration },
    /// Frame was dropped; `start` is when it went on the medium, or when it
    /// was refused for a full backlog
    Dropped { start: Duration, cause: DropCause },
}

impl Transmission {
    /// Time the frame started occupying the medium.
    pub fn start(&self) -> Duration {
        match self {
            Transmission::Delivered { start, .. } | Transmission::Dropped { start, .. } => *start,
        }
    }

    /// Returns true if the frame was put on the medium.
    pub fn reached_medium(&self) -> bool {
        !matches!(
            self,
            Transmission::Dropped {
                cause: DropCause::QueueFull,
                ..
            }
        )
    }
}

/// Medium that carries frames between endpoints.
pub trait Channel: Send {
    /// Hands a frame of `frame_bytes` to the medium at time `now`.
    fn transmit(
        &mut self,
        now: Duration,
        frame_bytes: u32,
        rng: &mut DeterministicRng,
    ) -> Transmission;
}

/// Single shared segment with a fixed data rate and propagation delay.
pub struct CsmaChannel {
    data_rate_bps: u64,
    delay: Duration,
    loss_rate: f64,
    queue_capacity: usize,
    busy_until: Duration,
    /// Start times of frames still waiting for the medium, oldest first
    backlog: VecDeque<Duration>,
}

impl Default for CsmaChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CsmaChannel {
    /// Creates a lossless 100 Mbps segment with 10 µs propagation delay.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns builder for customizing the segment.
    pub fn builder() -> CsmaChannelBuilder {
        CsmaChannelBuilder::new()
    }

    /// Creates the segment described by the experiment configuration.
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::builder()
            .data_rate(config.data_rate_bps)
            .delay(config.propagation_delay)
            .loss_rate(config.loss_rate)
            .queue_capacity(config.queue_capacity)
            .build()
    }

    /// Time a frame of `frame_bytes` occupies the medium.
    pub fn transmission_time(&self, frame_bytes: u32) -> Duration {
        let bits = u128::from(frame_bytes) * 8;
        let nanos = bits * 1_000_000_000 / u128::from(self.data_rate_bps.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Time until which the medium is occupied.
    pub fn busy_until(&self) -> Duration {
        self.busy_until
    }

    /// Frames waiting for the medium at the last transmit call.
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }
}

impl Channel for CsmaChannel {
    fn transmit(
        &mut self,
        now: Duration,
        frame_bytes: u32,
        rng: &mut DeterministicRng,
    ) -> Transmission {
        while self.backlog.front().is_some_and(|&start| start <= now) {
            self.backlog.pop_front();
        }

        let start = now.max(self.busy_until);
        if start > now {
            if self.backlog.len() >= self.queue_capacity {
                tracing::trace!("Backlog full at {now:?}, frame of {frame_bytes} bytes dropped");
                return Transmission::Dropped {
                    start: now,
                    cause: DropCause::QueueFull,
                };
            }
            self.backlog.push_back(start);
        }

        let end = start + self.transmission_time(frame_bytes);
        self.busy_until = end;

        if self.loss_rate > 0.0 && rng.random_bool(self.loss_rate) {
            tracing::trace!("Frame of {frame_bytes} bytes dropped at {start:?}");
            return Transmission::Dropped {
                start,
                cause: DropCause::Medium,
            };
        }

        Transmission::Delivered {
            start,
            arrival: end + self.delay,
        }
    }
}

/// Builder for configuring the shared segment.
pub struct CsmaChannelBuilder {
    data_rate_bps: u64,
    delay: Duration,
    loss_rate: f64,
    queue_capacity: usize,
}

impl CsmaChannelBuilder {
    fn new() -> Self {
        Self {
            data_rate_bps: 100_000_000,
            delay: Duration::from_micros(10),
            loss_rate: 0.0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Sets data rate in bits per second.
    pub fn data_rate(mut self, bits_per_second: u64) -> Self {
        self.data_rate_bps = bits_per_second;
        self
    }

    /// Sets one-way propagation delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets frame loss probability (0.0-1.0).
    pub fn loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets how many frames may wait for the medium.
    pub fn queue_capacity(mut self, frames: usize) -> Self {
        self.queue_capacity = frames;
        self
    }

    /// Creates the channel with configured settings.
    pub fn build(self) -> CsmaChannel {
        CsmaChannel {
            data_rate_bps: self.data_rate_bps,
            delay: self.delay,
            loss_rate: self.loss_rate,
            queue_capacity: self.queue_capacity,
            busy_until: Duration::ZERO,
            backlog: VecDeque::new(),
        }
    }
}
