//! Centralized configuration for Apnet experiments.
//!
//! Every tunable of an experiment lives here so the topology, traffic and
//! reporting code never carries hard-coded values of its own.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Smallest topology an experiment runs with.
pub const MIN_NODE_COUNT: u32 = 10;

/// Largest topology that fits in one /24 address block.
pub const MAX_NODE_COUNT: u32 = 254;

/// Largest UDP payload an IPv4 datagram can carry.
pub const MAX_PACKET_SIZE: u32 = 65_507;

/// Configuration rejected before any simulation work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("AP index {ap_index} must be less than node count {node_count}")]
    ApIndexOutOfRange { ap_index: u32, node_count: u32 },

    #[error("Node count {node_count} is below the minimum of {minimum}")]
    TooFewNodes { node_count: u32, minimum: u32 },

    #[error("Node count {node_count} exceeds the address block capacity of {maximum}")]
    TooManyNodes { node_count: u32, maximum: u32 },

    #[error("Packet size {size} must be between 1 and {maximum} bytes")]
    InvalidPacketSize { size: u32, maximum: u32 },

    #[error("Inter-packet interval must be positive")]
    InvalidInterval,

    #[error("Observation window must be positive")]
    InvalidWindow,

    #[error("Loss rate {rate} is outside [0, 1]")]
    InvalidLossRate { rate: f64 },
}

/// Central configuration for one experiment run.
///
/// Groups related settings into sections. Supports environment variable
/// overrides for quick parameter sweeps.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub topology: TopologyConfig,
    pub traffic: TrafficConfig,
    pub channel: ChannelConfig,
    pub output: OutputConfig,
    /// Total time the simulated network is active
    pub observation_window: Duration,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            topology: TopologyConfig::default(),
            traffic: TrafficConfig::default(),
            channel: ChannelConfig::default(),
            output: OutputConfig::default(),
            observation_window: Duration::from_secs(20),
        }
    }
}

/// Node population and AP placement.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// Number of endpoints on the shared segment
    pub node_count: u32,
    /// Requested AP endpoint (None = last node)
    pub ap_index: Option<u32>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            node_count: 25,
            ap_index: None,
        }
    }
}

impl TopologyConfig {
    /// Returns the AP index this configuration asks for, defaulting to the last node.
    pub fn requested_ap_index(&self) -> u32 {
        self.ap_index
            .unwrap_or_else(|| self.node_count.saturating_sub(1))
    }
}

/// Request/response traffic shape and start-time staggering.
#[derive(Debug, Clone)]
pub struct TrafficConfig {
    /// UDP payload size in bytes
    pub packet_size: u32,
    /// Packet ceiling per sender
    pub max_packets: u32,
    /// Time between consecutive sends of one sender
    pub interval: Duration,
    /// Port the AP listens on for client requests
    pub client_port: u16,
    /// Port every client listens on for AP requests
    pub ap_port: u16,
    /// Start time of every listener
    pub listener_start: Duration,
    /// Start time of the client→AP sender on endpoint 0
    pub client_start_base: Duration,
    /// Start time of the AP→client sender targeting endpoint 0
    pub ap_start_base: Duration,
    /// Per-endpoint start offset
    pub stagger: Duration,
    /// Delay excluded from the throughput denominator
    pub warmup_offset: Duration,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            packet_size: 512,
            max_packets: 50,
            interval: Duration::from_millis(100),
            client_port: 9,
            ap_port: 10,
            listener_start: Duration::from_secs(1),
            client_start_base: Duration::from_secs(2),
            ap_start_base: Duration::from_secs(3),
            stagger: Duration::from_millis(100),
            warmup_offset: Duration::from_secs(2),
        }
    }
}

/// Shared-medium channel parameters.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Medium data rate in bits per second
    pub data_rate_bps: u64,
    /// One-way propagation delay
    pub propagation_delay: Duration,
    /// Probability that a frame is dropped (0.0 to 1.0)
    pub loss_rate: f64,
    /// Seed for the loss model
    pub seed: u64,
    /// Frames that may wait for the medium before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            data_rate_bps: 100_000_000, // 100 Mbps
            propagation_delay: Duration::from_micros(10),
            loss_rate: 0.0,
            seed: 42,
            queue_capacity: 100,
        }
    }
}

/// Artifact and logging toggles.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Info-level logging of the experiment
    pub verbose: bool,
    /// Packet capture on the AP interface
    pub pcap: bool,
    /// Topology animation file
    pub animation: bool,
    /// Directory receiving every artifact
    pub output_dir: PathBuf,
    /// External command run after the artifacts are written
    pub analysis_hook: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            verbose: true,
            pcap: true,
            animation: true,
            output_dir: PathBuf::from("output"),
            analysis_hook: None,
        }
    }
}

impl ExperimentConfig {
    /// Creates a configuration for fast, quiet, artifact-free test runs.
    pub fn for_testing() -> Self {
        Self {
            topology: TopologyConfig {
                node_count: MIN_NODE_COUNT,
                ap_index: None,
            },
            output: OutputConfig {
                verbose: false,
                pcap: false,
                animation: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Applies operator-side corrections before handing the config to the engine.
    ///
    /// Raises the node count to the minimum and clamps an out-of-range AP
    /// index to the last node. Both corrections are logged as warnings.
    pub fn normalized(mut self) -> Self {
        if self.topology.node_count < MIN_NODE_COUNT {
            tracing::warn!(
                "Node count {} below minimum, raising to {}",
                self.topology.node_count,
                MIN_NODE_COUNT
            );
            self.topology.node_count = MIN_NODE_COUNT;
        }

        let requested = self.topology.requested_ap_index();
        let resolved = requested.min(self.topology.node_count - 1);
        if resolved != requested {
            tracing::warn!("AP index {requested} out of range, clamping to {resolved}");
        }
        self.topology.ap_index = Some(resolved);

        self
    }

    /// Checks the configuration strictly, without correcting anything.
    ///
    /// # Errors
    ///
    /// - `ConfigError::ApIndexOutOfRange` - AP index not below node count
    /// - `ConfigError::TooFewNodes` / `TooManyNodes` - Node count outside the supported range
    /// - `ConfigError::InvalidPacketSize` - Payload empty or larger than one UDP datagram
    /// - `ConfigError::InvalidInterval` / `InvalidWindow` - Zero timing parameters
    /// - `ConfigError::InvalidLossRate` - Loss rate is not a probability
    pub fn validate(&self) -> Result<(), ConfigError> {
        let node_count = self.topology.node_count;
        let ap_index = self.topology.requested_ap_index();

        if ap_index >= node_count {
            return Err(ConfigError::ApIndexOutOfRange {
                ap_index,
                node_count,
            });
        }
        if node_count < MIN_NODE_COUNT {
            return Err(ConfigError::TooFewNodes {
                node_count,
                minimum: MIN_NODE_COUNT,
            });
        }
        if node_count > MAX_NODE_COUNT {
            return Err(ConfigError::TooManyNodes {
                node_count,
                maximum: MAX_NODE_COUNT,
            });
        }
        let size = self.traffic.packet_size;
        if size == 0 || size > MAX_PACKET_SIZE {
            return Err(ConfigError::InvalidPacketSize {
                size,
                maximum: MAX_PACKET_SIZE,
            });
        }
        if self.traffic.interval.is_zero() {
            return Err(ConfigError::InvalidInterval);
        }
        if self.observation_window.is_zero() {
            return Err(ConfigError::InvalidWindow);
        }
        if !(0.0..=1.0).contains(&self.channel.loss_rate) {
            return Err(ConfigError::InvalidLossRate {
                rate: self.channel.loss_rate,
            });
        }

        Ok(())
    }

    /// Returns the active traffic period used as the throughput denominator.
    ///
    /// `None` when the observation window does not extend past the warm-up offset.
    pub fn throughput_window(&self) -> Option<Duration> {
        self.observation_window
            .checked_sub(self.traffic.warmup_offset)
            .filter(|window| !window.is_zero())
    }

    /// Creates configuration with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(nodes) = env_parse::<u32>("APNET_NODES") {
            config.topology.node_count = nodes;
        }
        if let Some(ap_index) = env_parse::<u32>("APNET_AP_INDEX") {
            config.topology.ap_index = Some(ap_index);
        }
        if let Some(size) = env_parse::<u32>("APNET_PACKET_SIZE") {
            config.traffic.packet_size = size;
        }
        if let Some(count) = env_parse::<u32>("APNET_MAX_PACKETS") {
            config.traffic.max_packets = count;
        }
        if let Some(ms) = env_parse::<u64>("APNET_INTERVAL_MS") {
            config.traffic.interval = Duration::from_millis(ms);
        }
        if let Some(seconds) = env_parse::<u64>("APNET_SIM_TIME") {
            config.observation_window = Duration::from_secs(seconds);
        }
        if let Some(seed) = env_parse::<u64>("APNET_SEED") {
            config.channel.seed = seed;
        }
        if let Some(rate) = env_parse::<f64>("APNET_LOSS_RATE") {
            config.channel.loss_rate = rate;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = ExperimentConfig::default();

        assert_eq!(config.topology.node_count, 25);
        assert_eq!(config.topology.requested_ap_index(), 24);
        assert_eq!(config.traffic.packet_size, 512);
        assert_eq!(config.traffic.max_packets, 50);
        assert_eq!(config.traffic.interval, Duration::from_millis(100));
        assert_eq!(config.observation_window, Duration::from_secs(20));
        assert!(config.output.verbose);
        assert!(config.output.pcap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalize_raises_node_count() {
        let mut config = ExperimentConfig::default();
        config.topology.node_count = 3;

        let config = config.normalized();
        assert_eq!(config.topology.node_count, MIN_NODE_COUNT);
        // Default AP is the last node of the requested topology, clamped after raising
        assert_eq!(config.topology.ap_index, Some(9));
    }

    #[test]
    fn test_normalize_clamps_ap_index() {
        let mut config = ExperimentConfig::for_testing();
        config.topology.ap_index = Some(50);

        let config = config.normalized();
        assert_eq!(config.topology.ap_index, Some(9));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_ap() {
        let mut config = ExperimentConfig::for_testing();
        config.topology.ap_index = Some(15);

        assert_eq!(
            config.validate(),
            Err(ConfigError::ApIndexOutOfRange {
                ap_index: 15,
                node_count: 10
            })
        );
    }

    #[test]
    fn test_validate_rejects_small_topology() {
        let mut config = ExperimentConfig::for_testing();
        config.topology.node_count = 5;
        config.topology.ap_index = Some(0);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooFewNodes { node_count: 5, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_topology() {
        let mut config = ExperimentConfig::for_testing();
        config.topology.node_count = 300;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyNodes { .. })
        ));
    }

    #[test]
    fn test_validate_packet_size_bounds() {
        let mut config = ExperimentConfig::for_testing();

        config.traffic.packet_size = MAX_PACKET_SIZE;
        assert!(config.validate().is_ok());

        for size in [0, MAX_PACKET_SIZE + 1, u32::MAX] {
            config.traffic.packet_size = size;
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidPacketSize {
                    size,
                    maximum: MAX_PACKET_SIZE
                })
            );
        }
    }

    #[test]
    fn test_validate_rejects_bad_loss_rate() {
        let mut config = ExperimentConfig::for_testing();
        config.channel.loss_rate = 1.5;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLossRate { .. })
        ));
    }

    #[test]
    fn test_throughput_window() {
        let mut config = ExperimentConfig::default();
        assert_eq!(config.throughput_window(), Some(Duration::from_secs(18)));

        config.observation_window = Duration::from_secs(2);
        assert_eq!(config.throughput_window(), None);

        config.observation_window = Duration::from_secs(1);
        assert_eq!(config.throughput_window(), None);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("APNET_NODES", "40");
            std::env::set_var("APNET_AP_INDEX", "3");
            std::env::set_var("APNET_INTERVAL_MS", "250");
            std::env::set_var("APNET_SEED", "7");
        }

        let config = ExperimentConfig::from_env();

        assert_eq!(config.topology.node_count, 40);
        assert_eq!(config.topology.ap_index, Some(3));
        assert_eq!(config.traffic.interval, Duration::from_millis(250));
        assert_eq!(config.channel.seed, 7);

        unsafe {
            std::env::remove_var("APNET_NODES");
            std::env::remove_var("APNET_AP_INDEX");
            std::env::remove_var("APNET_INTERVAL_MS");
            std::env::remove_var("APNET_SEED");
        }
    }
}
