//! CLI command implementations

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use apnet_core::ApnetError;
use apnet_core::config::{ConfigError, ExperimentConfig};
use apnet_core::tracing_setup::{CliLogLevel, init_tracing};
use apnet_sim::{Experiment, ExperimentError};
use clap::{Args, Subcommand};

/// Exit status for configuration errors.
const EXIT_CONFIG_ERROR: u8 = 2;

/// Exit status for every other failure.
const EXIT_FAILURE: u8 = 1;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run an experiment and write its artifacts
    Run(RunArgs),
    /// Check the configuration without running anything
    Validate(RunArgs),
}

/// Experiment parameters; anything omitted falls back to APNET_* variables, then defaults
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Number of endpoints, AP included
    #[arg(long)]
    pub nodes: Option<u32>,
    /// UDP payload size in bytes
    #[arg(long)]
    pub packet_size: Option<u32>,
    /// Observation window in seconds
    #[arg(long)]
    pub sim_time: Option<f64>,
    /// Packets each sender emits at most
    #[arg(long)]
    pub max_packets: Option<u32>,
    /// Inter-packet interval in milliseconds
    #[arg(long)]
    pub interval: Option<u64>,
    /// Endpoint acting as access point (defaults to the last one)
    #[arg(long)]
    pub ap_index: Option<u32>,
    /// Info-level experiment logging
    #[arg(long, value_name = "BOOL")]
    pub verbose: Option<bool>,
    /// Capture the AP interface to a pcap file
    #[arg(long, value_name = "BOOL")]
    pub pcap: Option<bool>,
    /// Write the topology animation file
    #[arg(long, value_name = "BOOL")]
    pub animation: Option<bool>,
    /// Directory receiving every artifact
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Seed of the channel loss model
    #[arg(long)]
    pub seed: Option<u64>,
    /// Frame loss probability
    #[arg(long)]
    pub loss_rate: Option<f64>,
    /// Reject out-of-range values instead of correcting them. Without this
    /// flag a node count below 10 is raised to 10 and an AP index past the
    /// last node is clamped to it, with a warning, and the run proceeds
    #[arg(long)]
    pub strict: bool,
    /// Shell command run after the artifacts are written
    #[arg(long)]
    pub analysis_hook: Option<String>,
    /// Console log level (overrides --verbose)
    #[arg(long, value_enum)]
    pub log_level: Option<CliLogLevel>,
    /// Directory receiving the full trace log [default: ./logs]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Layers the flags over the environment-derived configuration.
    ///
    /// # Errors
    /// - `ConfigError::InvalidWindow` - `--sim-time` is negative or not finite
    pub fn to_config(&self) -> Result<ExperimentConfig, ConfigError> {
        let mut config = ExperimentConfig::from_env();

        if let Some(nodes) = self.nodes {
            config.topology.node_count = nodes;
        }
        if let Some(ap_index) = self.ap_index {
            config.topology.ap_index = Some(ap_index);
        }
        if let Some(size) = self.packet_size {
            config.traffic.packet_size = size;
        }
        if let Some(count) = self.max_packets {
            config.traffic.max_packets = count;
        }
        if let Some(ms) = self.interval {
            config.traffic.interval = Duration::from_millis(ms);
        }
        if let Some(seconds) = self.sim_time {
            config.observation_window =
                Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::InvalidWindow)?;
        }
        if let Some(verbose) = self.verbose {
            config.output.verbose = verbose;
        }
        if let Some(pcap) = self.pcap {
            config.output.pcap = pcap;
        }
        if let Some(animation) = self.animation {
            config.output.animation = animation;
        }
        if let Some(dir) = &self.output_dir {
            config.output.output_dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            config.channel.seed = seed;
        }
        if let Some(rate) = self.loss_rate {
            config.channel.loss_rate = rate;
        }
        if let Some(hook) = &self.analysis_hook {
            config.output.analysis_hook = Some(hook.clone());
        }

        Ok(config)
    }

    fn console_level(&self, config: &ExperimentConfig) -> CliLogLevel {
        self.log_level
            .unwrap_or_else(|| CliLogLevel::from_verbose(config.output.verbose))
    }

    /// Builds and finalizes the configuration, then starts logging.
    ///
    /// Nothing touches the filesystem until the configuration is accepted.
    /// Normalisation runs again once logging is up so its warnings are kept.
    ///
    /// # Errors
    /// - `ConfigError` - Invalid configuration
    /// - `std::io::Error` - Log directory or file could not be created
    fn prepare(&self) -> anyhow::Result<ExperimentConfig> {
        let config = self.to_config()?;
        finalize_config(config.clone(), self.strict)?;

        init_tracing(
            self.console_level(&config).as_tracing_level(),
            self.log_dir.as_deref(),
        )
        .context("Failed to initialise logging")?;

        Ok(finalize_config(config, self.strict)?)
    }
}

/// Normalises the configuration unless `strict`, then validates it.
///
/// # Errors
/// - `ConfigError` - Configuration still invalid after any correction
pub fn finalize_config(
    config: ExperimentConfig,
    strict: bool,
) -> Result<ExperimentConfig, ConfigError> {
    let config = if strict { config } else { config.normalized() };
    config.validate()?;
    Ok(config)
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run_experiment(args).await,
        Commands::Validate(args) => validate_config(args).await,
    }
}

/// Message shown to the operator for a command failure.
pub fn describe(error: &anyhow::Error) -> String {
    match error.downcast_ref::<ExperimentError>() {
        Some(e) => e.user_message(),
        None => format!("{error:#}"),
    }
}

/// Maps a command failure to the process exit status.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    let config_error = error.downcast_ref::<ConfigError>().is_some()
        || error
            .downcast_ref::<ApnetError>()
            .is_some_and(ApnetError::is_user_error)
        || error
            .downcast_ref::<ExperimentError>()
            .is_some_and(ExperimentError::is_user_error);

    if config_error {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// Run an experiment, write its artifacts and print the report
///
/// # Errors
/// - `ConfigError` - Invalid configuration
/// - `ExperimentError` - Simulation aborted or artifacts could not be written
pub async fn run_experiment(args: RunArgs) -> anyhow::Result<()> {
    let config = args.prepare()?;
    let output_dir = config.output.output_dir.clone();
    let experiment = Experiment::new(config)?;

    let (experiment, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = experiment.run();
        (experiment, outcome)
    })
    .await
    .context("Experiment task panicked")?;
    let outcome = outcome?;

    let artifacts = experiment.write_artifacts(&outcome, &output_dir)?;

    println!("{}", outcome.report.render_text());
    if experiment.config().output.verbose {
        outcome.report.log_summary();
        tracing::debug!("{}", outcome.simulation.summary());
    }
    println!("Flow statistics written to {}", artifacts.flow_stats.display());
    if let Some(path) = &artifacts.pcap {
        println!("AP capture written to {}", path.display());
    }
    if let Some(path) = &artifacts.animation {
        println!("Animation written to {}", path.display());
    }

    if let Some(hook) = &experiment.config().output.analysis_hook {
        run_analysis_hook(hook, &output_dir, &artifacts.flow_stats).await;
    }

    Ok(())
}

/// Validate the configuration and print what would run
///
/// # Errors
/// - `ConfigError` - Invalid configuration
/// - `std::io::Error` - Log directory or file could not be created
pub async fn validate_config(args: RunArgs) -> anyhow::Result<()> {
    let config = args.prepare()?;
    println!(
        "Configuration OK: {} nodes, AP index {}, {}-byte packets, window {:?}",
        config.topology.node_count,
        config.topology.requested_ap_index(),
        config.traffic.packet_size,
        config.observation_window
    );

    Ok(())
}

/// Runs the post-run analysis command; failures are reported, never fatal.
///
/// Returns true if the command ran and exited successfully.
pub async fn run_analysis_hook(command: &str, output_dir: &Path, flow_stats: &Path) -> bool {
    tracing::info!("Running analysis hook: {command}");

    let status = shell(command)
        .env("APNET_OUTPUT_DIR", output_dir)
        .env("APNET_FLOW_STATS", flow_stats)
        .status()
        .await;

    match status {
        Ok(status) if status.success() => {
            tracing::info!("Analysis hook completed");
            true
        }
        Ok(status) => {
            tracing::warn!("Analysis hook exited with {status}");
            false
        }
        Err(e) => {
            tracing::warn!("Analysis hook could not be started: {e}");
            false
        }
    }
}

#[cfg(unix)]
fn shell(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(test)]
mod tests {
    use apnet_sim::SimulationError;

    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = RunArgs {
            nodes: Some(20),
            ap_index: Some(5),
            sim_time: Some(12.5),
            interval: Some(50),
            pcap: Some(false),
            ..Default::default()
        };

        let config = args.to_config().unwrap();
        assert_eq!(config.topology.node_count, 20);
        assert_eq!(config.topology.ap_index, Some(5));
        assert_eq!(config.observation_window, Duration::from_millis(12_500));
        assert_eq!(config.traffic.interval, Duration::from_millis(50));
        assert!(!config.output.pcap);
    }

    #[test]
    fn test_negative_sim_time_rejected() {
        let args = RunArgs {
            sim_time: Some(-1.0),
            ..Default::default()
        };
        assert_eq!(args.to_config().unwrap_err(), ConfigError::InvalidWindow);
    }

    #[test]
    fn test_lenient_mode_clamps_ap_index() {
        let args = RunArgs {
            nodes: Some(10),
            ap_index: Some(50),
            ..Default::default()
        };

        let config = finalize_config(args.to_config().unwrap(), false).unwrap();
        assert_eq!(config.topology.ap_index, Some(9));
    }

    #[test]
    fn test_strict_mode_rejects_ap_index() {
        let args = RunArgs {
            nodes: Some(10),
            ap_index: Some(15),
            strict: true,
            ..Default::default()
        };

        let result = finalize_config(args.to_config().unwrap(), args.strict);
        assert!(matches!(
            result,
            Err(ConfigError::ApIndexOutOfRange {
                ap_index: 15,
                node_count: 10
            })
        ));
    }

    #[test]
    fn test_exit_codes() {
        let config_error = anyhow::Error::new(ConfigError::InvalidInterval);
        assert_eq!(exit_code(&config_error), EXIT_CONFIG_ERROR);

        let wrapped = anyhow::Error::new(ExperimentError::from(ConfigError::InvalidWindow));
        assert_eq!(exit_code(&wrapped), EXIT_CONFIG_ERROR);

        let io = anyhow::Error::new(std::io::Error::other("disk full"));
        assert_eq!(exit_code(&io), EXIT_FAILURE);

        let aborted = anyhow::Error::new(ExperimentError::from(
            SimulationError::TooManyInvariantViolations { count: 10 },
        ));
        assert_eq!(exit_code(&aborted), EXIT_FAILURE);
        assert!(describe(&aborted).starts_with("Simulation aborted"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_hook_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let stats = dir.path().join("flow-stats.json");

        assert!(run_analysis_hook("exit 0", dir.path(), &stats).await);
        assert!(!run_analysis_hook("exit 3", dir.path(), &stats).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hook_sees_artifact_paths() {
        let dir = tempfile::tempdir().unwrap();
        let stats = dir.path().join("flow-stats.json");

        let ok = run_analysis_hook(r#"test -n "$APNET_FLOW_STATS""#, dir.path(), &stats).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_rejected_config_creates_no_logs() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let args = RunArgs {
            nodes: Some(10),
            ap_index: Some(15),
            strict: true,
            output_dir: Some(dir.path().join("output")),
            log_dir: Some(logs.clone()),
            ..Default::default()
        };

        let error = run_experiment(args.clone()).await.unwrap_err();
        assert_eq!(exit_code(&error), EXIT_CONFIG_ERROR);
        assert!(validate_config(args).await.is_err());

        assert!(!logs.exists());
        assert!(!dir.path().join("output").exists());
    }

    #[tokio::test]
    async fn test_validate_reports_log_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let args = RunArgs {
            log_dir: Some(blocker.join("logs")),
            ..Default::default()
        };

        let error = validate_config(args).await.unwrap_err();
        assert_eq!(exit_code(&error), EXIT_FAILURE);
        assert!(format!("{error:#}").contains("Failed to initialise logging"));
    }

    #[tokio::test]
    async fn test_run_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let args = RunArgs {
            nodes: Some(10),
            sim_time: Some(8.0),
            verbose: Some(false),
            pcap: Some(true),
            animation: Some(true),
            output_dir: Some(dir.path().to_path_buf()),
            log_dir: Some(dir.path().join("logs")),
            ..Default::default()
        };

        run_experiment(args).await.unwrap();

        assert!(dir.path().join("flow-stats.json").exists());
        assert!(dir.path().join("ap-trace.pcap").exists());
        assert!(dir.path().join("animation.xml").exists());
    }
}
