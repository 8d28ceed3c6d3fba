use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gaintune",
    version,
    about = "Current-controller gain tuning on the inverter testbench"
)]
pub struct Cli {
    /// Config file (YAML). Defaults to ./gaintune.yaml when present.
    #[arg(long, global = true, env = "GAINTUNE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one episode with fixed gains
    Run(RunArgs),
    /// Grid sweep over Kp x Ki on the bench
    Sweep(SweepArgs),
    /// Decode a recorded telemetry file offline
    Decode(DecodeArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
    /// Print the version
    Version,
}

/// Config file overrides shared by every command that reads the config.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Testbench host
    #[arg(long, env = "GAINTUNE_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "GAINTUNE_PORT")]
    pub port: Option<u16>,

    /// SSH user
    #[arg(long, env = "GAINTUNE_USER")]
    pub user: Option<String>,

    /// Experiment executable on the bench
    #[arg(long)]
    pub executable: Option<String>,

    /// Control periods per episode
    #[arg(long)]
    pub steps: Option<usize>,

    /// d-axis current setpoint (A)
    #[arg(long)]
    pub i_ref: Option<f64>,

    /// Per-episode execution timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Results directory
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Write SVG plots for each episode
    #[arg(long)]
    pub plots: bool,
}

/// Where and how the experiment runs.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BenchArgs {
    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Serve recorded telemetry from FILE instead of contacting the bench
    #[arg(long, value_name = "FILE", conflicts_with = "local")]
    pub replay: Option<PathBuf>,

    /// Run the executable as a local process in DIR
    #[arg(long, value_name = "DIR")]
    pub local: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub bench: BenchArgs,

    /// Proportional gain (default: experiment.kp)
    #[arg(long)]
    pub kp: Option<f64>,

    /// Integral gain (default: experiment.ki)
    #[arg(long)]
    pub ki: Option<f64>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub bench: BenchArgs,

    /// Kp axis as start:stop:num or a single value (default: sweep.kp)
    #[arg(long, allow_hyphen_values = true)]
    pub kp_range: Option<String>,

    /// Ki axis as start:stop:num or a single value (default: sweep.ki)
    #[arg(long, allow_hyphen_values = true)]
    pub ki_range: Option<String>,

    /// Stop after the first episode that hits the current limit
    #[arg(long)]
    pub stop_on_unsafe: bool,

    /// Upper bound on episodes
    #[arg(long)]
    pub max_episodes: Option<usize>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DecodeArgs {
    /// Recorded experiment stdout
    pub file: PathBuf,

    /// Write the decoded table as CSV
    #[arg(long, value_name = "OUT")]
    pub csv: Option<PathBuf>,

    /// Write the three episode plots into DIR
    #[arg(long, value_name = "DIR")]
    pub render: Option<PathBuf>,

    /// Sample time for the plot time axis (default: experiment.dt)
    #[arg(long)]
    pub dt: Option<f64>,

    /// Print remote log lines found in the recording
    #[arg(long)]
    pub show_diagnostics: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: OverrideArgs,
}
