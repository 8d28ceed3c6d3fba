//! Hardware-testbench adapter for tuning the current-controller gains of an
//! inverter.
//!
//! [`TestbenchEnv`] launches the fixed-point control experiment on the bench,
//! decodes its telemetry and replays it step by step with a reward, so that an
//! external optimizer can treat the bench like a simulation environment.

pub mod cancel;
pub mod config;
pub mod env;
pub mod error;
pub mod history;
pub mod launcher;
pub mod render;
pub mod reward;
pub mod runner;
pub mod sweep;
pub mod telemetry;

pub use cancel::CancelToken;
pub use config::GaintuneConfig;
pub use env::{EpisodeState, Gains, Step, TestbenchEnv};
pub use error::{TestbenchError, TestbenchResult};
pub use history::{EpisodeOutcome, ExperimentHistory, ExperimentReport, StopReason};
pub use launcher::{CommandRunner, ExperimentCommand, LocalRunner, ReplayRunner, RunOutput};
#[cfg(feature = "ssh")]
pub use launcher::SshRunner;
pub use reward::{dq0_to_abc, RewardFn};
pub use runner::{HardwareRunner, RunAborted, RunSummary, RunnerOptions};
pub use sweep::{FixedGains, GainProposer, GridSweep};
pub use telemetry::{decode, DecodedTelemetry, Telemetry, TelemetryRow};
