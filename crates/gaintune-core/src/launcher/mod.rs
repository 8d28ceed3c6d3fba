//! Launching the control experiment on the testbench.
//!
//! A [`CommandRunner`] executes one command line to completion and hands back
//! its stdout. Every run is bounded by a timeout and observes a
//! [`CancelToken`]; there are no retries.

pub mod local;
pub mod replay;
#[cfg(feature = "ssh")]
pub mod ssh;

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::ExperimentConfig;
use crate::error::TestbenchResult;

pub use local::LocalRunner;
pub use replay::ReplayRunner;
#[cfg(feature = "ssh")]
pub use ssh::SshRunner;

/// Poll interval while waiting on a running experiment.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stderr is only kept for diagnostics.
pub(crate) const MAX_STDERR_BYTES: usize = 4096;

/// Captured result of one experiment run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Executes an experiment command line and captures its output.
pub trait CommandRunner {
    fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> TestbenchResult<RunOutput>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> TestbenchResult<RunOutput> {
        (**self).run(command, timeout, cancel)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Arguments of the remote experiment program.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentCommand {
    pub executable: String,
    pub steps: usize,
    pub kp: f64,
    pub ki: f64,
    pub i_ref: f64,
    pub f_nom: f64,
}

impl ExperimentCommand {
    pub fn new(cfg: &ExperimentConfig, kp: f64, ki: f64) -> Self {
        Self {
            executable: cfg.executable.clone(),
            steps: cfg.max_episode_steps,
            kp,
            ki,
            i_ref: cfg.i_ref,
            f_nom: cfg.f_nom,
        }
    }

    /// `./<exe> <steps> <kp> <ki> <i_ref> <f_nom>`
    pub fn command_line(&self) -> String {
        format!(
            "./{} {} {} {} {} {}",
            self.executable,
            self.steps,
            float_arg(self.kp),
            float_arg(self.ki),
            float_arg(self.i_ref),
            float_arg(self.f_nom)
        )
    }
}

/// Shortest round-trip form that always carries a decimal point or exponent.
fn float_arg(v: f64) -> String {
    format!("{v:?}")
}

pub(crate) fn truncate_stderr(mut s: String) -> String {
    if s.len() > MAX_STDERR_BYTES {
        let mut cut = MAX_STDERR_BYTES;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}
