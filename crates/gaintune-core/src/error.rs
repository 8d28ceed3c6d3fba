//! Error types for the testbench adapter.

use std::time::Duration;

use crate::env::EpisodeState;

/// Testbench errors.
///
/// Nothing here is retried: every variant surfaces to the caller as soon as
/// it happens.
#[derive(Debug, thiserror::Error)]
pub enum TestbenchError {
    /// Invalid or unreadable configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// TCP connect or SSH handshake failed.
    #[error("cannot connect to {host}: {message}")]
    Connect { host: String, message: String },

    /// Password authentication rejected.
    #[error("authentication failed for {username}@{host}")]
    Auth { username: String, host: String },

    /// Host key does not match the pinned fingerprint.
    #[error("host key mismatch for {host}: expected {expected}, got {actual}")]
    HostKeyMismatch {
        host: String,
        expected: String,
        actual: String,
    },

    /// Remote or local command could not be started or read.
    #[error("command execution failed: {message}")]
    Exec { message: String },

    /// Experiment did not finish within the execution timeout.
    #[error("experiment timed out after {after:?}")]
    Timeout { after: Duration },

    /// Experiment was cancelled by the caller.
    #[error("experiment cancelled")]
    Cancelled,

    /// Malformed telemetry token or non-UTF-8 output.
    #[error("telemetry decode error at line {line}: {message}")]
    Decode { line: usize, message: String },

    /// `step()` called while no episode is running.
    #[error("step called in state {state:?}; reset first")]
    NotRunning { state: EpisodeState },

    /// Telemetry buffer shorter than the configured episode length.
    #[error("telemetry underrun: step {step} requested but only {rows} rows were recorded")]
    TelemetryUnderrun { step: usize, rows: usize },

    /// Plot output failed.
    #[error("render error: {message}")]
    Render { message: String },

    /// Local filesystem or process I/O.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TestbenchError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,

            Self::Connect { .. } => 3,
            Self::Auth { .. } => 3,
            Self::HostKeyMismatch { .. } => 3,
            Self::Exec { .. } => 3,

            Self::Decode { .. } => 4,
            Self::NotRunning { .. } => 4,
            Self::TelemetryUnderrun { .. } => 4,

            Self::Timeout { .. } => 5,
            Self::Cancelled => 5,

            Self::Render { .. } => 6,
            Self::Io(_) => 6,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn exec(message: impl Into<String>) -> Self {
        Self::Exec {
            message: message.into(),
        }
    }

    pub(crate) fn render(err: impl std::fmt::Display) -> Self {
        Self::Render {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for TestbenchError {
    fn from(err: csv::Error) -> Self {
        Self::Io(std::io::Error::other(err.to_string()))
    }
}

/// Result type for testbench operations.
pub type TestbenchResult<T> = Result<T, TestbenchError>;
