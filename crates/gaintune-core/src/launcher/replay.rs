use std::path::PathBuf;
use std::time::Duration;

use super::{CommandRunner, RunOutput};
use crate::cancel::CancelToken;
use crate::error::{TestbenchError, TestbenchResult};

/// Serves previously recorded experiment output instead of running anything.
///
/// Every run returns the same recording, whatever the gains in the command.
#[derive(Debug, Clone)]
pub struct ReplayRunner {
    source: ReplaySource,
}

#[derive(Debug, Clone)]
enum ReplaySource {
    File(PathBuf),
    Memory(Vec<u8>),
}

impl ReplayRunner {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ReplaySource::File(path.into()),
        }
    }

    pub fn from_bytes(recording: impl Into<Vec<u8>>) -> Self {
        Self {
            source: ReplaySource::Memory(recording.into()),
        }
    }
}

impl CommandRunner for ReplayRunner {
    fn run(
        &mut self,
        command: &str,
        _timeout: Duration,
        cancel: &CancelToken,
    ) -> TestbenchResult<RunOutput> {
        if cancel.is_cancelled() {
            return Err(TestbenchError::Cancelled);
        }
        tracing::debug!(command, source = %self.describe(), "replaying recorded experiment");
        let stdout = match &self.source {
            ReplaySource::File(path) => std::fs::read(path).map_err(|e| {
                TestbenchError::exec(format!("reading recording {}: {e}", path.display()))
            })?,
            ReplaySource::Memory(bytes) => bytes.clone(),
        };
        Ok(RunOutput {
            stdout,
            stderr: String::new(),
            exit_code: Some(0),
        })
    }

    fn describe(&self) -> String {
        match &self.source {
            ReplaySource::File(path) => format!("replay:{}", path.display()),
            ReplaySource::Memory(bytes) => format!("replay:<{} bytes>", bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn replays_file_contents() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "1,2,3,4,5,6,7,8,9,10,").unwrap();
        let mut runner = ReplayRunner::from_file(f.path());
        let out = runner
            .run("./x 1 0.1 1.0 10.0 50.0", Duration::from_secs(1), &CancelToken::new())
            .unwrap();
        assert_eq!(out.stdout, b"1,2,3,4,5,6,7,8,9,10,\n");
    }

    #[test]
    fn missing_recording_is_exec_error() {
        let mut runner = ReplayRunner::from_file("/nonexistent/recording.csv");
        let err = runner
            .run("./x", Duration::from_secs(1), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, TestbenchError::Exec { .. }), "{err}");
    }
}
