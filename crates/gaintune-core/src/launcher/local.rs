//! Run the experiment program as a local child process.
//!
//! Used on the bench controller itself and for smoke tests. The command goes
//! through `sh -c` so the `./<exe>` form works unchanged. Output pipes are
//! drained on reader threads while the parent polls for exit, so a chatty
//! program cannot stall on a full pipe.
//!
//! On unix the shell leads its own process group. Timeout and cancellation
//! kill the whole group, and they also bound the wait for the output pipes:
//! a background job that inherited stdout cannot keep a run alive.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use super::{truncate_stderr, CommandRunner, RunOutput, POLL_INTERVAL};
use crate::cancel::CancelToken;
use crate::error::{TestbenchError, TestbenchResult};

#[derive(Debug, Clone)]
pub struct LocalRunner {
    workdir: PathBuf,
    shell: String,
}

impl LocalRunner {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            shell: "sh".to_string(),
        }
    }

    fn spawn(&self, command: &str) -> TestbenchResult<Child> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd.spawn()
            .map_err(|e| TestbenchError::exec(format!("spawning '{command}': {e}")))
    }
}

impl CommandRunner for LocalRunner {
    fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> TestbenchResult<RunOutput> {
        tracing::debug!(command, workdir = %self.workdir.display(), "spawning local experiment");
        let deadline = Instant::now() + timeout;

        let mut child = self.spawn(command)?;
        let stdout = PipeReader::spawn(child.stdout.take());
        let stderr = PipeReader::spawn(child.stderr.take());

        let result = wait_all(&mut child, stdout, stderr, deadline, timeout, cancel);
        if let Err(e) = &result {
            tracing::debug!(error = %e, pid = child.id(), "killing local experiment");
            kill_group(&mut child);
        }
        let (status, stdout, stderr) = result?;

        Ok(RunOutput {
            stdout,
            stderr: truncate_stderr(String::from_utf8_lossy(&stderr).into_owned()),
            exit_code: status.code(),
        })
    }

    fn describe(&self) -> String {
        format!("local:{}", self.workdir.display())
    }
}

/// Exit status plus both pipes, all within one deadline.
fn wait_all(
    child: &mut Child,
    stdout: PipeReader,
    stderr: PipeReader,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancelToken,
) -> TestbenchResult<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let status = child
        .wait_cancellable(deadline, cancel)
        .map_err(|e| TestbenchError::exec(format!("waiting for experiment: {e}")))?
        .into_result(timeout)?;
    let stdout = stdout.wait(deadline, cancel).into_result(timeout)??;
    let stderr = stderr.wait(deadline, cancel).into_result(timeout)??;
    Ok((status, stdout, stderr))
}

fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Ok(pgid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

enum Waited<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

impl<T> Waited<T> {
    fn into_result(self, timeout: Duration) -> TestbenchResult<T> {
        match self {
            Waited::Done(v) => Ok(v),
            Waited::TimedOut => Err(TestbenchError::Timeout { after: timeout }),
            Waited::Cancelled => Err(TestbenchError::Cancelled),
        }
    }
}

/// Drains one pipe on a background thread and hands the bytes over a channel.
struct PipeReader {
    rx: Receiver<io::Result<Vec<u8>>>,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let res = match pipe {
                Some(mut pipe) => pipe.read_to_end(&mut buf).map(|_| buf),
                None => Ok(buf),
            };
            let _ = tx.send(res);
        });
        Self { rx }
    }

    fn wait(self, deadline: Instant, cancel: &CancelToken) -> Waited<io::Result<Vec<u8>>> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining.min(POLL_INTERVAL)) {
                Ok(res) => return Waited::Done(res),
                Err(RecvTimeoutError::Disconnected) => {
                    return Waited::Done(Err(io::Error::other("output reader thread panicked")))
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if cancel.is_cancelled() {
                return Waited::Cancelled;
            }
            if Instant::now() >= deadline {
                return Waited::TimedOut;
            }
        }
    }
}

/// Extension trait to add a bounded, cancellable wait to `Child`.
trait ChildExt {
    fn wait_cancellable(
        &mut self,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> io::Result<Waited<ExitStatus>>;
}

impl ChildExt for Child {
    fn wait_cancellable(
        &mut self,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> io::Result<Waited<ExitStatus>> {
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Waited::Done(status));
            }
            if cancel.is_cancelled() {
                return Ok(Waited::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(Waited::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
