//! SSH transport to the testbench controller (libssh2).
//!
//! One session per run: connect, authenticate with password, exec, drain
//! stdout, disconnect. The session read timeout is set to the poll interval so
//! the read loop can check the deadline and the cancel token between chunks.

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use ssh2::{Channel, HashType, Session};

use super::{truncate_stderr, CommandRunner, RunOutput, POLL_INTERVAL};
use crate::cancel::CancelToken;
use crate::config::ConnectionConfig;
use crate::error::{TestbenchError, TestbenchResult};

pub struct SshRunner {
    host: String,
    port: u16,
    username: String,
    password: String,
    connect_timeout: Duration,
    host_key_sha256: Option<String>,
}

impl std::fmt::Debug for SshRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshRunner")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SshRunner {
    /// Build from config; the password is resolved from the environment now.
    pub fn new(conn: &ConnectionConfig) -> Self {
        Self {
            host: conn.host.clone(),
            port: conn.port,
            username: conn.username.clone(),
            password: conn.resolve_password(),
            connect_timeout: conn.connect_timeout(),
            host_key_sha256: conn.host_key_sha256.as_deref().map(normalize_fingerprint),
        }
    }

    fn connect_err(&self, message: impl std::fmt::Display) -> TestbenchError {
        TestbenchError::Connect {
            host: format!("{}:{}", self.host, self.port),
            message: message.to_string(),
        }
    }

    fn connect(&self) -> TestbenchResult<Session> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connect_err(e))?;
        let tcp = connect_any(addrs, self.connect_timeout).map_err(|e| self.connect_err(e))?;

        let mut sess = Session::new().map_err(|e| self.connect_err(e))?;
        sess.set_tcp_stream(tcp);
        sess.set_timeout(millis(self.connect_timeout));
        sess.handshake().map_err(|e| self.connect_err(e))?;

        self.check_host_key(&sess)?;

        sess.userauth_password(&self.username, &self.password)
            .map_err(|e| {
                tracing::debug!(error = %e, "password authentication rejected");
                self.auth_err()
            })?;
        if !sess.authenticated() {
            return Err(self.auth_err());
        }
        Ok(sess)
    }

    fn auth_err(&self) -> TestbenchError {
        TestbenchError::Auth {
            username: self.username.clone(),
            host: self.host.clone(),
        }
    }

    fn check_host_key(&self, sess: &Session) -> TestbenchResult<()> {
        let actual = sess
            .host_key_hash(HashType::Sha256)
            .map(hex::encode)
            .unwrap_or_default();
        match &self.host_key_sha256 {
            Some(expected) if *expected != actual => Err(TestbenchError::HostKeyMismatch {
                host: self.host.clone(),
                expected: expected.clone(),
                actual,
            }),
            Some(_) => Ok(()),
            None => {
                tracing::debug!(host = %self.host, sha256 = %actual, "accepting unpinned host key");
                Ok(())
            }
        }
    }

    fn exec(
        &self,
        sess: &Session,
        command: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> TestbenchResult<RunOutput> {
        let mut channel = sess
            .channel_session()
            .map_err(|e| TestbenchError::exec(format!("opening channel: {e}")))?;
        channel
            .exec(command)
            .map_err(|e| TestbenchError::exec(format!("exec '{command}': {e}")))?;

        sess.set_timeout(millis(POLL_INTERVAL));
        let deadline = Instant::now() + timeout;

        let mut stdout = Vec::new();
        if let Err(e) = read_until_eof(&mut channel, &mut stdout, deadline, timeout, cancel) {
            let _ = channel.close();
            return Err(e);
        }

        let mut stderr = Vec::new();
        let mut stderr_stream = channel.stderr();
        if let Err(e) = read_until_eof(&mut stderr_stream, &mut stderr, deadline, timeout, cancel)
        {
            tracing::debug!(error = %e, "stderr not fully drained");
        }

        let exit_code = finish(&mut channel);
        Ok(RunOutput {
            stdout,
            stderr: truncate_stderr(String::from_utf8_lossy(&stderr).into_owned()),
            exit_code,
        })
    }
}

impl CommandRunner for SshRunner {
    fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> TestbenchResult<RunOutput> {
        if cancel.is_cancelled() {
            return Err(TestbenchError::Cancelled);
        }
        tracing::info!(host = %self.host, user = %self.username, command, "starting remote experiment");

        let sess = self.connect()?;
        let result = self.exec(&sess, command, timeout, cancel);
        if let Err(e) = sess.disconnect(None, "experiment finished", None) {
            tracing::debug!(error = %e, "disconnect failed");
        }
        result
    }

    fn describe(&self) -> String {
        format!("ssh://{}@{}:{}", self.username, self.host, self.port)
    }
}

fn read_until_eof<R: Read>(
    reader: &mut R,
    out: &mut Vec<u8>,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancelToken,
) -> TestbenchResult<()> {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(TestbenchError::exec(format!("reading remote output: {e}"))),
        }
        if cancel.is_cancelled() {
            return Err(TestbenchError::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(TestbenchError::Timeout { after: timeout });
        }
    }
}

/// Try every resolved address in order; the last error wins if none connects.
fn connect_any(
    addrs: impl IntoIterator<Item = SocketAddr>,
    timeout: Duration,
) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => {
                tracing::debug!(%addr, error = %e, "address unreachable, trying next");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(ErrorKind::NotFound, "host resolved to no address")
    }))
}

fn finish(channel: &mut Channel) -> Option<i32> {
    if let Err(e) = channel.wait_close() {
        tracing::debug!(error = %e, "channel did not close cleanly");
        return None;
    }
    channel.exit_status().ok()
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

/// Lowercase hex without separators, so `AB:CD` and `abcd` pin the same key.
fn normalize_fingerprint(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
