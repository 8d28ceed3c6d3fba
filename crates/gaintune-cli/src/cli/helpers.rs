use std::path::Path;

use anyhow::{Context, Result};
use gaintune_core::{CancelToken, CommandRunner, GaintuneConfig, LocalRunner, ReplayRunner, TestbenchError};

use super::args::{BenchArgs, OverrideArgs};
use crate::exit_codes;

const DEFAULT_CONFIG: &str = "gaintune.yaml";

pub type BoxedRunner = Box<dyn CommandRunner + Send>;

/// Load config: explicit path, else ./gaintune.yaml if present, else defaults.
pub fn load_config(path: Option<&Path>) -> Result<GaintuneConfig> {
    match path {
        Some(p) => GaintuneConfig::load(p).with_context(|| format!("loading {}", p.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            GaintuneConfig::load(Path::new(DEFAULT_CONFIG)).context("loading gaintune.yaml")
        }
        None => Ok(GaintuneConfig::default()),
    }
}

/// Apply command-line overrides on top of the file config.
pub fn apply_overrides(cfg: &mut GaintuneConfig, overrides: &OverrideArgs) -> Result<()> {
    if let Some(host) = &overrides.host {
        cfg.connection.host = host.clone();
    }
    if let Some(port) = overrides.port {
        cfg.connection.port = port;
    }
    if let Some(user) = &overrides.user {
        cfg.connection.username = user.clone();
    }
    if let Some(exe) = &overrides.executable {
        cfg.experiment.executable = exe.clone();
    }
    if let Some(steps) = overrides.steps {
        cfg.experiment.max_episode_steps = steps;
    }
    if let Some(i_ref) = overrides.i_ref {
        cfg.experiment.i_ref = i_ref;
    }
    if let Some(timeout) = overrides.timeout {
        cfg.experiment.exec_timeout_secs = timeout;
    }
    if let Some(out) = &overrides.out {
        cfg.output.dir = out.clone();
    }
    if overrides.plots {
        cfg.output.save_plots = true;
    }
    cfg.validate()?;
    Ok(())
}

/// Pick the transport: replay file, local process, or SSH to the bench.
pub fn build_runner(cfg: &GaintuneConfig, bench: &BenchArgs) -> Result<BoxedRunner> {
    if let Some(file) = &bench.replay {
        return Ok(Box::new(ReplayRunner::from_file(file)));
    }
    if let Some(dir) = &bench.local {
        return Ok(Box::new(LocalRunner::new(dir)));
    }
    ssh_runner(cfg)
}

#[cfg(feature = "ssh")]
fn ssh_runner(cfg: &GaintuneConfig) -> Result<BoxedRunner> {
    Ok(Box::new(gaintune_core::SshRunner::new(&cfg.connection)))
}

#[cfg(not(feature = "ssh"))]
fn ssh_runner(_cfg: &GaintuneConfig) -> Result<BoxedRunner> {
    Err(TestbenchError::Config {
        message: "built without SSH support; use --replay or --local".into(),
    }
    .into())
}

/// Run blocking bench work off the async runtime; Ctrl-C trips `cancel`.
pub async fn blocking_with_interrupt<T, F>(cancel: CancelToken, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling experiment");
                cancel.cancel();
            }
        })
    };
    let out = tokio::task::spawn_blocking(f)
        .await
        .context("experiment thread panicked")?;
    watcher.abort();
    Ok(out)
}

/// Map an error chain to the CLI exit code.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<TestbenchError>())
        .map(TestbenchError::exit_code)
        .unwrap_or(exit_codes::CONFIG_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_file_values() {
        let mut cfg = GaintuneConfig::default();
        let bench = OverrideArgs {
            host: Some("bench-7".into()),
            steps: Some(12),
            i_ref: Some(15.0),
            plots: true,
            ..Default::default()
        };
        apply_overrides(&mut cfg, &bench).unwrap();
        assert_eq!(cfg.connection.host, "bench-7");
        assert_eq!(cfg.experiment.max_episode_steps, 12);
        assert_eq!(cfg.experiment.i_ref, 15.0);
        assert!(cfg.output.save_plots);
    }

    #[test]
    fn zero_steps_is_rejected() {
        let mut cfg = GaintuneConfig::default();
        let bench = OverrideArgs {
            steps: Some(0),
            ..Default::default()
        };
        let err = apply_overrides(&mut cfg, &bench).unwrap_err();
        assert_eq!(exit_code_for(&err), exit_codes::CONFIG_ERROR);
    }

    #[test]
    fn exit_code_follows_wrapped_error() {
        let err = anyhow::Error::from(TestbenchError::Cancelled).context("sweep");
        assert_eq!(exit_code_for(&err), exit_codes::INTERRUPTED);
        let err = anyhow::Error::from(TestbenchError::TelemetryUnderrun { step: 1, rows: 0 });
        assert_eq!(exit_code_for(&err), exit_codes::TELEMETRY_ERROR);
    }
}
