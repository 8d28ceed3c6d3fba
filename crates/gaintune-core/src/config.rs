use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TestbenchError, TestbenchResult};

/// Environment variable holding the SSH password when `password_env` is unset.
pub const DEFAULT_PASSWORD_ENV: &str = "GAINTUNE_SSH_PASSWORD";

/// Full experiment configuration, usually loaded from `gaintune.yaml`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GaintuneConfig {
    pub connection: ConnectionConfig,
    pub experiment: ExperimentConfig,
    pub reward: RewardConfig,
    pub sweep: SweepConfig,
    pub output: OutputConfig,
}

/// Remote testbench host. The password itself never lives in the file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Name of the environment variable the password is read from.
    pub password_env: String,
    pub connect_timeout_secs: u64,
    /// Optional SHA-256 host key pin (hex). Unpinned hosts are accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key_sha256: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "lea-jde10".to_string(),
            port: 22,
            username: "root".to_string(),
            password_env: DEFAULT_PASSWORD_ENV.to_string(),
            connect_timeout_secs: 10,
            host_key_sha256: None,
        }
    }
}

impl ConnectionConfig {
    /// Resolve the password from the configured environment variable.
    /// A missing variable yields an empty password.
    pub fn resolve_password(&self) -> String {
        match std::env::var(&self.password_env) {
            Ok(pw) => pw,
            Err(_) => {
                tracing::debug!(var = %self.password_env, "password variable not set, using empty password");
                String::new()
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Remote experiment parameters passed on the command line.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Executable in the remote login directory.
    pub executable: String,
    pub max_episode_steps: usize,
    /// Sample time of the recorded telemetry (s).
    pub dt: f64,
    /// d-axis current setpoint (A).
    pub i_ref: f64,
    /// Nominal grid frequency (Hz).
    pub f_nom: f64,
    /// Initial proportional gain.
    pub kp: f64,
    /// Initial integral gain.
    pub ki: f64,
    /// Wall-clock limit for one remote run.
    pub exec_timeout_secs: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            executable: "my_first_hps".to_string(),
            max_episode_steps: 1000,
            dt: 1.0 / 20000.0,
            i_ref: 10.0,
            f_nom: 50.0,
            kp: 0.01,
            ki: 5.0,
            exec_timeout_secs: 120,
        }
    }
}

impl ExperimentConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RewardConfig {
    /// Hard current limit (A).
    pub i_limit: f64,
    /// Nominal current; the barrier is zero at or below it (A).
    pub i_nominal: f64,
    /// Barrier penalty factor.
    pub mu: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            i_limit: 30.0,
            i_nominal: 20.0,
            mu: 2.0,
        }
    }
}

/// Inclusive `linspace(start, stop, num)` axis.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AxisRange {
    pub start: f64,
    pub stop: f64,
    pub num: usize,
}

impl AxisRange {
    pub fn single(value: f64) -> Self {
        Self {
            start: value,
            stop: value,
            num: 1,
        }
    }

    /// Parse `start:stop:num`, or a single value.
    pub fn parse(s: &str) -> TestbenchResult<Self> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let num_err = |p: &str| TestbenchError::config(format!("invalid number '{p}' in range '{s}'"));
        match parts.as_slice() {
            [v] => Ok(Self::single(v.parse().map_err(|_| num_err(v))?)),
            [a, b, n] => {
                let range = Self {
                    start: a.parse().map_err(|_| num_err(a))?,
                    stop: b.parse().map_err(|_| num_err(b))?,
                    num: n.parse().map_err(|_| num_err(n))?,
                };
                if range.num == 0 {
                    return Err(TestbenchError::config(format!(
                        "range '{s}' must have at least one point"
                    )));
                }
                Ok(range)
            }
            _ => Err(TestbenchError::config(format!(
                "range '{s}' must be 'start:stop:num' or a single value"
            ))),
        }
    }

    /// Points of the axis, endpoints included.
    pub fn points(&self) -> Vec<f64> {
        match self.num {
            0 => Vec::new(),
            1 => vec![self.start],
            n => {
                let step = (self.stop - self.start) / (n - 1) as f64;
                (0..n).map(|i| self.start + step * i as f64).collect()
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub kp: AxisRange,
    pub ki: AxisRange,
    /// End the sweep after the first episode with a non-finite performance.
    pub stop_on_unsafe: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            kp: AxisRange {
                start: 0.0,
                stop: 0.08,
                num: 5,
            },
            ki: AxisRange {
                start: 0.0,
                stop: 180.0,
                num: 5,
            },
            stop_on_unsafe: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Write three SVG plots per episode.
    pub save_plots: bool,
    /// Write the decoded telemetry of each episode as CSV.
    pub save_episodes: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
            save_plots: false,
            save_episodes: true,
        }
    }
}

impl GaintuneConfig {
    pub fn from_yaml(s: &str) -> TestbenchResult<Self> {
        let cfg: Self = serde_yaml::from_str(s)
            .map_err(|e| TestbenchError::config(format!("invalid config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> TestbenchResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TestbenchError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn validate(&self) -> TestbenchResult<()> {
        if self.experiment.max_episode_steps == 0 {
            return Err(TestbenchError::config("experiment.max_episode_steps must be > 0"));
        }
        if !(self.experiment.dt > 0.0) {
            return Err(TestbenchError::config("experiment.dt must be > 0"));
        }
        if self.experiment.exec_timeout_secs == 0 {
            return Err(TestbenchError::config("experiment.exec_timeout_secs must be > 0"));
        }
        if !(self.reward.i_limit > self.reward.i_nominal) {
            return Err(TestbenchError::config(format!(
                "reward.i_limit ({}) must exceed reward.i_nominal ({})",
                self.reward.i_limit, self.reward.i_nominal
            )));
        }
        if self.experiment.executable.trim().is_empty() {
            return Err(TestbenchError::config("experiment.executable must not be empty"));
        }
        Ok(())
    }

    /// Flattened key/value view of the run parameters, used for `params.csv`.
    pub fn param_rows(&self) -> Vec<(String, String)> {
        let e = &self.experiment;
        let r = &self.reward;
        vec![
            ("host".into(), self.connection.host.clone()),
            ("executable".into(), e.executable.clone()),
            ("max_episode_steps".into(), e.max_episode_steps.to_string()),
            ("dt".into(), e.dt.to_string()),
            ("i_ref".into(), e.i_ref.to_string()),
            ("f_nom".into(), e.f_nom.to_string()),
            ("i_limit".into(), r.i_limit.to_string()),
            ("i_nominal".into(), r.i_nominal.to_string()),
            ("mu".into(), r.mu.to_string()),
        ]
    }
}
