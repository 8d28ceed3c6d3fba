//! Step-wise episode interface over one hardware experiment.
//!
//! `reset` runs the whole experiment on the bench and records its telemetry;
//! `step` then replays the recording one control period at a time and scores
//! it. The external optimizer only ever changes the gains between episodes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{ExperimentConfig, GaintuneConfig};
use crate::error::{TestbenchError, TestbenchResult};
use crate::launcher::{CommandRunner, ExperimentCommand};
use crate::render;
use crate::reward::RewardFn;
use crate::telemetry::{self, Telemetry, TelemetryRow};

/// Controller gains of the current loop.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpisodeState {
    Idle,
    Running,
    Done,
}

/// Result of one `step`.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub observation: TelemetryRow,
    pub reward: f64,
    pub done: bool,
    /// Always empty; kept for runner compatibility.
    pub info: BTreeMap<String, String>,
}

pub struct TestbenchEnv<R> {
    runner: R,
    experiment: ExperimentConfig,
    reward: RewardFn,
    cancel: CancelToken,
    gains: Gains,
    data: Telemetry,
    diagnostics: Vec<String>,
    current_step: usize,
    state: EpisodeState,
}

impl<R: CommandRunner> TestbenchEnv<R> {
    pub fn new(config: &GaintuneConfig, runner: R) -> Self {
        let experiment = config.experiment.clone();
        Self {
            runner,
            reward: RewardFn::new(&config.reward, experiment.max_episode_steps),
            gains: Gains {
                kp: experiment.kp,
                ki: experiment.ki,
            },
            experiment,
            cancel: CancelToken::new(),
            data: Telemetry::default(),
            diagnostics: Vec::new(),
            current_step: 0,
            state: EpisodeState::Idle,
        }
    }

    /// Share a cancel token with the caller (e.g. a Ctrl-C handler).
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the experiment with new gains and start a new episode.
    ///
    /// Blocks until the bench program exits, the execution timeout elapses, or
    /// the cancel token fires. On error the previous episode is left as it was.
    pub fn reset(&mut self, kp: f64, ki: f64) -> TestbenchResult<()> {
        let cmd = ExperimentCommand::new(&self.experiment, kp, ki);
        let line = cmd.command_line();
        tracing::info!(kp, ki, runner = %self.runner.describe(), "reset: launching experiment");

        let output = self
            .runner
            .run(&line, self.experiment.exec_timeout(), &self.cancel)?;
        if let Some(code) = output.exit_code.filter(|c| *c != 0) {
            tracing::warn!(exit_code = code, stderr = %output.stderr, "experiment exited non-zero");
        } else if !output.stderr.is_empty() {
            tracing::debug!(stderr = %output.stderr, "experiment stderr");
        }

        let decoded = telemetry::decode_bytes(&output.stdout)?;
        if decoded.telemetry.len() < self.experiment.max_episode_steps {
            tracing::warn!(
                rows = decoded.telemetry.len(),
                steps = self.experiment.max_episode_steps,
                "telemetry shorter than episode; stepping will run out of rows"
            );
        }

        self.gains = Gains { kp, ki };
        self.data = decoded.telemetry;
        self.diagnostics = decoded.diagnostics;
        self.current_step = 0;
        self.state = EpisodeState::Running;
        Ok(())
    }

    /// Advance one control period and score it against `(i_ref, 0, 0)`.
    pub fn step(&mut self) -> TestbenchResult<Step> {
        if self.state != EpisodeState::Running {
            return Err(TestbenchError::NotRunning { state: self.state });
        }
        let row = *self
            .data
            .get(self.current_step)
            .ok_or(TestbenchError::TelemetryUnderrun {
                step: self.current_step,
                rows: self.data.len(),
            })?;
        self.current_step += 1;

        let setpoint = [self.experiment.i_ref, 0.0, 0.0];
        let reward = self.reward.evaluate(row.i_abc(), setpoint, row.phase());

        let done = self.current_step == self.experiment.max_episode_steps;
        if done {
            self.state = EpisodeState::Done;
        }

        Ok(Step {
            observation: row,
            reward,
            done,
            info: BTreeMap::new(),
        })
    }

    /// Plot the recorded episode as three SVG files in `dir`.
    pub fn render(&self, dir: &Path, prefix: &str) -> TestbenchResult<Vec<PathBuf>> {
        render::render_episode(&self.data, self.experiment.dt, dir, prefix)
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn max_episode_steps(&self) -> usize {
        self.experiment.max_episode_steps
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn data(&self) -> &Telemetry {
        &self.data
    }

    /// Remote log lines skipped by the decoder in the last episode.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn exec_timeout(&self) -> Duration {
        self.experiment.exec_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{ReplayRunner, RunOutput};
    use crate::reward::dq0_to_abc;

    /// Runner that records command lines and returns canned output.
    struct Scripted {
        output: String,
        commands: Vec<String>,
    }

    impl CommandRunner for Scripted {
        fn run(
            &mut self,
            command: &str,
            _timeout: Duration,
            _cancel: &CancelToken,
        ) -> TestbenchResult<RunOutput> {
            self.commands.push(command.to_string());
            Ok(RunOutput {
                stdout: self.output.clone().into_bytes(),
                ..Default::default()
            })
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn config(steps: usize) -> GaintuneConfig {
        let mut cfg = GaintuneConfig::default();
        cfg.experiment.max_episode_steps = steps;
        cfg
    }

    fn tracking_row(phase: f64) -> String {
        let [a, b, c] = dq0_to_abc([10.0, 0.0, 0.0], phase);
        format!("230,-115,-115,{a},{b},{c},10,0,0,{phase},")
    }

    fn tracking_recording(rows: usize) -> String {
        let mut out = String::from("controller armed, mode=current\n");
        for i in 0..rows {
            out.push_str(&tracking_row(i as f64 * 0.0314));
            out.push('\n');
        }
        out
    }

    #[test]
    fn three_step_episode_tracks_setpoint() {
        let mut env = TestbenchEnv::new(&config(3), ReplayRunner::from_bytes(tracking_recording(3)));
        env.reset(0.01, 5.0).unwrap();
        assert_eq!(env.diagnostics().len(), 1);

        let mut dones = Vec::new();
        for _ in 0..3 {
            let step = env.step().unwrap();
            assert!(step.reward.abs() < 1e-6, "reward {}", step.reward);
            assert!(step.info.is_empty());
            dones.push(step.done);
        }
        assert_eq!(dones, vec![false, false, true]);
        assert_eq!(env.state(), EpisodeState::Done);
    }

    #[test]
    fn exactly_n_steps_per_reset() {
        let n = 25;
        let mut env = TestbenchEnv::new(&config(n), ReplayRunner::from_bytes(tracking_recording(n + 5)));
        env.reset(0.02, 8.0).unwrap();
        for i in 1..=n {
            let step = env.step().unwrap();
            assert_eq!(step.done, i == n);
        }
        assert!(matches!(
            env.step().unwrap_err(),
            TestbenchError::NotRunning {
                state: EpisodeState::Done
            }
        ));

        env.reset(0.02, 8.0).unwrap();
        assert_eq!(env.current_step(), 0);
        assert!(!env.step().unwrap().done);
    }

    #[test]
    fn step_before_reset_is_rejected() {
        let mut env = TestbenchEnv::new(&config(3), ReplayRunner::from_bytes(tracking_recording(3)));
        assert!(matches!(
            env.step().unwrap_err(),
            TestbenchError::NotRunning {
                state: EpisodeState::Idle
            }
        ));
    }

    #[test]
    fn short_recording_underruns_at_step() {
        let mut env = TestbenchEnv::new(&config(5), ReplayRunner::from_bytes(tracking_recording(2)));
        env.reset(0.01, 5.0).unwrap();
        env.step().unwrap();
        env.step().unwrap();
        match env.step().unwrap_err() {
            TestbenchError::TelemetryUnderrun { step, rows } => {
                assert_eq!((step, rows), (2, 2));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn reset_sends_gains_on_command_line() {
        let runner = Scripted {
            output: tracking_recording(1),
            commands: Vec::new(),
        };
        let mut env = TestbenchEnv::new(&config(1), runner);
        env.reset(0.037, 10.9).unwrap();
        env.reset(0.07, 11.0).unwrap();
        assert_eq!(
            env.runner.commands,
            vec![
                "./my_first_hps 1 0.037 10.9 10.0 50.0".to_string(),
                "./my_first_hps 1 0.07 11.0 10.0 50.0".to_string(),
            ]
        );
        assert_eq!(env.gains(), Gains { kp: 0.07, ki: 11.0 });
    }

    #[test]
    fn failed_reset_keeps_previous_episode() {
        let mut env = TestbenchEnv::new(
            &config(2),
            Scripted {
                output: tracking_recording(2),
                commands: Vec::new(),
            },
        );
        env.reset(0.01, 5.0).unwrap();
        env.step().unwrap();

        env.runner.output = "1,2,bad,4,5,6,7,8,9,10,\n".into();
        assert!(matches!(
            env.reset(0.5, 50.0).unwrap_err(),
            TestbenchError::Decode { .. }
        ));
        assert_eq!(env.state(), EpisodeState::Running);
        assert_eq!(env.current_step(), 1);
        assert_eq!(env.gains(), Gains { kp: 0.01, ki: 5.0 });
    }

    #[test]
    fn over_limit_current_gives_non_finite_reward() {
        let rec = "0,0,0,30,0,0,0,0,0,0,\n";
        let mut env = TestbenchEnv::new(&config(1), ReplayRunner::from_bytes(rec));
        env.reset(1.0, 100.0).unwrap();
        let step = env.step().unwrap();
        assert!(!step.reward.is_finite());
        assert!(step.done);
    }

    #[test]
    fn cancelled_token_aborts_reset() {
        let cancel = CancelToken::new();
        let mut env = TestbenchEnv::new(&config(1), ReplayRunner::from_bytes(tracking_recording(1)))
            .with_cancel_token(cancel.clone());
        cancel.cancel();
        assert!(matches!(
            env.reset(0.01, 5.0).unwrap_err(),
            TestbenchError::Cancelled
        ));
        assert_eq!(env.state(), EpisodeState::Idle);
    }
}
