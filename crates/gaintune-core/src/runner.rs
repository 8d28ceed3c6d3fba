use std::time::Instant;

use crate::env::{Gains, TestbenchEnv};
use crate::error::{TestbenchError, TestbenchResult};
use crate::history::{EpisodeOutcome, ExperimentHistory, StopReason};
use crate::launcher::CommandRunner;
use crate::sweep::GainProposer;

#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    pub max_episodes: Option<usize>,
    pub stop_on_unsafe: bool,
    pub save_episodes: bool,
    pub save_plots: bool,
}

/// Drives hardware episodes from a gain proposer.
///
/// Errors from the bench abort the whole run; there is no retry. Episodes
/// completed before the error come back in [`RunAborted`].
pub struct HardwareRunner<'a> {
    options: RunnerOptions,
    history: Option<&'a ExperimentHistory>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub episodes: Vec<EpisodeOutcome>,
    pub stop_reason: StopReason,
}

/// A run stopped by an error. Episodes finished before it are kept so the
/// caller can still persist them.
#[derive(Debug, thiserror::Error)]
#[error("run aborted after {} episode(s)", episodes.len())]
pub struct RunAborted {
    pub episodes: Vec<EpisodeOutcome>,
    #[source]
    pub error: TestbenchError,
}

impl<'a> HardwareRunner<'a> {
    pub fn new(options: RunnerOptions) -> Self {
        Self {
            options,
            history: None,
        }
    }

    /// Persist per-episode telemetry/plots into this run directory.
    pub fn with_history(mut self, history: &'a ExperimentHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn run<R: CommandRunner, P: GainProposer + ?Sized>(
        &self,
        env: &mut TestbenchEnv<R>,
        proposer: &mut P,
    ) -> Result<RunSummary, RunAborted> {
        let mut episodes = Vec::new();
        match self.drive(env, proposer, &mut episodes) {
            Ok(stop_reason) => {
                tracing::info!(episodes = episodes.len(), ?stop_reason, "run finished");
                Ok(RunSummary {
                    episodes,
                    stop_reason,
                })
            }
            Err(error) => {
                tracing::warn!(episodes = episodes.len(), %error, "run aborted");
                Err(RunAborted { episodes, error })
            }
        }
    }

    fn drive<R: CommandRunner, P: GainProposer + ?Sized>(
        &self,
        env: &mut TestbenchEnv<R>,
        proposer: &mut P,
        episodes: &mut Vec<EpisodeOutcome>,
    ) -> TestbenchResult<StopReason> {
        loop {
            if self
                .options
                .max_episodes
                .is_some_and(|max| episodes.len() >= max)
            {
                return Ok(StopReason::EpisodeLimit);
            }
            if env.cancel_token().is_cancelled() {
                return Err(TestbenchError::Cancelled);
            }
            let Some(gains) = proposer.propose() else {
                return Ok(StopReason::Exhausted);
            };

            let outcome = self.run_episode(env, episodes.len(), gains)?;
            proposer.observe(gains, outcome.performance);
            self.persist_episode(env, &outcome)?;

            let stop = outcome.is_unsafe && self.options.stop_on_unsafe;
            episodes.push(outcome);
            if stop {
                tracing::warn!("unsafe episode, stopping run");
                return Ok(StopReason::Unsafe);
            }
        }
    }

    fn run_episode<R: CommandRunner>(
        &self,
        env: &mut TestbenchEnv<R>,
        episode: usize,
        gains: Gains,
    ) -> TestbenchResult<EpisodeOutcome> {
        let start = Instant::now();
        env.reset(gains.kp, gains.ki)?;

        let mut performance = 0.0;
        let mut steps = 0;
        loop {
            let step = env.step()?;
            performance += step.reward;
            steps += 1;
            if step.done {
                break;
            }
        }

        let is_unsafe = !performance.is_finite();
        if is_unsafe {
            tracing::warn!(episode, kp = gains.kp, ki = gains.ki, "current limit reached");
        } else {
            tracing::info!(episode, kp = gains.kp, ki = gains.ki, performance, "episode finished");
        }

        Ok(EpisodeOutcome {
            episode,
            gains,
            performance,
            steps,
            is_unsafe,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn persist_episode<R: CommandRunner>(
        &self,
        env: &TestbenchEnv<R>,
        outcome: &EpisodeOutcome,
    ) -> TestbenchResult<()> {
        let Some(history) = self.history else {
            return Ok(());
        };
        if self.options.save_episodes {
            history.write_episode(outcome.episode, env.data())?;
        }
        if self.options.save_plots {
            env.render(
                history.dir(),
                &ExperimentHistory::episode_prefix(outcome.episode),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::config::{AxisRange, GaintuneConfig};
    use crate::launcher::{ReplayRunner, RunOutput};
    use crate::sweep::{FixedGains, GridSweep};
    use std::time::Duration;

    /// Records currents proportional to kp; kp >= 1 trips the limit, kp >= 5 is refused.
    struct GainDependentBench;

    impl CommandRunner for GainDependentBench {
        fn run(
            &mut self,
            command: &str,
            _timeout: Duration,
            _cancel: &CancelToken,
        ) -> TestbenchResult<RunOutput> {
            let kp: f64 = command.split_whitespace().nth(2).unwrap().parse().unwrap();
            if kp >= 5.0 {
                return Err(TestbenchError::Exec {
                    message: format!("bench refused kp={kp}"),
                });
            }
            let i_a = 10.0 + 20.0 * kp;
            let row = format!("0,0,0,{i_a},-5,-5,10,0,0,0,\n");
            Ok(RunOutput {
                stdout: row.repeat(3).into_bytes(),
                ..Default::default()
            })
        }

        fn describe(&self) -> String {
            "gain-dependent".into()
        }
    }

    fn config() -> GaintuneConfig {
        let mut cfg = GaintuneConfig::default();
        cfg.experiment.max_episode_steps = 3;
        cfg
    }

    #[test]
    fn sums_step_rewards_per_episode() {
        let mut env = TestbenchEnv::new(&config(), GainDependentBench);
        let summary = HardwareRunner::new(RunnerOptions::default())
            .run(&mut env, &mut FixedGains::new(0.0, 5.0))
            .unwrap();
        assert_eq!(summary.episodes.len(), 1);
        assert_eq!(summary.stop_reason, StopReason::Exhausted);
        let ep = &summary.episodes[0];
        assert_eq!(ep.steps, 3);
        assert!(ep.performance.abs() < 1e-6, "{}", ep.performance);
        assert!(!ep.is_unsafe);
    }

    #[test]
    fn better_tracking_scores_higher() {
        let mut env = TestbenchEnv::new(&config(), GainDependentBench);
        let mut grid = GridSweep::new(
            &AxisRange {
                start: 0.0,
                stop: 0.4,
                num: 3,
            },
            &AxisRange::single(5.0),
        );
        let summary = HardwareRunner::new(RunnerOptions::default())
            .run(&mut env, &mut grid)
            .unwrap();
        let perf: Vec<f64> = summary.episodes.iter().map(|e| e.performance).collect();
        assert!(perf[0] > perf[1] && perf[1] > perf[2], "{perf:?}");
        assert_eq!(grid.best().unwrap().0.kp, 0.0);
    }

    #[test]
    fn stop_on_unsafe_ends_sweep() {
        let mut env = TestbenchEnv::new(&config(), GainDependentBench);
        let mut grid = GridSweep::new(
            &AxisRange {
                start: 0.0,
                stop: 2.0,
                num: 5,
            },
            &AxisRange::single(5.0),
        );
        let options = RunnerOptions {
            stop_on_unsafe: true,
            ..Default::default()
        };
        let summary = HardwareRunner::new(options).run(&mut env, &mut grid).unwrap();
        assert_eq!(summary.stop_reason, StopReason::Unsafe);
        // kp = 0, 0.5 safe; kp = 1.0 gives i_a = 30 A
        assert_eq!(summary.episodes.len(), 3);
        assert!(summary.episodes[2].is_unsafe);
    }

    #[test]
    fn episode_limit_caps_run() {
        let mut env = TestbenchEnv::new(&config(), GainDependentBench);
        let mut grid = GridSweep::new(
            &AxisRange {
                start: 0.0,
                stop: 0.1,
                num: 10,
            },
            &AxisRange::single(5.0),
        );
        let options = RunnerOptions {
            max_episodes: Some(4),
            ..Default::default()
        };
        let summary = HardwareRunner::new(options).run(&mut env, &mut grid).unwrap();
        assert_eq!(summary.episodes.len(), 4);
        assert_eq!(summary.stop_reason, StopReason::EpisodeLimit);
    }

    #[test]
    fn bench_errors_abort_run() {
        let mut env = TestbenchEnv::new(&config(), ReplayRunner::from_bytes("0,0,0,1,1,1,0,0,0,0,\n"));
        let err = HardwareRunner::new(RunnerOptions::default())
            .run(&mut env, &mut FixedGains::new(0.01, 5.0))
            .unwrap_err();
        assert!(err.episodes.is_empty());
        assert!(matches!(err.error, TestbenchError::TelemetryUnderrun { step: 1, rows: 1 }));
    }

    #[test]
    fn cancellation_stops_between_episodes() {
        let cancel = CancelToken::new();
        let mut env = TestbenchEnv::new(&config(), GainDependentBench).with_cancel_token(cancel.clone());
        cancel.cancel();
        let err = HardwareRunner::new(RunnerOptions::default())
            .run(&mut env, &mut FixedGains::new(0.01, 5.0))
            .unwrap_err();
        assert!(matches!(err.error, TestbenchError::Cancelled));
    }

    #[test]
    fn aborted_run_keeps_finished_episodes() {
        let mut env = TestbenchEnv::new(&config(), GainDependentBench);
        // kp = 5 makes the bench refuse the command
        let mut grid = GridSweep::new(
            &AxisRange {
                start: 0.0,
                stop: 5.0,
                num: 3,
            },
            &AxisRange::single(5.0),
        );
        let err = HardwareRunner::new(RunnerOptions::default())
            .run(&mut env, &mut grid)
            .unwrap_err();
        assert_eq!(err.episodes.len(), 2);
        assert_eq!(err.episodes[1].gains.kp, 2.5);
        assert!(matches!(err.error, TestbenchError::Exec { .. }));
    }

    #[test]
    fn writes_episode_files_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let history = ExperimentHistory::create(tmp.path()).unwrap();
        let mut env = TestbenchEnv::new(&config(), GainDependentBench);
        let options = RunnerOptions {
            save_episodes: true,
            save_plots: true,
            ..Default::default()
        };
        HardwareRunner::new(options)
            .with_history(&history)
            .run(&mut env, &mut FixedGains::new(0.0, 5.0))
            .unwrap();
        assert!(tmp.path().join("episode_0000.csv").exists());
        assert!(tmp.path().join("episode_0000_i_dq0.svg").exists());
    }
}
