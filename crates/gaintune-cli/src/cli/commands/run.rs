use std::path::Path;

use anyhow::Result;
use gaintune_core::{
    CancelToken, ExperimentHistory, ExperimentReport, FixedGains, HardwareRunner, RunnerOptions,
    TestbenchEnv,
};

use crate::cli::args::RunArgs;
use crate::cli::helpers::{apply_overrides, blocking_with_interrupt, build_runner, load_config};
use crate::exit_codes::{SUCCESS, UNSAFE_EPISODE};

pub async fn run(args: RunArgs, config_path: Option<&Path>) -> Result<i32> {
    let mut cfg = load_config(config_path)?;
    apply_overrides(&mut cfg, &args.bench.overrides)?;
    let kp = args.kp.unwrap_or(cfg.experiment.kp);
    let ki = args.ki.unwrap_or(cfg.experiment.ki);

    let runner = build_runner(&cfg, &args.bench)?;
    let runner_name = runner.describe();
    let persist = args.bench.overrides.out.is_some() || cfg.output.save_plots;

    let cancel = CancelToken::new();
    let mut env = TestbenchEnv::new(&cfg, runner).with_cancel_token(cancel.clone());
    let options = RunnerOptions {
        max_episodes: Some(1),
        stop_on_unsafe: false,
        save_episodes: cfg.output.save_episodes,
        save_plots: cfg.output.save_plots,
    };
    let history = if persist {
        Some(ExperimentHistory::create_timestamped(&cfg.output.dir)?)
    } else {
        None
    };

    let (summary, env, history) = blocking_with_interrupt(cancel, move || -> Result<_> {
        let mut runner = HardwareRunner::new(options);
        if let Some(h) = &history {
            runner = runner.with_history(h);
        }
        let summary = runner
            .run(&mut env, &mut FixedGains::new(kp, ki))
            .map_err(|aborted| aborted.error)?;
        Ok((summary, env, history))
    })
    .await??;

    let outcome = summary
        .episodes
        .first()
        .ok_or_else(|| anyhow::anyhow!("no episode was run"))?;

    println!("Runner:  {runner_name}");
    println!("Gains:   kp={} ki={}", outcome.gains.kp, outcome.gains.ki);
    println!("Rows:    {}", env.data().len());
    println!("Steps:   {}", outcome.steps);
    println!("J = {}", outcome.performance);
    for line in env.diagnostics() {
        println!("remote: {line}");
    }

    let is_unsafe = outcome.is_unsafe;
    if let Some(history) = history {
        let report = ExperimentReport::new(&cfg, runner_name, summary.episodes, summary.stop_reason);
        history.persist(&report)?;
        println!("Results: {}", history.dir().display());
    }

    if is_unsafe {
        println!("UNSAFE: current limit reached");
        return Ok(UNSAFE_EPISODE);
    }
    Ok(SUCCESS)
}
