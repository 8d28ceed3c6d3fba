use std::path::Path;

use anyhow::{Context, Result};
use gaintune_core::config::AxisRange;
use gaintune_core::{
    CancelToken, EpisodeOutcome, ExperimentHistory, ExperimentReport, GridSweep, HardwareRunner,
    RunnerOptions, StopReason, TestbenchEnv,
};

use crate::cli::args::SweepArgs;
use crate::cli::helpers::{apply_overrides, blocking_with_interrupt, build_runner, load_config};
use crate::exit_codes::{SUCCESS, UNSAFE_EPISODE};

pub async fn run(args: SweepArgs, config_path: Option<&Path>) -> Result<i32> {
    let mut cfg = load_config(config_path)?;
    if let Some(kp) = &args.kp_range {
        cfg.sweep.kp = AxisRange::parse(kp).context("--kp-range")?;
    }
    if let Some(ki) = &args.ki_range {
        cfg.sweep.ki = AxisRange::parse(ki).context("--ki-range")?;
    }
    if args.stop_on_unsafe {
        cfg.sweep.stop_on_unsafe = true;
    }
    apply_overrides(&mut cfg, &args.bench.overrides)?;

    let mut grid = GridSweep::from_config(&cfg.sweep);
    let history = ExperimentHistory::create_timestamped(&cfg.output.dir)?;
    tracing::info!(
        points = grid.len(),
        dir = %history.dir().display(),
        "starting sweep"
    );

    let runner = build_runner(&cfg, &args.bench)?;
    let runner_name = runner.describe();
    let cancel = CancelToken::new();
    let mut env = TestbenchEnv::new(&cfg, runner).with_cancel_token(cancel.clone());
    let options = RunnerOptions {
        max_episodes: args.max_episodes,
        stop_on_unsafe: cfg.sweep.stop_on_unsafe,
        save_episodes: cfg.output.save_episodes,
        save_plots: cfg.output.save_plots,
    };

    let (outcome, history) = blocking_with_interrupt(cancel, move || {
        let outcome = HardwareRunner::new(options)
            .with_history(&history)
            .run(&mut env, &mut grid);
        (outcome, history)
    })
    .await?;

    let (episodes, stop_reason, failure) = match outcome {
        Ok(summary) => (summary.episodes, summary.stop_reason, None),
        Err(aborted) => (aborted.episodes, StopReason::Aborted, Some(aborted.error)),
    };

    print_table(&episodes);
    let report = ExperimentReport::new(&cfg, runner_name, episodes, stop_reason);
    history.persist(&report)?;

    if let Some(error) = failure {
        println!("Results: {} (partial)", history.dir().display());
        return Err(anyhow::Error::from(error).context(format!(
            "sweep aborted after {} episode(s)",
            report.episodes.len()
        )));
    }

    match &report.best {
        Some(best) => println!(
            "Best: kp={} ki={} J={}",
            best.gains.kp, best.gains.ki, best.performance
        ),
        None => println!("Best: none (no safe episode)"),
    }
    println!("Results: {}", history.dir().display());

    if report.unsafe_episodes > 0 {
        println!("UNSAFE: {} episode(s) reached the current limit", report.unsafe_episodes);
        return Ok(UNSAFE_EPISODE);
    }
    Ok(SUCCESS)
}

fn print_table(episodes: &[EpisodeOutcome]) {
    println!("{:>4}  {:>10}  {:>10}  {:>14}", "ep", "kp", "ki", "J");
    for e in episodes {
        let flag = if e.is_unsafe { "  unsafe" } else { "" };
        println!(
            "{:>4}  {:>10.5}  {:>10.3}  {:>14.4}{}",
            e.episode, e.gains.kp, e.gains.ki, e.performance, flag
        );
    }
}
