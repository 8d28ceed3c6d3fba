//! Experiment results on disk.
//!
//! Layout of one run directory:
//! - `result.csv`: one row per episode (gains, performance, unsafe flag)
//! - `params.csv`: run parameters as key/value rows
//! - `summary.json`: [`ExperimentReport`]
//! - `episode_<n>.csv` / `episode_<n>_*.svg`: optional per-episode telemetry

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::GaintuneConfig;
use crate::env::Gains;
use crate::error::TestbenchResult;
use crate::telemetry::Telemetry;

pub const REPORT_SCHEMA: &str = "gaintune-report-v1";

/// Outcome of one hardware episode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeOutcome {
    pub episode: usize,
    pub gains: Gains,
    /// Sum of step rewards. Non-finite when the current limit was hit.
    pub performance: f64,
    pub steps: usize,
    #[serde(rename = "unsafe")]
    pub is_unsafe: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The proposer had no more gains.
    Exhausted,
    /// `max_episodes` reached.
    EpisodeLimit,
    /// `stop_on_unsafe` and an episode was unsafe.
    Unsafe,
    /// A bench error or an interrupt ended the run early.
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub schema_version: String,
    pub run_id: String,
    pub generated_at: String,
    pub runner: String,
    pub config: GaintuneConfig,
    pub episodes: Vec<EpisodeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best: Option<EpisodeOutcome>,
    pub unsafe_episodes: usize,
    pub stop_reason: StopReason,
}

impl ExperimentReport {
    pub fn new(
        config: &GaintuneConfig,
        runner: String,
        episodes: Vec<EpisodeOutcome>,
        stop_reason: StopReason,
    ) -> Self {
        let best = episodes
            .iter()
            .filter(|e| e.performance.is_finite())
            .max_by(|a, b| a.performance.total_cmp(&b.performance))
            .cloned();
        let unsafe_episodes = episodes.iter().filter(|e| e.is_unsafe).count();
        Self {
            schema_version: REPORT_SCHEMA.to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            runner,
            config: config.clone(),
            episodes,
            best,
            unsafe_episodes,
            stop_reason,
        }
    }
}

/// Writer for one run directory.
#[derive(Debug, Clone)]
pub struct ExperimentHistory {
    dir: PathBuf,
}

impl ExperimentHistory {
    /// Create `<root>/<timestamp>` and use it as run directory.
    pub fn create_timestamped(root: &Path) -> TestbenchResult<Self> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        Self::create(root.join(stamp))
    }

    pub fn create(dir: impl Into<PathBuf>) -> TestbenchResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn episode_prefix(episode: usize) -> String {
        format!("episode_{episode:04}")
    }

    pub fn write_episode(&self, episode: usize, data: &Telemetry) -> TestbenchResult<PathBuf> {
        let path = self
            .dir
            .join(format!("{}.csv", Self::episode_prefix(episode)));
        data.write_csv(fs::File::create(&path)?)?;
        Ok(path)
    }

    pub fn write_results(&self, episodes: &[EpisodeOutcome]) -> TestbenchResult<PathBuf> {
        let path = self.dir.join("result.csv");
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record([
            "episode",
            "kp",
            "ki",
            "performance",
            "unsafe",
            "steps",
            "duration_ms",
        ])?;
        for e in episodes {
            wtr.write_record([
                e.episode.to_string(),
                e.gains.kp.to_string(),
                e.gains.ki.to_string(),
                e.performance.to_string(),
                e.is_unsafe.to_string(),
                e.steps.to_string(),
                e.duration_ms.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(path)
    }

    pub fn write_params(&self, config: &GaintuneConfig) -> TestbenchResult<PathBuf> {
        let path = self.dir.join("params.csv");
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record(["param", "value"])?;
        for (k, v) in config.param_rows() {
            wtr.write_record([k, v])?;
        }
        wtr.flush()?;
        Ok(path)
    }

    pub fn write_report(&self, report: &ExperimentReport) -> TestbenchResult<PathBuf> {
        let path = self.dir.join("summary.json");
        let json = serde_json::to_string_pretty(&ReportJson(report))
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// `result.csv`, `params.csv` and `summary.json` in one go.
    pub fn persist(&self, report: &ExperimentReport) -> TestbenchResult<()> {
        self.write_results(&report.episodes)?;
        self.write_params(&report.config)?;
        self.write_report(report)?;
        tracing::info!(dir = %self.dir.display(), episodes = report.episodes.len(), "results written");
        Ok(())
    }
}

/// JSON has no infinities; unsafe performances are written as strings.
struct ReportJson<'a>(&'a ExperimentReport);

impl Serialize for ReportJson<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut value = serde_json::to_value(self.0).map_err(serde::ser::Error::custom)?;
        let patch = |ep: &mut serde_json::Value, perf: f64| {
            if !perf.is_finite() {
                ep["performance"] = serde_json::Value::String(perf.to_string());
            }
        };
        if let Some(eps) = value["episodes"].as_array_mut() {
            for (ep, outcome) in eps.iter_mut().zip(&self.0.episodes) {
                patch(ep, outcome.performance);
            }
        }
        value.serialize(serializer)
    }
}
