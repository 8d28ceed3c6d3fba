//! Per-step reward for current-controller quality.

use std::f64::consts::PI;

use crate::config::RewardConfig;

/// Rotating dq0 frame to three-phase abc at electrical angle `theta`.
///
/// Phase b lags phase a by 120 degrees, phase c leads it.
pub fn dq0_to_abc(dq0: [f64; 3], theta: f64) -> [f64; 3] {
    let [d, q, z] = dq0;
    let shifts = [0.0, 2.0 * PI / 3.0, -2.0 * PI / 3.0];
    shifts.map(|s| d * (theta - s).cos() - q * (theta - s).sin() + z)
}

/// Three-phase abc to the rotating dq0 frame (inverse of [`dq0_to_abc`]).
pub fn abc_to_dq0(abc: [f64; 3], theta: f64) -> [f64; 3] {
    let shifts = [0.0, 2.0 * PI / 3.0, -2.0 * PI / 3.0];
    let mut dq0 = [0.0; 3];
    for (x, s) in abc.iter().zip(shifts) {
        dq0[0] += x * (theta - s).cos();
        dq0[1] -= x * (theta - s).sin();
        dq0[2] += x;
    }
    [dq0[0] * 2.0 / 3.0, dq0[1] * 2.0 / 3.0, dq0[2] / 3.0]
}

/// Root-error tracking term plus a logarithmic current barrier.
///
/// The barrier term is scaled by the episode length while the tracking term
/// is not. Once a phase current reaches the hard limit the reward becomes
/// `-inf` (NaN beyond it); callers treat a non-finite reward as unsafe.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RewardFn {
    pub i_limit: f64,
    pub i_nominal: f64,
    pub mu: f64,
    pub max_episode_steps: usize,
}

impl RewardFn {
    pub fn new(cfg: &RewardConfig, max_episode_steps: usize) -> Self {
        Self {
            i_limit: cfg.i_limit,
            i_nominal: cfg.i_nominal,
            mu: cfg.mu,
            max_episode_steps,
        }
    }

    pub fn tracking(&self, i_abc_meas: [f64; 3], i_abc_sp: [f64; 3]) -> f64 {
        i_abc_sp
            .iter()
            .zip(i_abc_meas)
            .map(|(sp, meas)| ((sp - meas).abs() / self.i_limit).sqrt())
            .sum()
    }

    /// Zero while every |current| <= nominal.
    pub fn barrier(&self, i_abc_meas: [f64; 3]) -> f64 {
        let span = self.i_limit - self.i_nominal;
        -i_abc_meas
            .iter()
            .map(|i| self.mu * (1.0 - (i.abs() - self.i_nominal).max(0.0) / span).ln())
            .sum::<f64>()
    }

    pub fn evaluate(&self, i_abc_meas: [f64; 3], i_dq0_sp: [f64; 3], phase: f64) -> f64 {
        let i_abc_sp = dq0_to_abc(i_dq0_sp, phase);
        let error = self.tracking(i_abc_meas, i_abc_sp)
            + self.barrier(i_abc_meas) * self.max_episode_steps as f64;
        -error
    }
}
