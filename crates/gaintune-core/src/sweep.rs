//! Sources of controller gains for successive episodes.
//!
//! An optimizer (e.g. a safe Bayesian optimizer living outside this crate)
//! implements [`GainProposer`] and is driven by the hardware runner.

use crate::config::{AxisRange, SweepConfig};
use crate::env::Gains;

pub trait GainProposer {
    /// Next gains to try, or `None` when the proposer is exhausted.
    fn propose(&mut self) -> Option<Gains>;

    /// Performance measured for `gains`. Non-finite means unsafe.
    fn observe(&mut self, gains: Gains, performance: f64);
}

/// A single episode with fixed gains.
#[derive(Debug, Clone)]
pub struct FixedGains {
    gains: Option<Gains>,
}

impl FixedGains {
    pub fn new(kp: f64, ki: f64) -> Self {
        Self {
            gains: Some(Gains { kp, ki }),
        }
    }
}

impl GainProposer for FixedGains {
    fn propose(&mut self) -> Option<Gains> {
        self.gains.take()
    }

    fn observe(&mut self, _gains: Gains, _performance: f64) {}
}

/// Exhaustive grid over Kp x Ki, Kp in the outer loop.
#[derive(Debug, Clone)]
pub struct GridSweep {
    points: Vec<Gains>,
    next: usize,
    observed: Vec<(Gains, f64)>,
}

impl GridSweep {
    pub fn new(kp: &AxisRange, ki: &AxisRange) -> Self {
        let ki_points = ki.points();
        let points = kp
            .points()
            .into_iter()
            .flat_map(|kp| ki_points.iter().map(move |&ki| Gains { kp, ki }))
            .collect();
        Self {
            points,
            next: 0,
            observed: Vec::new(),
        }
    }

    pub fn from_config(cfg: &SweepConfig) -> Self {
        Self::new(&cfg.kp, &cfg.ki)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Best finite observation so far.
    pub fn best(&self) -> Option<(Gains, f64)> {
        self.observed
            .iter()
            .filter(|(_, j)| j.is_finite())
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

impl GainProposer for GridSweep {
    fn propose(&mut self) -> Option<Gains> {
        let gains = self.points.get(self.next).copied()?;
        self.next += 1;
        Some(gains)
    }

    fn observe(&mut self, gains: Gains, performance: f64) {
        self.observed.push((gains, performance));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_gains_proposes_once() {
        let mut p = FixedGains::new(0.01, 5.0);
        assert_eq!(p.propose(), Some(Gains { kp: 0.01, ki: 5.0 }));
        assert_eq!(p.propose(), None);
    }

    #[test]
    fn grid_is_kp_major() {
        let mut grid = GridSweep::new(
            &AxisRange {
                start: 0.0,
                stop: 0.1,
                num: 2,
            },
            &AxisRange {
                start: 10.0,
                stop: 30.0,
                num: 3,
            },
        );
        assert_eq!(grid.len(), 6);
        let order: Vec<(f64, f64)> = std::iter::from_fn(|| grid.propose())
            .map(|g| (g.kp, g.ki))
            .collect();
        assert_eq!(
            order,
            vec![
                (0.0, 10.0),
                (0.0, 20.0),
                (0.0, 30.0),
                (0.1, 10.0),
                (0.1, 20.0),
                (0.1, 30.0)
            ]
        );
    }

    #[test]
    fn best_ignores_unsafe_observations() {
        let mut grid = GridSweep::new(&AxisRange::single(0.01), &AxisRange::single(5.0));
        let g = Gains { kp: 0.01, ki: 5.0 };
        grid.observe(g, -3.0);
        grid.observe(Gains { kp: 0.2, ki: 5.0 }, f64::NEG_INFINITY);
        grid.observe(Gains { kp: 0.3, ki: 5.0 }, f64::NAN);
        grid.observe(Gains { kp: 0.04, ki: 5.0 }, -1.5);
        assert_eq!(grid.best(), Some((Gains { kp: 0.04, ki: 5.0 }, -1.5)));
    }
}
