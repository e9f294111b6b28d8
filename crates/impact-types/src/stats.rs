// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Statistics
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Per-step counters reported to run callbacks.

/// Which timestep criterion produced the final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CriterionEnum {
    #[default]
    Initial,
    Courant,
    Derivative,
    Acceleration,
    Maximal,
}

/// Streaming min/max/mean accumulator.
#[derive(Debug, Clone, Copy)]
pub struct MinMaxMean {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl Default for MinMaxMean {
    fn default() -> Self {
        MinMaxMean {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }
}

impl MinMaxMean {
    pub fn accumulate(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Combine with another accumulator, e.g. when reducing per-thread
    /// statistics.
    pub fn merge(&mut self, other: &MinMaxMean) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
    }
}

/// Numerical counters for one integration step.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    /// Current run time [s].
    pub run_time: f64,
    /// Timestep used for the current step [s].
    pub timestep: f64,
    /// Criterion that limited the timestep.
    pub timestep_criterion: CriterionEnum,
    /// Wall-clock duration of derivative evaluation [ms].
    pub evaluation_time_ms: f64,
    /// Neighbour counts over all particles.
    pub neighbour_counts: MinMaxMean,
    /// Total resolved collisions (bounces + mergers).
    pub collision_count: usize,
    pub bounce_count: usize,
    pub merger_count: usize,
    pub overlap_count: usize,
    /// Collision events skipped because the contact time was
    /// inadmissible.
    pub warning_count: usize,
    /// Error recorded mid-run; the run terminates after the current
    /// step's bookkeeping.
    pub failure: Option<String>,
}

impl Statistics {
    /// Reset the per-step counters, keeping cumulative run state.
    pub fn next_step(&mut self) {
        self.evaluation_time_ms = 0.0;
        self.neighbour_counts = MinMaxMean::default();
        self.collision_count = 0;
        self.bounce_count = 0;
        self.merger_count = 0;
        self.overlap_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max_mean_basic() {
        let mut acc = MinMaxMean::default();
        for v in [2.0, 4.0, 6.0] {
            acc.accumulate(v);
        }
        assert_eq!(acc.min(), 2.0);
        assert_eq!(acc.max(), 6.0);
        assert!((acc.mean() - 4.0).abs() < 1e-12);
        assert_eq!(acc.count(), 3);
    }

    #[test]
    fn test_empty_mean_is_zero() {
        let acc = MinMaxMean::default();
        assert_eq!(acc.mean(), 0.0);
    }

    #[test]
    fn test_next_step_keeps_cumulative_state() {
        let mut stats = Statistics {
            run_time: 1.5,
            warning_count: 3,
            collision_count: 7,
            ..Statistics::default()
        };
        stats.next_step();
        assert_eq!(stats.run_time, 1.5);
        assert_eq!(stats.warning_count, 3);
        assert_eq!(stats.collision_count, 0);
    }
}
