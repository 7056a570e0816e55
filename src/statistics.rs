//! Streaming timing statistics.
//!
//! The engine measures durations (in microseconds) for bus events, state
//! handlers and host callbacks. Each metric is tracked by a [`TimingStats`]
//! accumulator using Welford's online algorithm, so mean and standard
//! deviation are available at any time without storing samples. Snapshots
//! are taken as plain [`TimingValues`] copies, which keeps reads consistent
//! under the single-threaded cooperative model.

use libm::sqrt;

/// Welford accumulator for one duration metric, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingStats {
    /// The most recently added value.
    pub last: f64,
    /// Number of values added since the last reset.
    pub count: u64,
    /// Running mean of all added values.
    pub mean: f64,
    m2: f64,
}

impl TimingStats {
    /// Creates a zeroed accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one duration into the accumulator.
    pub fn add(&mut self, value: f64) {
        self.last = value;
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Sample variance of the added values; zero with fewer than two values.
    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        }
    }

    /// Sample standard deviation of the added values.
    pub fn stddev(&self) -> f64 {
        sqrt(self.variance())
    }

    /// Resets the accumulator to its zeroed state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Takes a snapshot of the current values.
    pub fn values(&self) -> TimingValues {
        TimingValues {
            last: self.last,
            count: self.count,
            mean: self.mean,
            stddev: self.stddev(),
        }
    }
}

/// Read-only snapshot of one [`TimingStats`] metric.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingValues {
    /// The most recently recorded duration.
    pub last: f64,
    /// Number of recorded durations.
    pub count: u64,
    /// Mean duration.
    pub mean: f64,
    /// Sample standard deviation of the durations.
    pub stddev: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats_are_zero() {
        let stats = TimingStats::new();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.stddev(), 0.0);
    }

    #[test]
    fn test_single_value() {
        let mut stats = TimingStats::new();
        stats.add(4300.0);
        assert_eq!(stats.last, 4300.0);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.mean, 4300.0);
        assert_eq!(stats.stddev(), 0.0);
    }

    #[test]
    fn test_mean_and_stddev() {
        let mut stats = TimingStats::new();
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.add(value);
        }
        assert_eq!(stats.count, 8);
        assert!((stats.mean - 5.0).abs() < 1e-12);
        // Sample variance of this series is 32/7.
        assert!((stats.variance() - 32.0 / 7.0).abs() < 1e-12);
        assert!((stats.stddev() - sqrt(32.0 / 7.0)).abs() < 1e-12);
    }

    #[test]
    fn test_clear_resets() {
        let mut stats = TimingStats::new();
        stats.add(1.0);
        stats.add(2.0);
        stats.clear();
        assert_eq!(stats, TimingStats::new());
    }

    #[test]
    fn test_snapshot_matches() {
        let mut stats = TimingStats::new();
        stats.add(10.0);
        stats.add(20.0);
        let values = stats.values();
        assert_eq!(values.last, 20.0);
        assert_eq!(values.count, 2);
        assert_eq!(values.mean, 15.0);
        assert!((values.stddev - stats.stddev()).abs() < 1e-12);
    }
}
