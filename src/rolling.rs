//! Trailing N-bar high
//!
//! Sliding-window maximum over a monotonic deque of `(index, high)` pairs.
//! Values in the deque are strictly decreasing from front to back, so the
//! front is always the window maximum. Each bar is pushed and popped at most
//! once, giving amortized O(1) per bar.

use std::collections::VecDeque;

use crate::error::{BacktestError, CoreResult};

#[derive(Debug, Clone)]
pub struct RollingHighTracker {
    period: usize,
    observed: usize,
    window: VecDeque<(usize, f64)>,
}

impl RollingHighTracker {
    /// `period` must be at least 1
    pub fn new(period: usize) -> CoreResult<Self> {
        if period == 0 {
            return Err(BacktestError::config("n_day_high_period must be a positive integer"));
        }
        Ok(RollingHighTracker {
            period,
            observed: 0,
            window: VecDeque::with_capacity(period + 1),
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Bars pushed so far
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Maximum high of the last `period` pushed bars.
    ///
    /// Call before pushing the current bar to get the high excluding it.
    pub fn current(&self) -> CoreResult<f64> {
        if self.observed < self.period {
            return Err(BacktestError::InsufficientData {
                required: self.period,
                observed: self.observed,
            });
        }
        self.window
            .front()
            .map(|&(_, high)| high)
            .ok_or(BacktestError::InsufficientData {
                required: self.period,
                observed: self.observed,
            })
    }

    /// Record a completed bar's high
    pub fn push(&mut self, high: f64) {
        let index = self.observed;
        while self.window.back().is_some_and(|&(_, v)| v <= high) {
            self.window.pop_back();
        }
        self.window.push_back((index, high));

        // Evict entries that slid out of the last `period` bars
        while self
            .window
            .front()
            .is_some_and(|&(i, _)| i + self.period <= index)
        {
            self.window.pop_front();
        }
        self.observed += 1;
    }

    /// Return the high excluding `high`, then record it
    pub fn update(&mut self, high: f64) -> CoreResult<f64> {
        let prior = self.current();
        self.push(high);
        prior
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_period_rejected() {
        assert!(matches!(
            RollingHighTracker::new(0),
            Err(BacktestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_warm_up_reports_insufficient_data() {
        let mut tracker = RollingHighTracker::new(3).unwrap();
        assert!(matches!(
            tracker.update(10.0),
            Err(BacktestError::InsufficientData { required: 3, observed: 0 })
        ));
        assert!(tracker.update(12.0).is_err());
        assert!(tracker.update(11.0).is_err());
        assert_eq!(tracker.update(9.0).unwrap(), 12.0);
    }

    #[test]
    fn test_excludes_current_bar() {
        let mut tracker = RollingHighTracker::new(2).unwrap();
        tracker.push(10.0);
        tracker.push(12.0);
        // Current bar's high of 15 is not part of the window
        assert_eq!(tracker.update(15.0).unwrap(), 12.0);
        assert_eq!(tracker.current().unwrap(), 15.0);
    }

    #[test]
    fn test_old_maximum_slides_out() {
        let mut tracker = RollingHighTracker::new(2).unwrap();
        for high in [20.0, 5.0, 6.0] {
            tracker.push(high);
        }
        assert_eq!(tracker.current().unwrap(), 6.0);
    }

    #[test]
    fn test_matches_naive_scan() {
        let highs = [5.0, 3.0, 8.0, 8.0, 2.0, 7.0, 1.0, 9.0, 4.0, 4.0, 6.0];
        let period = 3;
        let mut tracker = RollingHighTracker::new(period).unwrap();
        for (i, &high) in highs.iter().enumerate() {
            let got = tracker.update(high);
            if i < period {
                assert!(got.is_err());
            } else {
                let expected = highs[i - period..i]
                    .iter()
                    .copied()
                    .fold(f64::MIN, f64::max);
                assert_eq!(got.unwrap(), expected);
            }
        }
    }
}
