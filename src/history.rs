//! Fixed-length sliding history of interval levels

use crate::constants::audio::MIN_DB_LEVEL;
use std::collections::VecDeque;

/// Instant levels and their running average over the whole retained window.
///
/// Both sequences always hold exactly `len()` entries; the back is "now".
#[derive(Debug, Clone)]
pub struct LevelHistory {
    instant: VecDeque<f64>,
    average: VecDeque<f64>,
}

impl LevelHistory {
    /// Pre-fill `plot_length` entries at the floor
    pub fn new(plot_length: usize) -> Self {
        let plot_length = plot_length.max(1);
        Self {
            instant: VecDeque::from(vec![MIN_DB_LEVEL; plot_length]),
            average: VecDeque::from(vec![MIN_DB_LEVEL; plot_length]),
        }
    }

    pub fn len(&self) -> usize {
        self.instant.len()
    }

    /// Shift both sequences left by one and append the new level
    pub fn push(&mut self, instant_db: f64) {
        self.instant.pop_front();
        self.average.pop_front();

        self.instant.push_back(instant_db);
        // simple moving average over the whole window
        let mean = self.instant.iter().sum::<f64>() / self.len() as f64;
        self.average.push_back(mean);
    }

    /// Most recent `(instant, average)` pair
    pub fn last(&self) -> (f64, f64) {
        (
            self.instant.back().copied().unwrap_or(MIN_DB_LEVEL),
            self.average.back().copied().unwrap_or(MIN_DB_LEVEL),
        )
    }

    pub fn instant(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.instant.iter().copied()
    }

    pub fn average(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.average.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_at_the_floor() {
        let history = LevelHistory::new(5);
        assert_eq!(history.len(), 5);
        assert!(history.instant().all(|v| v == MIN_DB_LEVEL));
        assert!(history.average().all(|v| v == MIN_DB_LEVEL));
        assert_eq!(history.last(), (MIN_DB_LEVEL, MIN_DB_LEVEL));
    }

    #[test]
    fn push_shifts_and_averages_over_the_window() {
        let mut history = LevelHistory::new(4);
        history.push(-20.0);
        assert_eq!(history.instant().collect::<Vec<_>>(), vec![-60.0, -60.0, -60.0, -20.0]);
        assert_eq!(history.last(), (-20.0, -50.0));

        history.push(-20.0);
        history.push(-20.0);
        history.push(-20.0);
        assert_eq!(history.last(), (-20.0, -20.0));

        // the first averages have scrolled off too
        let averages: Vec<_> = history.average().collect();
        assert_eq!(averages, vec![-50.0, -40.0, -30.0, -20.0]);
    }

    #[test]
    fn silence_then_full_scale() {
        let mut history = LevelHistory::new(3);
        history.push(MIN_DB_LEVEL);
        history.push(2.0);
        let tail: Vec<_> = history.instant().skip(1).collect();
        assert_eq!(tail, vec![MIN_DB_LEVEL, 2.0]);
    }

    #[test]
    fn zero_length_is_raised_to_one() {
        let mut history = LevelHistory::new(0);
        history.push(-10.0);
        assert_eq!(history.len(), 1);
        assert_eq!(history.last(), (-10.0, -10.0));
    }

    proptest! {
        #[test]
        fn lengths_and_mean_hold_after_every_push(
            plot_length in 1usize..50,
            levels in proptest::collection::vec(-60.0f64..10.0, 0..120),
        ) {
            let mut history = LevelHistory::new(plot_length);
            for level in levels {
                history.push(level);
                prop_assert_eq!(history.instant().len(), plot_length);
                prop_assert_eq!(history.average().len(), plot_length);
                let mean = history.instant().sum::<f64>() / plot_length as f64;
                prop_assert!((history.last().1 - mean).abs() < 1e-9);
                prop_assert_eq!(history.last().0, level);
            }
        }
    }
}
