//! Interval accumulation of block peaks and their reduction to dBFS

use crate::constants::audio::MIN_DB_LEVEL;
use crate::encoding::SampleEncoding;
use parking_lot::Mutex;

/// Collects block peaks from the capture thread and reduces them once per interval.
///
/// `on_block` and `reduce` share one short critical section, so a peak lands
/// in exactly one interval.
pub struct LevelAggregator {
    peaks: Mutex<Vec<f32>>,
    full_scale: f64,
    db_correction: f64,
}

impl LevelAggregator {
    pub fn new(encoding: SampleEncoding, db_correction: f64) -> Self {
        Self {
            peaks: Mutex::new(Vec::with_capacity(256)),
            full_scale: encoding.full_scale(),
            db_correction,
        }
    }

    /// Record the peak of one delivered block. Called from the driver thread.
    pub fn on_block(&self, peak: f32) {
        self.peaks.lock().push(peak);
    }

    /// Number of peaks waiting for the next reduction
    pub fn pending(&self) -> usize {
        self.peaks.lock().len()
    }

    /// Drain the interval and return its calibrated level in dBFS.
    ///
    /// An empty interval counts as silence and yields exactly the floor.
    pub fn reduce(&self) -> f64 {
        level_dbfs(&self.drain(), self.full_scale, self.db_correction)
    }

    /// Take every pending peak and leave an empty interval behind
    fn drain(&self) -> Vec<f32> {
        let mut guard = self.peaks.lock();
        let capacity = guard.capacity();
        std::mem::replace(&mut *guard, Vec::with_capacity(capacity))
    }
}

/// Quadratic mean of the peaks, normalized by `full_scale`, in corrected dBFS, floored
pub fn level_dbfs(peaks: &[f32], full_scale: f64, db_correction: f64) -> f64 {
    let mean_square = if peaks.is_empty() {
        0.0
    } else {
        peaks.iter().map(|&p| f64::from(p) * f64::from(p)).sum::<f64>() / peaks.len() as f64
    };
    let rms = mean_square.sqrt() / full_scale;
    amplitude_to_db(rms, db_correction)
}

/// Convert a unit amplitude to dB with correction, clamped at the floor.
///
/// `log10(0)` is `-inf`, which the clamp absorbs. Any other non-finite
/// result counts as silence too.
pub fn amplitude_to_db(amplitude: f64, db_correction: f64) -> f64 {
    let db = 20.0 * amplitude.log10() + db_correction;
    if !db.is_finite() || db < MIN_DB_LEVEL {
        MIN_DB_LEVEL
    } else {
        db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_interval_is_floor() {
        let aggregator = LevelAggregator::new(SampleEncoding::Float32, 0.0);
        assert_eq!(aggregator.reduce(), MIN_DB_LEVEL);

        let corrected = LevelAggregator::new(SampleEncoding::Float32, 12.0);
        assert_eq!(corrected.reduce(), MIN_DB_LEVEL);
    }

    #[test]
    fn silent_peaks_are_floor_not_infinite() {
        let aggregator = LevelAggregator::new(SampleEncoding::Pcm24, 3.0);
        aggregator.on_block(0.0);
        aggregator.on_block(0.0);
        let db = aggregator.reduce();
        assert_eq!(db, MIN_DB_LEVEL);
        assert!(db.is_finite());
    }

    #[test]
    fn full_scale_float_is_zero_db_plus_correction() {
        let aggregator = LevelAggregator::new(SampleEncoding::Float32, 4.5);
        aggregator.on_block(1.0);
        assert!((aggregator.reduce() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn pcm24_full_scale_normalizes_to_zero_db() {
        let aggregator = LevelAggregator::new(SampleEncoding::Pcm24, 0.0);
        aggregator.on_block(8_388_608.0);
        assert!(aggregator.reduce().abs() < 1e-9);
    }

    #[test]
    fn rms_of_peaks() {
        let aggregator = LevelAggregator::new(SampleEncoding::Float32, 0.0);
        aggregator.on_block(0.5);
        aggregator.on_block(0.1);
        let rms = ((0.25f64 + 0.01) / 2.0).sqrt();
        let expected = 20.0 * rms.log10();
        assert!((aggregator.reduce() - expected).abs() < 1e-5);
    }

    #[test]
    fn reduce_clears_the_interval() {
        let aggregator = LevelAggregator::new(SampleEncoding::Float32, 0.0);
        aggregator.on_block(1.0);
        assert_eq!(aggregator.pending(), 1);
        aggregator.reduce();
        assert_eq!(aggregator.pending(), 0);
        assert_eq!(aggregator.reduce(), MIN_DB_LEVEL);
    }

    #[test]
    fn infinite_peak_does_not_reach_the_history() {
        let aggregator = LevelAggregator::new(SampleEncoding::Float32, 0.0);
        aggregator.on_block(f32::INFINITY);
        assert_eq!(aggregator.reduce(), MIN_DB_LEVEL);
        assert_eq!(amplitude_to_db(f64::INFINITY, 0.0), MIN_DB_LEVEL);
        assert_eq!(amplitude_to_db(f64::NAN, 0.0), MIN_DB_LEVEL);
    }

    #[test]
    fn very_negative_correction_hits_the_floor() {
        let aggregator = LevelAggregator::new(SampleEncoding::Float32, -80.0);
        aggregator.on_block(1.0);
        assert_eq!(aggregator.reduce(), MIN_DB_LEVEL);
    }

    #[test]
    fn concurrent_blocks_are_counted_once() {
        use std::sync::Arc;

        let aggregator = Arc::new(LevelAggregator::new(SampleEncoding::Float32, 0.0));
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        aggregator.on_block(0.5);
                    }
                })
            })
            .collect();

        let mut drained = 0usize;
        for _ in 0..50 {
            drained += aggregator.drain().len();
            std::thread::yield_now();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        drained += aggregator.pending();
        assert_eq!(drained, 4000);
    }

    proptest! {
        #[test]
        fn reduce_matches_formula(
            peaks in proptest::collection::vec(0.0f32..=1.0, 1..64),
            correction in -20.0f64..20.0,
        ) {
            let aggregator = LevelAggregator::new(SampleEncoding::Float32, correction);
            for &peak in &peaks {
                aggregator.on_block(peak);
            }
            let mean = peaks.iter().map(|&p| f64::from(p).powi(2)).sum::<f64>() / peaks.len() as f64;
            let expected = (20.0 * mean.sqrt().log10() + correction).max(MIN_DB_LEVEL);
            let actual = aggregator.reduce();
            prop_assert!(actual >= MIN_DB_LEVEL);
            prop_assert!((actual - expected).abs() < 1e-9);
        }
    }
}
