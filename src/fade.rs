//! Threshold-triggered fade control
//!
//! The controller compares the running average against the threshold and,
//! when it is exceeded, issues one gain correction toward the return level.
//! Until that correction has had time to play out, further checks are
//! suppressed. Sampling is unaffected; only evaluation pauses.

use crate::error::{AppError, AppResult};
use std::time::Duration;

/// "Ramp the target's gain by `delta` dB over `duration_ms` milliseconds"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeCommand {
    pub delta: i32,
    pub duration_ms: u64,
}

impl FadeCommand {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Whether a correction is currently playing out downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadeState {
    #[default]
    Idle,
    Fading(FadeCommand),
}

impl FadeState {
    pub fn is_active(&self) -> bool {
        matches!(self, FadeState::Fading(_))
    }
}

/// Decides when and by how much to fade
#[derive(Debug, Clone)]
pub struct FadeController {
    threshold: f64,
    return_to: f64,
    rate_per_minute: f64,
    state: FadeState,
}

impl FadeController {
    /// A zero, negative or non-finite rate is rejected here, never at evaluation time
    pub fn new(threshold: f64, return_to: f64, rate_per_minute: f64) -> AppResult<Self> {
        if !rate_per_minute.is_finite() || rate_per_minute <= 0.0 {
            return Err(AppError::Configuration(format!(
                "Fade rate must be a positive number of dB per minute, got {}",
                rate_per_minute
            )));
        }
        if !threshold.is_finite() || !return_to.is_finite() {
            return Err(AppError::Configuration(
                "Threshold and return level must be finite".to_string(),
            ));
        }
        Ok(Self {
            threshold,
            return_to,
            rate_per_minute,
            state: FadeState::Idle,
        })
    }

    pub fn state(&self) -> FadeState {
        self.state
    }

    pub fn is_fading(&self) -> bool {
        self.state.is_active()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Check the latest running average; a no-op while a fade is outstanding.
    ///
    /// Only a strictly greater average triggers. The delta is floored, and the
    /// duration is the time the delta takes at the configured rate.
    pub fn evaluate(&mut self, average_db: f64) -> Option<FadeCommand> {
        if self.is_fading() || !average_db.is_finite() || average_db <= self.threshold {
            return None;
        }

        let delta = (self.return_to - average_db).floor() as i32;
        let minutes = (f64::from(delta) / self.rate_per_minute).abs();
        let command = FadeCommand {
            delta,
            duration_ms: (minutes * 60_000.0).round() as u64,
        };

        self.state = FadeState::Fading(command);
        Some(command)
    }

    /// The scheduled wait elapsed; resume evaluating
    pub fn complete(&mut self) -> Option<FadeCommand> {
        match std::mem::take(&mut self.state) {
            FadeState::Fading(command) => Some(command),
            FadeState::Idle => None,
        }
    }
}

/// Countdown between threshold checks, frozen while fading
#[derive(Debug, Clone, Copy)]
pub struct EvaluationClock {
    period: u32,
    remaining: u32,
}

impl EvaluationClock {
    pub fn new(period: u32) -> Self {
        let period = period.max(1);
        Self {
            period,
            remaining: period,
        }
    }

    /// Advance one interval; true when a check is due
    pub fn advance(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.remaining = self.period;
            true
        } else {
            false
        }
    }

    pub fn seconds_until_next(&self) -> u32 {
        self.remaining
    }
}
