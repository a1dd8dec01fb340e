//! Read surface shared between the engine and the UI

use crate::constants::audio::MIN_DB_LEVEL;
use crate::fade::FadeCommand;
use crate::mixer::MixerTarget;
use parking_lot::RwLock;
use std::sync::Arc;

/// Everything the UI may show, published once per interval
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub instant_db: f64,
    pub average_db: f64,
    pub fade_active: bool,
    pub seconds_until_next_evaluation: u32,
    pub pending_fade: Option<FadeCommand>,
    pub last_command: Option<(MixerTarget, FadeCommand)>,
    pub instant: Vec<f64>,
    pub average: Vec<f64>,
    pub running: bool,
    pub last_error: Option<String>,
}

impl EngineSnapshot {
    /// Idle snapshot for a fresh history of `plot_length` seconds
    pub fn idle(plot_length: usize, seconds_until_next_evaluation: u32) -> Self {
        Self {
            instant_db: MIN_DB_LEVEL,
            average_db: MIN_DB_LEVEL,
            fade_active: false,
            seconds_until_next_evaluation,
            pending_fade: None,
            last_command: None,
            instant: vec![MIN_DB_LEVEL; plot_length],
            average: vec![MIN_DB_LEVEL; plot_length],
            running: false,
            last_error: None,
        }
    }
}

/// Thread-safe snapshot handle; the engine writes, anyone may poll
#[derive(Debug, Clone)]
pub struct SharedSnapshot {
    inner: Arc<RwLock<EngineSnapshot>>,
}

impl SharedSnapshot {
    pub fn new(snapshot: EngineSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Copy of the latest published values
    pub fn read(&self) -> EngineSnapshot {
        self.inner.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut EngineSnapshot)) {
        f(&mut self.inner.write());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_snapshot_is_at_the_floor() {
        let snapshot = EngineSnapshot::idle(10, 1);
        assert_eq!(snapshot.instant.len(), 10);
        assert_eq!(snapshot.average.len(), 10);
        assert_eq!(snapshot.instant_db, MIN_DB_LEVEL);
        assert!(!snapshot.fade_active);
        assert!(!snapshot.running);
    }

    #[test]
    fn clones_see_published_values() {
        let shared = SharedSnapshot::new(EngineSnapshot::idle(2, 1));
        let reader = shared.clone();
        shared.update(|s| {
            s.running = true;
            s.last_error = Some("device busy".to_string());
        });
        let snapshot = reader.read();
        assert!(snapshot.running);
        assert_eq!(snapshot.last_error.as_deref(), Some("device busy"));
    }
}
