//! Level engine: interval reduction, history, fade control and the control loop
//!
//! All state except the aggregator lives on one tokio task. The 1 Hz tick and
//! the fade-completion wait are branches of the same `select!`, so capture
//! keeps draining into the aggregator while a fade is outstanding.

use crate::aggregator::LevelAggregator;
use crate::config::Settings;
use crate::constants::audio::INTERVAL_MS;
use crate::encoding::SampleEncoding;
use crate::error::AppResult;
use crate::fade::{EvaluationClock, FadeCommand, FadeController};
use crate::history::LevelHistory;
use crate::mixer::{MixerClient, MixerTarget};
use crate::state::{EngineSnapshot, SharedSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Requests sent to a running control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Switch fades between strip and bus, keeping the index
    ToggleTarget,
    Shutdown,
}

pub struct Engine<M> {
    aggregator: Arc<LevelAggregator>,
    history: LevelHistory,
    fade: FadeController,
    clock: EvaluationClock,
    target: MixerTarget,
    mixer: M,
    snapshot: SharedSnapshot,
    fade_deadline: Option<Instant>,
    last_command: Option<(MixerTarget, FadeCommand)>,
}

impl<M: MixerClient> Engine<M> {
    /// Validate calibration and build fresh state. Nothing is opened here.
    pub fn new(
        settings: &Settings,
        encoding: SampleEncoding,
        mixer: M,
        snapshot: SharedSnapshot,
    ) -> AppResult<Self> {
        settings.validate()?;
        let calibration = &settings.calibration;
        let fade = FadeController::new(
            calibration.threshold,
            calibration.return_to,
            calibration.fade_rate_per_minute,
        )?;

        let engine = Self {
            aggregator: Arc::new(LevelAggregator::new(encoding, calibration.db_correction)),
            history: LevelHistory::new(calibration.plot_length),
            fade,
            clock: EvaluationClock::new(calibration.evaluate_every),
            target: settings.mixer.target(),
            mixer,
            snapshot,
            fade_deadline: None,
            last_command: None,
        };
        engine.publish();
        Ok(engine)
    }

    /// Where capture callbacks deliver their block peaks
    pub fn sink(&self) -> Arc<LevelAggregator> {
        Arc::clone(&self.aggregator)
    }

    #[cfg(test)]
    pub fn history(&self) -> &LevelHistory {
        &self.history
    }

    #[cfg(test)]
    pub fn target(&self) -> MixerTarget {
        self.target
    }

    #[cfg(test)]
    pub fn mixer(&self) -> &M {
        &self.mixer
    }

    pub fn fade_deadline(&self) -> Option<Instant> {
        self.fade_deadline
    }

    pub fn toggle_target(&mut self) {
        self.target.kind = self.target.kind.toggled();
        tracing::info!(fade_target = %self.target, "fade target changed");
        self.publish();
    }

    /// One interval boundary: reduce, record, and check the threshold when due.
    ///
    /// Returns the fade command issued at this tick, if any.
    pub fn on_interval(&mut self) -> Option<FadeCommand> {
        let blocks = self.aggregator.pending();
        let instant_db = self.aggregator.reduce();
        self.history.push(instant_db);
        let (_, average_db) = self.history.last();
        tracing::debug!(blocks, instant_db, average_db, "interval");

        let mut issued = None;
        if !self.fade.is_fading() && self.clock.advance() {
            if let Some(command) = self.fade.evaluate(average_db) {
                tracing::warn!(
                    average_db,
                    threshold = self.fade.threshold(),
                    delta = command.delta,
                    duration_ms = command.duration_ms,
                    "loudness above threshold, fading {}",
                    self.target
                );
                // the wait starts regardless; the command was issued once, here
                if let Err(e) = self.mixer.apply_fade(self.target, command) {
                    tracing::error!("{}", e);
                }
                self.fade_deadline = Some(Instant::now() + command.duration());
                self.last_command = Some((self.target, command));
                issued = Some(command);
            }
        }

        self.publish();
        issued
    }

    /// The fade wait elapsed
    pub fn complete_fade(&mut self) {
        self.fade_deadline = None;
        if let Some(command) = self.fade.complete() {
            tracing::info!(delta = command.delta, "fade finished, evaluation resumed");
        }
        self.publish();
    }

    fn publish(&self) {
        let (instant_db, average_db) = self.history.last();
        let state = self.fade.state();
        self.snapshot.update(|s| {
            s.instant_db = instant_db;
            s.average_db = average_db;
            s.fade_active = state.is_active();
            s.seconds_until_next_evaluation = self.clock.seconds_until_next();
            s.pending_fade = match state {
                crate::fade::FadeState::Fading(command) => Some(command),
                crate::fade::FadeState::Idle => None,
            };
            s.last_command = self.last_command;
            s.instant.clear();
            s.instant.extend(self.history.instant());
            s.average.clear();
            s.average.extend(self.history.average());
        });
    }
}

/// Handle to a spawned control loop
pub struct EngineHandle<M> {
    commands: mpsc::UnboundedSender<EngineCommand>,
    task: JoinHandle<Engine<M>>,
}

impl<M: MixerClient + 'static> EngineHandle<M> {
    pub fn send(&self, command: EngineCommand) {
        // a closed channel means the loop already ended
        let _ = self.commands.send(command);
    }

    /// Stop the interval timer and drop any pending fade wait
    pub async fn shutdown(self) -> Option<Engine<M>> {
        self.send(EngineCommand::Shutdown);
        match self.task.await {
            Ok(engine) => Some(engine),
            Err(e) => {
                tracing::error!("engine task failed: {}", e);
                None
            }
        }
    }
}

/// Move the engine onto its own task and start ticking
pub fn spawn<M: MixerClient + 'static>(engine: Engine<M>) -> EngineHandle<M> {
    let (commands, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(engine, rx));
    EngineHandle { commands, task }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Control loop: one tick per interval, fade completion, commands
pub async fn run<M: MixerClient>(
    mut engine: Engine<M>,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
) -> Engine<M> {
    let period = Duration::from_millis(INTERVAL_MS);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("engine started");
    engine.snapshot.update(|s| s.running = true);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                engine.on_interval();
            }
            _ = wait_until(engine.fade_deadline()) => {
                engine.complete_fade();
            }
            command = commands.recv() => match command {
                Some(EngineCommand::ToggleTarget) => engine.toggle_target(),
                Some(EngineCommand::Shutdown) | None => break,
            },
        }
    }

    engine.snapshot.update(|s| s.running = false);
    tracing::info!("engine stopped");
    engine
}

/// Fresh idle snapshot sized for `settings`
pub fn idle_snapshot(settings: &Settings) -> EngineSnapshot {
    EngineSnapshot::idle(
        settings.calibration.plot_length,
        settings.calibration.evaluate_every.max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureSource;
    use crate::constants::audio::MIN_DB_LEVEL;
    use crate::error::AppError;
    use crate::mixer::TargetKind;

    #[derive(Default)]
    struct RecordingMixer {
        commands: Vec<(MixerTarget, FadeCommand)>,
        fail: bool,
    }

    impl MixerClient for RecordingMixer {
        fn apply_fade(&mut self, target: MixerTarget, command: FadeCommand) -> AppResult<()> {
            self.commands.push((target, command));
            if self.fail {
                Err(AppError::Mixer("unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Source that delivers nothing until told to
    struct ManualSource {
        sink: Option<Arc<LevelAggregator>>,
        refuse: bool,
    }

    impl CaptureSource for ManualSource {
        fn name(&self) -> String {
            "manual".to_string()
        }

        fn encoding(&self) -> SampleEncoding {
            SampleEncoding::Float32
        }

        fn start(&mut self, sink: Arc<LevelAggregator>) -> AppResult<()> {
            if self.refuse {
                return Err(AppError::DeviceOpen("device busy".to_string()));
            }
            self.sink = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            self.sink = None;
        }

        fn is_running(&self) -> bool {
            self.sink.is_some()
        }
    }

    fn settings(plot_length: usize) -> Settings {
        let mut settings = Settings::default();
        settings.calibration.threshold = -20.0;
        settings.calibration.return_to = -30.0;
        settings.calibration.fade_rate_per_minute = 6.0;
        settings.calibration.plot_length = plot_length;
        settings
    }

    fn engine(settings: &Settings) -> Engine<RecordingMixer> {
        let snapshot = SharedSnapshot::new(idle_snapshot(settings));
        Engine::new(settings, SampleEncoding::Float32, RecordingMixer::default(), snapshot).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn loud_interval_issues_one_fade() {
        let mut engine = engine(&settings(1));
        engine.sink().on_block(1.0);

        let command = engine.on_interval().unwrap();
        // average 0 dB, floor(-30 - 0) = -30 over 5 minutes
        assert_eq!(command, FadeCommand { delta: -30, duration_ms: 300_000 });
        assert_eq!(engine.mixer().commands.len(), 1);
        assert_eq!(engine.mixer().commands[0].0, MixerTarget { kind: TargetKind::Strip, index: 0 });

        engine.sink().on_block(1.0);
        assert_eq!(engine.on_interval(), None);
        assert_eq!(engine.mixer().commands.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_then_full_scale_is_recorded() {
        let mut settings = settings(4);
        settings.calibration.db_correction = 3.0;
        settings.calibration.threshold = 50.0;
        let mut engine = engine(&settings);

        engine.on_interval();
        engine.sink().on_block(1.0);
        engine.on_interval();

        let tail: Vec<f64> = engine.history().instant().skip(2).collect();
        assert_eq!(tail[0], MIN_DB_LEVEL);
        assert!((tail[1] - 3.0).abs() < 1e-9);
        assert!(engine.mixer().commands.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn mixer_failure_still_suppresses_evaluation() {
        let settings = settings(1);
        let snapshot = SharedSnapshot::new(idle_snapshot(&settings));
        let mixer = RecordingMixer { fail: true, ..Default::default() };
        let mut engine = Engine::new(&settings, SampleEncoding::Float32, mixer, snapshot.clone()).unwrap();

        engine.sink().on_block(1.0);
        assert!(engine.on_interval().is_some());
        assert!(snapshot.read().fade_active);
        assert!(engine.fade_deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_follows_the_engine() {
        let mut settings = settings(3);
        settings.calibration.evaluate_every = 3;
        let snapshot = SharedSnapshot::new(idle_snapshot(&settings));
        let mut engine =
            Engine::new(&settings, SampleEncoding::Float32, RecordingMixer::default(), snapshot.clone()).unwrap();

        assert_eq!(snapshot.read().seconds_until_next_evaluation, 3);
        engine.sink().on_block(0.1);
        engine.on_interval();

        let read = snapshot.read();
        assert!((read.instant_db + 20.0).abs() < 1e-5);
        assert_eq!(read.instant.len(), 3);
        assert_eq!(read.average.len(), 3);
        assert_eq!(read.seconds_until_next_evaluation, 2);
        assert!(!read.fade_active);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_calibration_is_rejected_before_start() {
        let mut settings = settings(3);
        settings.calibration.fade_rate_per_minute = 0.0;
        let snapshot = SharedSnapshot::new(idle_snapshot(&settings));
        let result = Engine::new(&settings, SampleEncoding::Float32, RecordingMixer::default(), snapshot);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn control_loop_resumes_after_fade_duration() {
        let mut settings = settings(1);
        // 10 dB at 600 dB/min takes one second
        settings.calibration.return_to = -10.0;
        settings.calibration.fade_rate_per_minute = 600.0;
        let snapshot = SharedSnapshot::new(idle_snapshot(&settings));
        let engine =
            Engine::new(&settings, SampleEncoding::Float32, RecordingMixer::default(), snapshot.clone()).unwrap();
        let sink = engine.sink();
        let handle = spawn(engine);

        sink.on_block(1.0);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let read = snapshot.read();
        assert!(read.running);
        assert!(read.fade_active);
        assert_eq!(read.pending_fade, Some(FadeCommand { delta: -10, duration_ms: 1_000 }));

        // fade ends at ~2.0 s; the tick at 2.0 s may land either side of it
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!snapshot.read().fade_active);

        let engine = handle.shutdown().await.unwrap();
        assert!(!snapshot.read().running);
        assert_eq!(engine.mixer().commands.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_and_shutdown_through_the_handle() {
        let settings = settings(2);
        let snapshot = SharedSnapshot::new(idle_snapshot(&settings));
        let engine =
            Engine::new(&settings, SampleEncoding::Float32, RecordingMixer::default(), snapshot).unwrap();
        let handle = spawn(engine);
        handle.send(EngineCommand::ToggleTarget);
        let engine = handle.shutdown().await.unwrap();
        assert_eq!(engine.target().kind, TargetKind::Bus);
    }

    #[tokio::test(start_paused = true)]
    async fn start_then_stop_leaves_history_untouched() {
        let settings = settings(5);
        let engine = engine(&settings);
        let mut source = ManualSource { sink: None, refuse: false };

        source.start(engine.sink()).unwrap();
        assert!(source.is_running());
        source.stop();
        source.stop();
        assert!(!source.is_running());

        assert!(engine.history().instant().all(|v| v == MIN_DB_LEVEL));
        assert!(engine.history().average().all(|v| v == MIN_DB_LEVEL));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_device_reports_and_stays_stopped() {
        let settings = settings(5);
        let engine = engine(&settings);
        let mut source = ManualSource { sink: None, refuse: true };

        let err = source.start(engine.sink()).unwrap_err();
        assert!(matches!(err, AppError::DeviceOpen(_)));
        assert!(!source.is_running());
        assert_eq!(engine.sink().pending(), 0);
    }
}
