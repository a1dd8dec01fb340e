//! Main application logic and orchestration

use crate::capture::{self, CaptureSource};
use crate::config::{MixerSettings, Settings};
use crate::constants::{audio, ui as ui_constants};
use crate::engine::{self, Engine, EngineCommand, EngineHandle};
use crate::error::{AppError, AppResult};
use crate::mixer::{DryRunMixer, MixerClient};
use crate::state::SharedSnapshot;
use crate::ui;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Exit codes for the application
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Success = 0,
    UserExit = 1, // User pressed Escape or Ctrl+C
    Error = 2,    // Actual application error
}

/// Extended result that tracks exit reason
pub struct RunResult {
    pub result: AppResult<()>,
    pub exit_code: ExitCode,
}

/// A started capture source feeding a running engine
pub struct Session {
    source: Box<dyn CaptureSource>,
    handle: EngineHandle<Box<dyn MixerClient>>,
}

impl Session {
    /// Build the engine, open the device, then start the control loop.
    ///
    /// A device that fails to open leaves nothing running.
    pub fn start(settings: &Settings, snapshot: &SharedSnapshot) -> AppResult<Self> {
        let mut source = capture::open(&settings.capture);
        let mixer: Box<dyn MixerClient> = Box::new(DryRunMixer::new());
        let engine = Engine::new(settings, source.encoding(), mixer, snapshot.clone())?;

        source.start(engine.sink())?;
        snapshot.update(|s| s.last_error = None);

        Ok(Self {
            source,
            handle: engine::spawn(engine),
        })
    }

    pub fn device_name(&self) -> String {
        self.source.name()
    }

    pub fn send(&self, command: EngineCommand) {
        self.handle.send(command);
    }

    /// Capture first, then the timer
    pub async fn stop(mut self) {
        self.source.stop();
        self.handle.shutdown().await;
    }
}

/// Start a session, recording a recoverable failure in the snapshot instead of bailing
fn try_start(settings: &Settings, snapshot: &SharedSnapshot) -> AppResult<Option<Session>> {
    match Session::start(settings, snapshot) {
        Ok(session) => Ok(Some(session)),
        Err(e) if e.is_recoverable() => {
            tracing::error!("{}", e);
            snapshot.update(|s| s.last_error = Some(e.to_string()));
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Main application struct
pub struct App {
    settings: Settings,
    settings_path: Option<PathBuf>,
    initial_mixer: MixerSettings,
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
}

impl App {
    /// Initialize the application with validated settings.
    ///
    /// A bus/strip toggle is written back to `settings_path` on exit.
    pub fn new_with_settings(settings: Settings, settings_path: Option<PathBuf>) -> AppResult<Self> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        let initial_mixer = settings.mixer.clone();
        Ok(App {
            settings,
            settings_path,
            initial_mixer,
            terminal,
        })
    }

    /// Run the main application loop
    pub async fn run(mut self) -> RunResult {
        let snapshot = SharedSnapshot::new(engine::idle_snapshot(&self.settings));
        let mut session = match try_start(&self.settings, &snapshot) {
            Ok(session) => session,
            Err(e) => {
                let _ = self.cleanup();
                return RunResult {
                    result: Err(e),
                    exit_code: ExitCode::Error,
                };
            }
        };

        let mut interval = tokio::time::interval(Duration::from_millis(ui_constants::UPDATE_INTERVAL_MS));
        let mut exit_reason = ExitCode::Success;
        let mut result = Ok(());

        loop {
            let view = snapshot.read();
            let device_name = session
                .as_ref()
                .map(|s| s.device_name())
                .unwrap_or_else(|| "not running".to_string());
            let status = match &session {
                Some(_) => "Monitoring. Esc quit | r restart | b toggle bus/strip",
                None => "Stopped. r retry | Esc quit",
            };

            // Render UI
            if let Err(e) = self.terminal.draw(|f| {
                let ui_state = ui::UiState {
                    device_name: &device_name,
                    status,
                    snapshot: &view,
                    threshold_db: self.settings.calibration.threshold,
                    db_correction: self.settings.calibration.db_correction,
                    target: self.settings.mixer.target(),
                };
                ui::render_ui(f, &ui_state);
            }) {
                result = Err(AppError::from(e));
                exit_reason = ExitCode::Error;
                break;
            }

            let mut should_exit = false;

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    should_exit = true;
                    exit_reason = ExitCode::UserExit;
                }
                _ = interval.tick() => {}
            }

            // Drain pending key events
            while !should_exit && crossterm::event::poll(Duration::from_millis(0)).unwrap_or(false) {
                let key_event = match crossterm::event::read() {
                    Ok(Event::Key(key_event)) => key_event,
                    Ok(_) => continue,
                    Err(_) => break,
                };
                if key_event.kind != KeyEventKind::Press {
                    continue;
                }
                match key_event.code {
                    KeyCode::Esc => {
                        should_exit = true;
                        exit_reason = ExitCode::UserExit;
                    }
                    KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                        should_exit = true;
                        exit_reason = ExitCode::UserExit;
                    }
                    KeyCode::Char('b') => {
                        let target = &mut self.settings.mixer.target;
                        *target = target.toggled();
                        if let Some(session) = &session {
                            session.send(EngineCommand::ToggleTarget);
                        }
                    }
                    KeyCode::Char('r') => {
                        if let Some(running) = session.take() {
                            running.stop().await;
                        }
                        tokio::time::sleep(Duration::from_millis(ui_constants::RESTART_DELAY_MS)).await;
                        match try_start(&self.settings, &snapshot) {
                            Ok(started) => session = started,
                            Err(e) => {
                                result = Err(e);
                                exit_reason = ExitCode::Error;
                                should_exit = true;
                            }
                        }
                    }
                    _ => {}
                }
            }

            if should_exit {
                break;
            }
        }

        // Cleanup - ensure graceful exit
        if let Some(session) = session {
            session.stop().await;
        }
        let _ = self.cleanup(); // Ignore cleanup errors
        self.save_mixer();

        RunResult {
            result,
            exit_code: exit_reason,
        }
    }

    fn save_mixer(&self) {
        if self.settings.mixer == self.initial_mixer {
            return;
        }
        let Some(path) = &self.settings_path else {
            return;
        };
        match Settings::save_mixer(path, &self.settings.mixer) {
            Ok(()) => tracing::info!(fade_target = %self.settings.mixer.target(), "saved fade target"),
            Err(e) => tracing::error!("{}", e),
        }
    }

    /// Clean up terminal state
    fn cleanup(&mut self) -> AppResult<()> {
        disable_raw_mode()?;
        execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

/// Run the engine without a terminal UI, printing one status line per interval
pub async fn run_headless(settings: Settings) -> AppResult<()> {
    let snapshot = SharedSnapshot::new(engine::idle_snapshot(&settings));
    let session = Session::start(&settings, &snapshot)?;
    println!("Monitoring {}... Press Ctrl+C to stop.", session.device_name());

    let period = Duration::from_millis(audio::INTERVAL_MS);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(AppError::from),
            _ = ticker.tick() => println!("{}", ui::status_line(&snapshot.read())),
        }
    };

    session.stop().await;
    outcome
}
