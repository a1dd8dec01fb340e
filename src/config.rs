//! Configuration parsing and validation
//!
//! Settings come from a TOML file (optional) and are then overridden by
//! whatever was passed on the command line. Validation happens once, before
//! anything is opened, and never clamps a bad value into range.

use crate::capture::Backend;
use crate::constants::{audio, defaults};
use crate::encoding::SampleEncoding;
use crate::error::{AppError, AppResult};
use crate::mixer::{MixerTarget, TargetKind};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Command line arguments for the levelguard application
#[derive(Parser)]
#[command(name = "levelguard")]
#[command(about = "Loudness history and automatic mixer fades")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor loudness in the terminal UI and fade the mixer when needed
    Run(RunArgs),
    /// Same engine without a UI; levels and fades go to the log
    Headless(RunArgs),
    /// List capture devices of a backend and pick one
    List(ListArgs),
}

#[derive(Parser)]
pub struct RunArgs {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Parser)]
pub struct ListArgs {
    /// Backend whose devices are listed
    #[arg(long, value_enum, default_value_t = Backend::Default)]
    pub backend: Backend,
}

/// Per-field overrides of the settings file
#[derive(Parser, Default, Debug)]
pub struct Overrides {
    /// Capture backend
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Capture device name
    #[arg(long)]
    pub device: Option<String>,

    /// Capture device index, as printed by `list`
    #[arg(long)]
    pub device_index: Option<usize>,

    /// Sample rate in Hz (8000-192000)
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Channel count (1-8)
    #[arg(long)]
    pub channels: Option<u16>,

    /// Sample encoding requested from the device
    #[arg(long, value_enum)]
    pub encoding: Option<SampleEncoding>,

    /// Input channel measured by the ASIO backend, checked against the device at open
    #[arg(long)]
    pub channel_offset: Option<u16>,

    /// Added to every computed level, in dB
    #[arg(long, allow_negative_numbers = true)]
    pub db_correction: Option<f64>,

    /// Running average above this level triggers a fade, in dB
    #[arg(long, allow_negative_numbers = true)]
    pub threshold: Option<f64>,

    /// Level a fade aims for, in dB
    #[arg(long, allow_negative_numbers = true)]
    pub return_to: Option<f64>,

    /// Fade speed in dB per minute
    #[arg(long, allow_negative_numbers = true)]
    pub fade_rate: Option<f64>,

    /// Seconds of retained history
    #[arg(long)]
    pub plot_length: Option<usize>,

    /// Seconds between threshold checks
    #[arg(long)]
    pub evaluate_every: Option<u32>,

    /// Mixer channel kind to fade
    #[arg(long, value_enum)]
    pub target: Option<TargetKind>,

    /// Mixer channel index to fade
    #[arg(long)]
    pub target_index: Option<u32>,
}

/// Device and format the capture source is opened with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub backend: Backend,
    pub device: Option<String>,
    pub device_index: Option<usize>,
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
    pub channel_offset: u16,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Default,
            device: None,
            device_index: None,
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            encoding: SampleEncoding::Float32,
            channel_offset: 0,
        }
    }
}

/// Level calibration and fade behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub db_correction: f64,
    pub threshold: f64,
    pub return_to: f64,
    pub fade_rate_per_minute: f64,
    pub plot_length: usize,
    pub evaluate_every: u32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            db_correction: defaults::DB_CORRECTION,
            threshold: defaults::THRESHOLD_DB,
            return_to: defaults::RETURN_TO_DB,
            fade_rate_per_minute: defaults::FADE_RATE,
            plot_length: defaults::PLOT_LENGTH,
            evaluate_every: defaults::EVALUATE_EVERY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerSettings {
    pub target: TargetKind,
    pub index: u32,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            target: TargetKind::Strip,
            index: 0,
        }
    }
}

impl MixerSettings {
    pub fn target(&self) -> MixerTarget {
        MixerTarget {
            kind: self.target,
            index: self.index,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub calibration: Calibration,
    pub mixer: MixerSettings,
}

impl Settings {
    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// A missing default file means built-in defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let settings = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Write every section to `path`, creating its directory
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let content = toml::to_string(self)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "saved settings");
        Ok(())
    }

    /// Store a changed mixer selection, keeping the file's other sections as they are
    pub fn save_mixer(path: &Path, mixer: &MixerSettings) -> AppResult<()> {
        let mut settings = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        settings.mixer = mixer.clone();
        settings.save(path)
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "levelguard")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Settings for a run: file values, then CLI overrides, then validation
    pub fn resolve(args: RunArgs) -> AppResult<Self> {
        let mut settings = Self::load(args.config.as_deref())?;
        settings.apply(args.overrides);
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply(&mut self, o: Overrides) {
        let capture = &mut self.capture;
        if let Some(backend) = o.backend {
            capture.backend = backend;
        }
        if o.device.is_some() {
            capture.device = o.device;
        }
        if o.device_index.is_some() {
            capture.device_index = o.device_index;
        }
        if let Some(rate) = o.sample_rate {
            capture.sample_rate = rate;
        }
        if let Some(channels) = o.channels {
            capture.channels = channels;
        }
        if let Some(encoding) = o.encoding {
            capture.encoding = encoding;
        }
        if let Some(offset) = o.channel_offset {
            capture.channel_offset = offset;
        }

        let calibration = &mut self.calibration;
        if let Some(v) = o.db_correction {
            calibration.db_correction = v;
        }
        if let Some(v) = o.threshold {
            calibration.threshold = v;
        }
        if let Some(v) = o.return_to {
            calibration.return_to = v;
        }
        if let Some(v) = o.fade_rate {
            calibration.fade_rate_per_minute = v;
        }
        if let Some(v) = o.plot_length {
            calibration.plot_length = v;
        }
        if let Some(v) = o.evaluate_every {
            calibration.evaluate_every = v;
        }

        if let Some(kind) = o.target {
            self.mixer.target = kind;
        }
        if let Some(index) = o.target_index {
            self.mixer.index = index;
        }
    }

    /// Reject anything the engine cannot run with
    pub fn validate(&self) -> AppResult<()> {
        let capture = &self.capture;
        if !(audio::MIN_SAMPLE_RATE..=audio::MAX_SAMPLE_RATE).contains(&capture.sample_rate) {
            return Err(AppError::Configuration(format!(
                "Sample rate must be between {} and {} Hz, got {}",
                audio::MIN_SAMPLE_RATE,
                audio::MAX_SAMPLE_RATE,
                capture.sample_rate
            )));
        }
        if !(audio::MIN_CHANNELS..=audio::MAX_CHANNELS).contains(&capture.channels) {
            return Err(AppError::Configuration(format!(
                "Channels must be between {} and {}, got {}",
                audio::MIN_CHANNELS,
                audio::MAX_CHANNELS,
                capture.channels
            )));
        }

        let calibration = &self.calibration;
        let fade_rate = calibration.fade_rate_per_minute;
        if !fade_rate.is_finite() || fade_rate <= 0.0 {
            return Err(AppError::Configuration(format!(
                "Fade rate must be a positive number of dB per minute, got {}",
                fade_rate
            )));
        }
        for (name, value) in [
            ("Threshold", calibration.threshold),
            ("Return level", calibration.return_to),
            ("dB correction", calibration.db_correction),
        ] {
            if !value.is_finite() {
                return Err(AppError::Configuration(format!("{} must be finite", name)));
            }
        }
        if calibration.plot_length == 0 {
            return Err(AppError::Configuration(
                "Plot length must be at least one second".to_string(),
            ));
        }
        if calibration.evaluate_every == 0 {
            return Err(AppError::Configuration(
                "Evaluation period must be at least one second".to_string(),
            ));
        }

        Ok(())
    }
}
