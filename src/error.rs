//! Custom error types for the application

use thiserror::Error;

/// Application-specific error type
#[derive(Debug, Error)]
pub enum AppError {
    /// The device is unavailable or rejected the requested format.
    /// Recoverable: the engine stays stopped and the caller may retry.
    #[error("Device open error: {0}")]
    DeviceOpen(String),

    /// Invalid calibration or capture settings, rejected before start
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Audio stream related errors
    #[error("Audio stream error: {0}")]
    AudioStream(String),

    /// The external mixer refused or failed to take a command
    #[error("Mixer error: {0}")]
    Mixer(String),

    /// General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// True for failures that leave the engine restartable with the same settings
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AppError::DeviceOpen(_) | AppError::AudioStream(_) | AppError::Mixer(_))
    }
}

impl From<cpal::DevicesError> for AppError {
    fn from(err: cpal::DevicesError) -> Self {
        AppError::DeviceOpen(format!("Failed to enumerate devices: {}", err))
    }
}

impl From<cpal::DeviceNameError> for AppError {
    fn from(err: cpal::DeviceNameError) -> Self {
        AppError::DeviceOpen(format!("Failed to get device name: {}", err))
    }
}

impl From<cpal::HostUnavailable> for AppError {
    fn from(err: cpal::HostUnavailable) -> Self {
        AppError::DeviceOpen(format!("Audio host unavailable: {}", err))
    }
}

impl From<cpal::SupportedStreamConfigsError> for AppError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        AppError::DeviceOpen(format!("Failed to get supported stream configs: {}", err))
    }
}

impl From<cpal::DefaultStreamConfigError> for AppError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AppError::DeviceOpen(format!("Failed to get default stream config: {}", err))
    }
}

impl From<cpal::BuildStreamError> for AppError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AppError::DeviceOpen(format!("Failed to build audio stream: {}", err))
    }
}

impl From<cpal::PlayStreamError> for AppError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AppError::DeviceOpen(format!("Failed to start audio stream: {}", err))
    }
}

impl From<cpal::PauseStreamError> for AppError {
    fn from(err: cpal::PauseStreamError) -> Self {
        AppError::AudioStream(format!("Failed to pause audio stream: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Configuration(format!("Invalid settings file: {}", err))
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Configuration(format!("Cannot write settings: {}", err))
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
