//! Application constants and configuration values

/// Audio processing constants
pub mod audio {
    /// Floor of every computed level, also the initial history value
    pub const MIN_DB_LEVEL: f64 = -60.0;
    /// Length of one sampling interval in milliseconds
    pub const INTERVAL_MS: u64 = 1000;
    /// Buffer size for audio streams
    pub const BUFFER_SIZE: cpal::BufferSize = cpal::BufferSize::Default;
    /// Accepted sample rates in Hz
    pub const MIN_SAMPLE_RATE: u32 = 8_000;
    pub const MAX_SAMPLE_RATE: u32 = 192_000;
    /// Accepted channel counts
    pub const MIN_CHANNELS: u16 = 1;
    pub const MAX_CHANNELS: u16 = 8;
    /// Pipe reads are sized to this many milliseconds of audio
    pub const PIPE_BLOCK_MS: u32 = 10;
}

/// Calibration defaults used when neither the settings file nor the CLI sets a value
pub mod defaults {
    pub const SAMPLE_RATE: u32 = 48_000;
    pub const CHANNELS: u16 = 2;
    pub const DB_CORRECTION: f64 = 0.0;
    pub const THRESHOLD_DB: f64 = -20.0;
    pub const RETURN_TO_DB: f64 = -30.0;
    /// dB per minute
    pub const FADE_RATE: f64 = 6.0;
    /// Seconds of retained history
    pub const PLOT_LENGTH: usize = 300;
    /// Seconds between threshold checks
    pub const EVALUATE_EVERY: u32 = 1;
}

/// UI display constants
pub mod ui {
    /// UI update interval in milliseconds
    pub const UPDATE_INTERVAL_MS: u64 = 50;
    /// Pause between stop and start when restarting from the UI
    pub const RESTART_DELAY_MS: u64 = 500;
}
