//! Tracing subscriber setup
//!
//! The terminal UI owns stdout/stderr while it runs, so in that mode events
//! go to a log file instead.

use crate::error::AppResult;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Where log events are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File,
}

/// Path of the log file used while the terminal UI is active
pub fn log_file_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "levelguard")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
        .join("levelguard.log")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init(target: LogTarget) -> AppResult<()> {
    let registry = tracing_subscriber::registry().with(env_filter());
    let result = match target {
        LogTarget::Stderr => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogTarget::File => {
            let path = log_file_path();
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
        }
    };

    // a subscriber installed earlier (tests, embedding) stays in place
    if let Err(e) = result {
        tracing::debug!("logging already initialized: {}", e);
    }
    Ok(())
}
