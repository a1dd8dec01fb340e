//! Boundary to the external mixer that applies fades

use crate::error::AppResult;
use crate::fade::FadeCommand;
use serde::{Deserialize, Serialize};

/// Kind of mixer channel a fade is aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Strip,
    Bus,
}

impl TargetKind {
    pub fn toggled(self) -> Self {
        match self {
            TargetKind::Strip => TargetKind::Bus,
            TargetKind::Bus => TargetKind::Strip,
        }
    }
}

/// A strip or bus addressed by index, passed through untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerTarget {
    pub kind: TargetKind,
    pub index: u32,
}

impl std::fmt::Display for MixerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            TargetKind::Strip => "Strip",
            TargetKind::Bus => "Bus",
        };
        write!(f, "{}[{}]", kind, self.index)
    }
}

/// Render a fade as a remote-script line, e.g. `Bus[2].FadeBy = (-20, 200000);`
pub fn script_line(target: MixerTarget, command: FadeCommand) -> String {
    format!("{}.FadeBy = ({}, {});", target, command.delta, command.duration_ms)
}

/// Anything able to ramp a mixer channel's gain
pub trait MixerClient: Send {
    fn apply_fade(&mut self, target: MixerTarget, command: FadeCommand) -> AppResult<()>;
}

/// Logs every command instead of sending it anywhere
#[derive(Debug, Default)]
pub struct DryRunMixer {
    last: Option<String>,
}

impl DryRunMixer {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn last_line(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

impl MixerClient for DryRunMixer {
    fn apply_fade(&mut self, target: MixerTarget, command: FadeCommand) -> AppResult<()> {
        let line = script_line(target, command);
        tracing::info!(fade_target = %target, delta = command.delta, duration_ms = command.duration_ms, "dry run: {}", line);
        self.last = Some(line);
        Ok(())
    }
}

impl<M: MixerClient + ?Sized> MixerClient for Box<M> {
    fn apply_fade(&mut self, target: MixerTarget, command: FadeCommand) -> AppResult<()> {
        (**self).apply_fade(target, command)
    }
}
