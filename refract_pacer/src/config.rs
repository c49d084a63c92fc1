//! Pacer configuration.
//!
//! A single options record resolved once at pacer construction. Environment
//! variables take precedence over the options when present:
//! `DXVK_FRAME_PACE` selects the pacing mode, `DXVK_LOW_LATENCY_OFFSET`
//! overrides the low-latency offset (a zero from the environment counts as
//! an override).

use std::fmt;

/// Selected frame pacing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePace {
    /// Let the CPU run up to a fixed number of frames ahead.
    MaxFrameLatency,
    /// Delay frame starts so predicted GPU completion lands on a deadline.
    LowLatency,
    /// Serialize: never start a frame before the previous one finished.
    MinLatency,
}

impl FramePace {
    /// Match a configuration string. Substring matching keeps user configs
    /// forward compatible with suffixed values.
    fn from_config_str(value: &str) -> Option<Self> {
        if value.contains("max-frame-latency") {
            Some(FramePace::MaxFrameLatency)
        } else if value.contains("low-latency") {
            Some(FramePace::LowLatency)
        } else if value.contains("min-latency") {
            Some(FramePace::MinLatency)
        } else {
            None
        }
    }
}

impl fmt::Display for FramePace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramePace::MaxFrameLatency => "max-frame-latency",
            FramePace::LowLatency => "low-latency",
            FramePace::MinLatency => "min-latency",
        };
        f.write_str(name)
    }
}

/// Pacer options supplied by the host.
///
/// Immutable after construction; everything is resolved once when the
/// [`FramePacer`](crate::FramePacer) is created.
#[derive(Debug, Clone, Default)]
pub struct PacerOptions {
    /// Pacing mode configuration string; empty selects the default.
    pub frame_pace: String,

    /// Low-latency tuning offset in microseconds, clamped to
    /// `[-10000, 10000]`. Positive values trade latency for smoothness.
    pub low_latency_offset: i32,
}

/// Resolve the pacing mode: environment first, then options, then default.
pub(crate) fn resolve_frame_pace(options: &PacerOptions) -> FramePace {
    if let Ok(value) = std::env::var("DXVK_FRAME_PACE") {
        if let Some(pace) = FramePace::from_config_str(&value) {
            return pace;
        }
    }

    FramePace::from_config_str(&options.frame_pace).unwrap_or(FramePace::LowLatency)
}

/// Resolve the low-latency offset with the environment override applied.
pub(crate) fn resolve_low_latency_offset(options: &PacerOptions) -> i32 {
    let mut offset = options.low_latency_offset;

    if let Some(env_offset) = env_i32("DXVK_LOW_LATENCY_OFFSET") {
        offset = env_offset;
    }

    offset.clamp(-10_000, 10_000)
}

/// Parse an integer environment variable. Presence and value are separate
/// concerns here: a parsed zero is a real override.
fn env_i32(var: &str) -> Option<i32> {
    std::env::var(var).ok()?.trim().parse().ok()
}

// =============================================================================
// Tests
// =============================================================================
