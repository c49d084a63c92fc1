//! Pacing mode dispatch.
//!
//! Every mode shares two frame fences published by the pacer's finish-side
//! hooks: `gpu_start` advances when the GPU begins a frame's work,
//! `gpu_finished` when a frame's present completes on the GPU. A mode's
//! `wait_ready` gates the producer on `gpu_finished` at its chosen depth;
//! the low-latency mode then adds its computed delay in `start_frame`.

use std::sync::atomic::AtomicI32;
use std::sync::Arc;

use refract_sync::FrameFence;

use crate::markers::LatencyMarkersStorage;
use crate::RESERVED_FRAME_IDS;

/// Frames the CPU may run ahead in max-frame-latency mode. Matches the
/// swap-chain default on the D3D side.
pub(crate) const DEFAULT_MAX_FRAME_LATENCY: u64 = 3;

/// Coarse pre-wait depth for the adaptive modes: one frame beyond the
/// previous, so the one-before-last frame has left the GPU.
pub(crate) const ADAPTIVE_PRE_WAIT: u64 = 2;

/// Fences and knobs shared between the pacer and its active mode.
pub(crate) struct PacerFences {
    /// Reaches `f` once the GPU started executing frame `f`'s work.
    pub gpu_start: FrameFence,
    /// Reaches `f` once frame `f`'s present completed on the GPU.
    pub gpu_finished: FrameFence,
    /// Minimum frame interval in microseconds; zero disables the floor.
    pub fps_limit_us: AtomicI32,
}

impl PacerFences {
    pub fn new() -> Self {
        Self {
            gpu_start: FrameFence::new(RESERVED_FRAME_IDS),
            gpu_finished: FrameFence::new(RESERVED_FRAME_IDS),
            fps_limit_us: AtomicI32::new(0),
        }
    }
}

/// One frame pacing strategy.
pub(crate) trait PacerMode: Send + Sync {
    /// Gate the producer until enough previous frames have finished
    /// rendering.
    fn wait_ready(&self, frame_id: u64);

    /// Hold the producer some more if the CPU is running too far ahead.
    fn start_frame(&self, storage: &LatencyMarkersStorage, frame_id: u64) {
        let _ = (storage, frame_id);
    }
}

/// Classic swap-chain pacing: the CPU may queue up to `max_latency` frames.
pub(crate) struct MaxFrameLatencyMode {
    fences: Arc<PacerFences>,
    max_latency: u64,
}

impl MaxFrameLatencyMode {
    pub fn new(fences: Arc<PacerFences>) -> Self {
        Self {
            fences,
            max_latency: DEFAULT_MAX_FRAME_LATENCY,
        }
    }
}

impl PacerMode for MaxFrameLatencyMode {
    fn wait_ready(&self, frame_id: u64) {
        self.fences
            .gpu_finished
            .wait(frame_id.saturating_sub(self.max_latency));
    }
}

/// Fully serialized pacing: a frame starts only after the previous one has
/// finished on the GPU. Minimal latency, no CPU/GPU overlap.
pub(crate) struct MinLatencyMode {
    fences: Arc<PacerFences>,
}

impl MinLatencyMode {
    pub fn new(fences: Arc<PacerFences>) -> Self {
        Self { fences }
    }
}

impl PacerMode for MinLatencyMode {
    fn wait_ready(&self, frame_id: u64) {
        self.fences.gpu_finished.wait(frame_id.saturating_sub(1));
    }
}

// =============================================================================
// Tests
// =============================================================================
