//! Low-latency frame pacing.
//!
//! This mode reduces input latency with minimal fps impact. It is most
//! effective in the GPU limit and remains efficient in the CPU limit, and
//! it keeps input lag stable when GPU running times swing, for example
//! while rotating through a scene.
//!
//! The idea: estimate when this frame's GPU work would finish if the CPU
//! started right now, compare against the target finishing time derived
//! from recent frames, and sleep the difference at `start_frame`. GPU
//! running times are smoothed over a window because they are steady to
//! begin with; CPU times intentionally are not, as last-frame-only gave the
//! best results in playtesting.
//!
//! Tuned for variable-refresh displays and immediate-style present modes.
//! The `low_latency_offset` knob shifts the computed delay to trade latency
//! against smoothness.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use refract_sync::sleep;

use crate::markers::LatencyMarkersStorage;
use crate::mode::{PacerFences, PacerMode, ADAPTIVE_PRE_WAIT};
use crate::time::delta_us;
use crate::RESERVED_FRAME_IDS;

/// Safety valve against pathological predictions, in microseconds.
const MAX_DELAY_US: i64 = 20_000;

/// Frames of history in the GPU-time mean.
const GPU_TIME_WINDOW: u64 = 7;

pub(crate) struct LowLatencyMode {
    fences: Arc<PacerFences>,
    offset_us: i32,
    last_start: Mutex<Instant>,
}

impl LowLatencyMode {
    pub fn new(fences: Arc<PacerFences>, offset_us: i32) -> Self {
        Self {
            fences,
            offset_us,
            last_start: Mutex::new(Instant::now()),
        }
    }

    /// Mean GPU running time over the last [`GPU_TIME_WINDOW`] finished
    /// frames, or zero while history is insufficient.
    fn gpu_time_prediction(&self, storage: &LatencyMarkersStorage) -> i32 {
        let mut id = storage.timeline().gpu_finished.load(Ordering::Acquire);
        if id < RESERVED_FRAME_IDS + GPU_TIME_WINDOW {
            return 0;
        }

        let mut total = 0i64;
        for _ in 0..GPU_TIME_WINDOW {
            let markers = storage.markers(id);
            total += i64::from(markers.gpu_finished - markers.gpu_start);
            id -= 1;
        }

        (total / GPU_TIME_WINDOW as i64) as i32
    }

    /// Compute the clamped start delay for `frame_id`, in microseconds.
    ///
    /// `now` is the sampled clock, `last_start` the previous frame's chosen
    /// start point. The caller must have waited the `gpu_start` fence for
    /// `frame_id - 1` so the markers read below are published.
    pub(crate) fn compute_delay(
        &self,
        storage: &LatencyMarkersStorage,
        frame_id: u64,
        now: Instant,
        last_start: Instant,
    ) -> i64 {
        let id = storage.timeline().gpu_finished.load(Ordering::Acquire);
        if id <= RESERVED_FRAME_IDS + 1 {
            return 0;
        }

        // The minimum of (gpu_ready - gpu_submit) over the most recent
        // completed frame is the earliest the GPU could pick up work given
        // the last pipeline state; note the difference may be negative. An
        // index counts only when all three sequences cover it.
        let markers = storage.markers(id);
        let samples = markers
            .gpu_ready
            .len()
            .min(markers.gpu_submit.len())
            .min(markers.gpu_run.len());
        if samples == 0 {
            return 0;
        }

        let mut best_index = 0;
        let mut best_diff = i64::MAX;
        for i in 0..samples {
            let diff = delta_us(markers.gpu_submit[i], markers.gpu_ready[i]);
            if diff < best_diff {
                best_diff = diff;
                best_index = i;
            }
        }

        // Estimate the target GPU finishing time for this frame, then walk
        // backwards to when the frame has to start. Times below are
        // microseconds relative to `now`.
        let gpu_time = i64::from(self.gpu_time_prediction(storage));
        let previous = storage.markers(frame_id - 1);

        let mut target_gpu_finish = delta_us(now, previous.start)
            + i64::from(previous.gpu_start)
            + 2 * gpu_time;

        if id == frame_id - 1 {
            target_gpu_finish =
                delta_us(now, markers.start) + i64::from(markers.gpu_finished) + gpu_time;
        }

        // Expected GPU tail after the chosen submit point.
        let gpu_tail = delta_us(markers.gpu_run[best_index], markers.gpu_last_active);
        let target_gpu_sync = target_gpu_finish - gpu_tail;

        let mut delay = target_gpu_sync
            - delta_us(markers.start, markers.gpu_submit[best_index])
            + i64::from(self.offset_us);

        // Respect the fps limit floor, then the safety ceiling.
        let frametime = delta_us(last_start, now);
        let frametime_diff =
            (i64::from(self.fences.fps_limit_us.load(Ordering::Relaxed)) - frametime).max(0);
        delay = delay.max(frametime_diff);

        delay.clamp(0, MAX_DELAY_US)
    }
}

impl PacerMode for LowLatencyMode {
    fn wait_ready(&self, frame_id: u64) {
        self.fences
            .gpu_finished
            .wait(frame_id.saturating_sub(ADAPTIVE_PRE_WAIT));
    }

    fn start_frame(&self, storage: &LatencyMarkersStorage, frame_id: u64) {
        // Guarantees the previous frame's gpu_start marker is published.
        self.fences.gpu_start.wait(frame_id.saturating_sub(1));
        let now = Instant::now();

        let mut last_start = self.last_start.lock();
        let delay = self.compute_delay(storage, frame_id, now, *last_start);

        let next_start = now + Duration::from_micros(delay as u64);
        sleep::sleep_until(now, next_start);
        *last_start = next_start;
    }
}

// =============================================================================
// Tests
// =============================================================================
