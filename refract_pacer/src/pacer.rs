//! The frame pacer.
//!
//! The front-end drives the producer-side lifecycle directly:
//! [`start_frame`](FramePacer::start_frame) before translating a frame,
//! [`on_submit_present`](FramePacer::on_submit_present) once the frame's
//! translation is done, [`end_frame`](FramePacer::end_frame) once it reached
//! the screen. The worker-side events arrive through the
//! [`QueueEvents`] implementation the submission queue invokes.
//!
//! The front-end's `frame_id` is the authoritative monotonic counter; the
//! pacer groups `on_submit_present(frame_id)` and the preceding command
//! list submissions into the same frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use refract_queue::QueueEvents;

use crate::config::{resolve_frame_pace, resolve_low_latency_offset, FramePace, PacerOptions};
use crate::low_latency::LowLatencyMode;
use crate::markers::{LatencyMarkersReader, LatencyMarkersStorage};
use crate::mode::{MaxFrameLatencyMode, MinLatencyMode, PacerFences, PacerMode};
use crate::stats::{FrameStatsReader, FrameStatsStorage};
use crate::time::delta_us;
use crate::RESERVED_FRAME_IDS;

/// CPU/GPU synchronization manager for frame presentation.
pub struct FramePacer {
    storage: LatencyMarkersStorage,
    stats: FrameStatsStorage,
    fences: Arc<PacerFences>,
    mode: Box<dyn PacerMode>,
    pace: FramePace,

    /// Frame the producer most recently finished translating; command-list
    /// submissions on the submit worker belong to the frame after it.
    last_submit_frame_id: AtomicU64,
    /// Frame whose present most recently completed on the GPU; finish-side
    /// events belong to the frame after it.
    last_finished_frame_id: AtomicU64,
}

impl FramePacer {
    pub fn new(options: &PacerOptions) -> Self {
        let pace = resolve_frame_pace(options);
        let fences = Arc::new(PacerFences::new());

        let mode: Box<dyn PacerMode> = match pace {
            FramePace::MaxFrameLatency => {
                info!("frame pace: max-frame-latency");
                Box::new(MaxFrameLatencyMode::new(Arc::clone(&fences)))
            }
            FramePace::LowLatency => {
                let offset = resolve_low_latency_offset(options);
                info!("frame pace: low-latency (offset {} us)", offset);
                Box::new(LowLatencyMode::new(Arc::clone(&fences), offset))
            }
            FramePace::MinLatency => {
                info!("frame pace: min-latency");
                Box::new(MinLatencyMode::new(Arc::clone(&fences)))
            }
        };

        Self {
            storage: LatencyMarkersStorage::new(),
            stats: FrameStatsStorage::new(),
            fences,
            mode,
            pace,
            last_submit_frame_id: AtomicU64::new(RESERVED_FRAME_IDS),
            last_finished_frame_id: AtomicU64::new(RESERVED_FRAME_IDS),
        }
    }

    /// The resolved pacing mode.
    #[inline]
    pub fn pace(&self) -> FramePace {
        self.pace
    }

    /// The latency markers storage.
    #[inline]
    pub fn markers(&self) -> &LatencyMarkersStorage {
        &self.storage
    }

    /// Cursor over the last `entries` finished frames' markers.
    pub fn markers_reader(&self, entries: u32) -> LatencyMarkersReader<'_> {
        self.storage.reader(entries)
    }

    /// Cursor over the last `entries` frames' statistics.
    pub fn stats_reader(&self, entries: u32) -> FrameStatsReader<'_> {
        self.stats.reader(entries)
    }

    /// Feed the fps-limit floor: the minimum interval between frame starts
    /// becomes `1 / frame_rate`. A non-positive rate disables the floor.
    pub fn set_target_frame_rate(&self, frame_rate: f64) {
        let interval_us = if frame_rate > 0.0 {
            (1_000_000.0 / frame_rate) as i32
        } else {
            0
        };
        self.fences.fps_limit_us.store(interval_us, Ordering::Relaxed);
    }

    /// Gate the start of `frame_id`'s CPU work.
    ///
    /// Waits for rendering of a previous frame (typically the one before
    /// last), then lets the active mode hold the thread some more if the
    /// CPU is running ahead of the pacing target.
    pub fn start_frame(&self, frame_id: u64) {
        self.mode.wait_ready(frame_id);
        self.mode.start_frame(&self.storage, frame_id);
        self.storage.register_frame_start(frame_id);
        self.stats.register_frame_start(frame_id);
    }

    /// The frame has been displayed to the screen.
    pub fn end_frame(&self, frame_id: u64) {
        self.storage.register_frame_end(frame_id);
        self.stats.register_frame_end(frame_id);
    }

    /// Translation of `frame_id` is finished; subsequent command-list
    /// submissions belong to the next frame.
    pub fn on_submit_present(&self, frame_id: u64) {
        let now = Instant::now();
        self.last_submit_frame_id.store(frame_id, Ordering::Release);

        // SAFETY: cpu-side fields of this frame are owned by the producer
        // thread calling this hook.
        let markers = unsafe { self.storage.markers_mut(frame_id) };
        markers.cpu_finished = delta_us(markers.start, now) as i32;
        self.storage
            .timeline()
            .cpu_finished
            .store(frame_id, Ordering::Release);

        // SAFETY: the next frame's gpu_submit sequence is reset here,
        // before the submit worker can append to it.
        let next = unsafe { self.storage.markers_mut(frame_id + 1) };
        next.gpu_submit.clear();

        self.stats.register_cpu_finished(frame_id);
    }
}

impl QueueEvents for FramePacer {
    fn on_submit_cmdlist(&self) {
        let frame_id = self.last_submit_frame_id.load(Ordering::Acquire) + 1;

        // SAFETY: gpu_submit is appended only by the submit worker.
        let markers = unsafe { self.storage.markers_mut(frame_id) };
        markers.gpu_submit.push(Instant::now());
    }

    fn on_finish_cmdlist(&self) {
        let now = Instant::now();
        let frame_id = self.last_finished_frame_id.load(Ordering::Acquire) + 1;

        // SAFETY: gpu-side fields are owned by the finish worker.
        let markers = unsafe { self.storage.markers_mut(frame_id) };
        markers.gpu_run.push(now);

        if markers.gpu_run.len() == 1 {
            markers.gpu_start = delta_us(markers.start, now) as i32;
            self.storage
                .timeline()
                .gpu_start
                .store(frame_id, Ordering::Release);
            self.fences.gpu_start.signal(frame_id);
        }
    }

    fn on_finish_gpu_activity(&self) {
        let now = Instant::now();
        let frame_id = self.last_finished_frame_id.load(Ordering::Acquire) + 1;

        // SAFETY: gpu-side fields are owned by the finish worker.
        let markers = unsafe { self.storage.markers_mut(frame_id) };
        markers.gpu_ready.push(now);
        markers.gpu_last_active = now;
    }

    fn on_finish_present(&self, frame_id: u64) {
        // Repeated presents of an unchanged frame report id zero.
        if frame_id == 0 {
            return;
        }

        self.last_finished_frame_id.store(frame_id, Ordering::Release);

        // SAFETY: gpu-side fields are owned by the finish worker; the two
        // references address distinct ring cells.
        let markers = unsafe { self.storage.markers_mut(frame_id) };
        let next = unsafe { self.storage.markers_mut(frame_id + 1) };

        markers.gpu_finished = delta_us(markers.start, markers.gpu_last_active) as i32;
        next.gpu_run.clear();
        next.gpu_ready.clear();
        next.gpu_ready.push(markers.gpu_last_active);

        if markers.gpu_run.is_empty() {
            // The frame presented without any command list reaching the
            // GPU; its gpu interval collapses to empty.
            markers.gpu_start = 0;
            markers.gpu_finished = 0;
            self.storage
                .timeline()
                .gpu_start
                .store(frame_id, Ordering::Release);
            self.fences.gpu_start.signal(frame_id);
        }

        self.storage
            .timeline()
            .gpu_finished
            .store(frame_id, Ordering::Release);
        self.fences.gpu_finished.signal(frame_id);

        self.stats.register_gpu_finished(frame_id);
    }
}

// =============================================================================
// Tests
// =============================================================================
