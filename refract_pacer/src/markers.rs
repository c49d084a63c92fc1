//! Per-frame latency markers.
//!
//! A ring of 128 [`LatencyMarkers`] records, indexed `frame_id % 128`. The
//! simple modulo mapping relies on the producer advancing the frame id
//! monotonically by one and on no reader falling more than 128 frames
//! behind; the ring is sized so that never happens in practice.
//!
//! # Write/read protocol
//!
//! Each marker field has exactly one writing thread: the producer writes the
//! cpu-side fields, the submit worker appends `gpu_submit`, the finish
//! worker owns the gpu-side fields. Visibility to readers is published
//! through the [`LatencyTimeline`] counters: a thread that has observed
//! `timeline.x >= f` may read field `x` of frame `f`, and must not read it
//! before. The pacing modes additionally wait on a frame fence before
//! reading, which establishes the happens-before edge.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use smallvec::SmallVec;

use crate::time::delta_us;
use crate::RESERVED_FRAME_IDS;

/// Number of marker records in the ring.
pub const MARKER_RING_SIZE: usize = 128;

/// Timestamps and microsecond offsets for one frame.
///
/// The scalar offsets are microseconds relative to `start`. The three
/// sequences collect one entry per command-list event within the frame:
/// `gpu_submit` when a list is handed to the GPU, `gpu_run` when the GPU
/// finishes executing it, `gpu_ready` once its resources are released.
pub struct LatencyMarkers {
    pub start: Instant,
    pub end: Instant,

    pub cpu_finished: i32,
    pub gpu_start: i32,
    pub gpu_finished: i32,
    pub present_finished: i32,

    pub gpu_submit: SmallVec<[Instant; 8]>,
    pub gpu_run: SmallVec<[Instant; 8]>,
    pub gpu_ready: SmallVec<[Instant; 8]>,

    pub gpu_last_active: Instant,
}

impl LatencyMarkers {
    fn new(epoch: Instant) -> Self {
        Self {
            start: epoch,
            end: epoch,
            cpu_finished: 0,
            gpu_start: 0,
            gpu_finished: 0,
            present_finished: 0,
            gpu_submit: SmallVec::new(),
            gpu_run: SmallVec::new(),
            gpu_ready: SmallVec::new(),
            gpu_last_active: epoch,
        }
    }
}

/// Publication counters: which frame id each marker field is valid up to.
///
/// Every counter is advanced by the single thread that owns the
/// corresponding marker field, after the field is written.
#[derive(Default)]
pub struct LatencyTimeline {
    pub cpu_finished: AtomicU64,
    pub gpu_start: AtomicU64,
    pub gpu_finished: AtomicU64,
    pub frame_finished: AtomicU64,
}

/// Ring storage for [`LatencyMarkers`] plus the publication timeline.
pub struct LatencyMarkersStorage {
    markers: Box<[UnsafeCell<LatencyMarkers>]>,
    timeline: LatencyTimeline,
}

// SAFETY: every marker field is written by exactly one thread and read only
// after the reader observed the corresponding timeline counter (or waited a
// frame fence), which orders the accesses; see the module docs.
unsafe impl Sync for LatencyMarkersStorage {}
unsafe impl Send for LatencyMarkersStorage {}

impl LatencyMarkersStorage {
    pub fn new() -> Self {
        let epoch = Instant::now();
        let markers = (0..MARKER_RING_SIZE)
            .map(|_| UnsafeCell::new(LatencyMarkers::new(epoch)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            markers,
            timeline: LatencyTimeline::default(),
        }
    }

    /// The publication timeline.
    #[inline]
    pub fn timeline(&self) -> &LatencyTimeline {
        &self.timeline
    }

    /// Record the wall-clock start of `frame_id`.
    ///
    /// Repeated presents re-enter with an already-finished frame id; those
    /// calls are ignored.
    pub fn register_frame_start(&self, frame_id: u64) {
        if frame_id <= self.timeline.frame_finished.load(Ordering::Acquire) {
            return;
        }

        let now = Instant::now();
        // SAFETY: cpu-side fields of this frame are written only by the
        // producer thread calling this method.
        let markers = unsafe { self.markers_mut(frame_id) };
        markers.start = now;
    }

    /// Record that `frame_id` reached the screen; publishes
    /// `timeline.frame_finished`.
    pub fn register_frame_end(&self, frame_id: u64) {
        if frame_id <= self.timeline.frame_finished.load(Ordering::Acquire) {
            return;
        }

        let now = Instant::now();
        // SAFETY: as in `register_frame_start`.
        let markers = unsafe { self.markers_mut(frame_id) };
        markers.present_finished = delta_us(markers.start, now) as i32;
        markers.end = now;

        self.timeline
            .frame_finished
            .store(frame_id, Ordering::Release);
    }

    /// Shared view of one frame's markers.
    ///
    /// Callers must have observed the relevant timeline counter (or waited
    /// the corresponding frame fence) before reading a field; see the
    /// module docs.
    #[inline]
    pub fn markers(&self, frame_id: u64) -> &LatencyMarkers {
        // SAFETY: shared reads are ordered against the single writer by the
        // timeline protocol the caller upholds.
        unsafe { &*self.markers[frame_id as usize % MARKER_RING_SIZE].get() }
    }

    /// Exclusive view of one frame's markers.
    ///
    /// # Safety
    ///
    /// The caller must be the single thread that owns the fields it writes,
    /// and must not let the reference outlive its event-hook scope.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn markers_mut(&self, frame_id: u64) -> &mut LatencyMarkers {
        &mut *self.markers[frame_id as usize % MARKER_RING_SIZE].get()
    }

    /// Cursor over the markers of (at most) the last `entries` finished
    /// frames, oldest first.
    pub fn reader(&self, entries: u32) -> LatencyMarkersReader<'_> {
        LatencyMarkersReader::new(self, entries)
    }
}

impl Default for LatencyMarkersStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over recently finished frames' markers.
pub struct LatencyMarkersReader<'a> {
    storage: &'a LatencyMarkersStorage,
    index: u64,
}

impl<'a> LatencyMarkersReader<'a> {
    fn new(storage: &'a LatencyMarkersStorage, entries: u32) -> Self {
        let finished = storage
            .timeline
            .frame_finished
            .load(Ordering::Acquire);

        let mut index = 0;
        if finished > u64::from(entries) + RESERVED_FRAME_IDS {
            index = finished - u64::from(entries) + 1;
        }

        Self { storage, index }
    }
}

impl<'a> Iterator for LatencyMarkersReader<'a> {
    type Item = &'a LatencyMarkers;

    fn next(&mut self) -> Option<Self::Item> {
        let finished = self
            .storage
            .timeline
            .frame_finished
            .load(Ordering::Acquire);

        if self.index > finished {
            return None;
        }

        let markers = self.storage.markers(self.index);
        self.index += 1;
        Some(markers)
    }
}

// =============================================================================
// Tests
// =============================================================================
