//! Per-frame statistics ring.
//!
//! A coarse companion to the latency markers: one [`FrameStats`] record per
//! presented frame, kept in a 512-entry ring indexed `present_id % 512` and
//! published through a single producer index. Consumers poll with a
//! [`FrameStatsReader`] cursor; the ring is sized so a periodic reader never
//! falls behind the producer.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::time::delta_us;

/// Number of records in the statistics ring.
pub const STATS_RING_SIZE: usize = 512;

/// Durations above this are first-frame garbage and clamp to zero.
const GARBAGE_DURATION_US: i64 = 100_000_000;

/// Wall-clock milestones of one presented frame, in microseconds from the
/// frame start (except `frametime`, measured end to end between frames).
#[derive(Clone, Copy)]
pub struct FrameStats {
    pub frametime: u32,
    pub cpu_finished: u32,
    pub gpu_finished: u32,
    pub presented: u32,

    pub start: Instant,
    pub end: Instant,

    pub present_id: u64,
}

impl FrameStats {
    fn new(epoch: Instant) -> Self {
        Self {
            frametime: 0,
            cpu_finished: 0,
            gpu_finished: 0,
            presented: 0,
            start: epoch,
            end: epoch,
            present_id: 0,
        }
    }
}

#[inline]
fn duration_us(from: Instant, to: Instant) -> u32 {
    let us = delta_us(from, to);
    if !(0..GARBAGE_DURATION_US).contains(&us) {
        return 0;
    }
    us as u32
}

/// Ring storage for [`FrameStats`].
///
/// Writes follow the same single-writer-per-field protocol as the latency
/// markers: the producer thread owns the cpu-side fields, the finish worker
/// owns `gpu_finished`. A record becomes visible to readers when the
/// producer index passes its present id.
pub struct FrameStatsStorage {
    stats: Box<[UnsafeCell<FrameStats>]>,
    producer_index: AtomicU64,
}

// SAFETY: each field is written by one thread and read only at indices the
// producer index has passed, which the release store publishes.
unsafe impl Sync for FrameStatsStorage {}
unsafe impl Send for FrameStatsStorage {}

impl FrameStatsStorage {
    pub fn new() -> Self {
        let epoch = Instant::now();
        let stats = (0..STATS_RING_SIZE)
            .map(|_| UnsafeCell::new(FrameStats::new(epoch)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            stats,
            producer_index: AtomicU64::new(0),
        }
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn stats_mut(&self, present_id: u64) -> &mut FrameStats {
        &mut *self.stats[present_id as usize % STATS_RING_SIZE].get()
    }

    pub fn register_frame_start(&self, present_id: u64) {
        let now = Instant::now();
        // SAFETY: cpu-side fields; producer thread only.
        let stats = unsafe { self.stats_mut(present_id) };
        stats.start = now;
        stats.present_id = present_id;
    }

    pub fn register_cpu_finished(&self, present_id: u64) {
        let now = Instant::now();
        // SAFETY: cpu-side fields; producer thread only.
        let stats = unsafe { self.stats_mut(present_id) };
        stats.cpu_finished = duration_us(stats.start, now);
    }

    pub fn register_gpu_finished(&self, present_id: u64) {
        let now = Instant::now();
        // SAFETY: `gpu_finished` is owned by the finish worker.
        let stats = unsafe { self.stats_mut(present_id) };
        stats.gpu_finished = duration_us(stats.start, now);
    }

    pub fn register_frame_end(&self, present_id: u64) {
        let now = Instant::now();
        // SAFETY: cpu-side fields; producer thread only.
        let stats = unsafe { self.stats_mut(present_id) };
        stats.presented = duration_us(stats.start, now);
        stats.end = now;

        let previous_end = unsafe { self.stats_mut(present_id.wrapping_sub(1)) }.end;
        stats.frametime = duration_us(previous_end, now);

        self.producer_index.store(present_id, Ordering::Release);
    }

    /// Cursor over (at most) the last `entries` published records.
    pub fn reader(&self, entries: u32) -> FrameStatsReader<'_> {
        FrameStatsReader::new(self, entries)
    }
}

impl Default for FrameStatsStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor over published [`FrameStats`] records, oldest first.
pub struct FrameStatsReader<'a> {
    storage: &'a FrameStatsStorage,
    index: u64,
}

impl<'a> FrameStatsReader<'a> {
    fn new(storage: &'a FrameStatsStorage, entries: u32) -> Self {
        let produced = storage.producer_index.load(Ordering::Acquire);
        let mut index = 0;
        if produced > u64::from(entries) {
            index = produced - u64::from(entries);
        }
        Self { storage, index }
    }

    /// Number of records the cursor has not yet returned.
    pub fn remaining(&self) -> u64 {
        self.storage
            .producer_index
            .load(Ordering::Acquire)
            .saturating_sub(self.index)
    }
}

impl<'a> Iterator for FrameStatsReader<'a> {
    type Item = FrameStats;

    fn next(&mut self) -> Option<Self::Item> {
        let produced = self.storage.producer_index.load(Ordering::Acquire);
        if self.index >= produced {
            return None;
        }

        self.index += 1;
        // SAFETY: the producer index has passed `self.index`; the record
        // was fully written before the release store that published it.
        Some(*unsafe { self.storage.stats_mut(self.index) })
    }
}

// =============================================================================
// Tests
// =============================================================================
