//! Latency-aware frame pacing.
//!
//! GPUs render frames asynchronously to the CPU-side translation work.
//! Aligning where the CPU begins each frame tunes the presentation's
//! latency and smoothness characteristics. The [`FramePacer`] records
//! timestamps at six points of a frame's lifecycle into a lock-free ring of
//! [`LatencyMarkers`], and its active pacing mode reads them back to decide
//! how long `start_frame` should hold the calling thread.
//!
//! The pacer plugs into the submission queue as its
//! [`QueueEvents`](refract_queue::QueueEvents) sink for the worker-side
//! events; the front-end calls `start_frame`, `end_frame` and
//! `on_submit_present` directly and owns the monotonic frame id.

pub mod config;
mod low_latency;
pub mod markers;
mod mode;
pub mod pacer;
pub mod stats;
mod time;

pub use config::{FramePace, PacerOptions};
pub use markers::{LatencyMarkers, LatencyMarkersReader, LatencyMarkersStorage, LatencyTimeline};
pub use pacer::FramePacer;
pub use stats::{FrameStats, FrameStatsReader, FrameStatsStorage};

/// Frame ids at or below this value are reserved; producers number their
/// frames starting at `RESERVED_FRAME_IDS + 1`. The reserve mirrors the
/// maximum number of swap-chain buffers a front-end may queue, so early
/// frames never index backwards past the ring origin.
pub const RESERVED_FRAME_IDS: u64 = 16;
