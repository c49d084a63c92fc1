//! Asynchronous GPU command submission for the refract translation layer.
//!
//! The translation front-end produces command lists and present requests on
//! its own threads; the GPU wants them issued and fenced without stalling
//! those threads. This crate moves that work through a two-stage pipeline:
//!
//! ```text
//! producers ──▶ entry pool ──▶ submit queue ──▶ submit worker ──▶ GPU
//!                    ▲                               │
//!                    │                               ▼
//!                    └────────── finish worker ◀── finish queue
//! ```
//!
//! The submit worker issues command lists and presents to the device queue;
//! the finish worker waits on GPU fences, signals frame completion to the
//! presenter and recycles resources. Entries travel as pool-slot indices
//! through bounded lockfree rings, so the hot path never allocates and the
//! pool capacity doubles as the backpressure bound on in-flight work.
//!
//! The GPU itself is abstracted behind the [`surface`] traits; a frame pacer
//! or other observer can hook worker-side events via [`QueueEvents`].

pub mod events;
pub mod queue;
pub mod result;
pub mod ring;
pub mod surface;

pub use events::{NullEvents, QueueEvents};
pub use queue::{
    PresentInfo, QueueCallback, SubmissionQueue, SubmitInfo, SubmitStatus, MAX_QUEUED_SUBMISSIONS,
};
pub use result::{AtomicGpuResult, GpuResult};
pub use ring::RingQueue;
pub use surface::{CommandList, GpuDevice, PresentMode, Presenter};
