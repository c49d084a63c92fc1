//! Worker-side event hooks.
//!
//! The frame pacer needs to timestamp the moments a command list is handed
//! to the GPU and the moments the GPU finishes with it. Those moments occur
//! on the submission queue's worker threads, so the queue reports them
//! through this trait. Every hook has a no-op default; each one is invoked
//! by exactly one worker thread.

/// Observer for submission pipeline events.
pub trait QueueEvents: Send + Sync {
    /// A command list was issued to the device queue.
    ///
    /// Called on the submit worker, after a successful submission.
    fn on_submit_cmdlist(&self) {}

    /// The GPU finished executing a command list.
    ///
    /// Called on the finish worker, after the fence wait.
    fn on_finish_cmdlist(&self) {}

    /// The command list's resources were released and dependent threads
    /// woken. Called on the finish worker, after `notify_objects`.
    fn on_finish_gpu_activity(&self) {}

    /// A present operation completed.
    ///
    /// Called on the finish worker. A `frame_id` of zero denotes a repeated
    /// present of an unchanged frame.
    fn on_finish_present(&self, frame_id: u64) {
        let _ = frame_id;
    }
}

/// Event sink that ignores everything.
pub struct NullEvents;

impl QueueEvents for NullEvents {}
