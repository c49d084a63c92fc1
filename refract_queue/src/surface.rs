//! GPU surface traits.
//!
//! The submission queue never talks to a graphics API directly; the device,
//! its command lists and the swap-chain presenter are injected behind these
//! traits. Implementations are internally synchronized: the queue calls them
//! from its worker threads while front-end threads hold their own references.

use std::sync::Arc;

use crate::result::GpuResult;

/// Swap-chain presentation mode requested for a present operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentMode {
    /// Vertical-sync bound, first-in first-out.
    Fifo,
    /// Like `Fifo`, but late frames tear instead of waiting a full interval.
    FifoRelaxed,
    /// Triple-buffered, latest frame wins.
    Mailbox,
    /// Unthrottled, may tear.
    Immediate,
}

/// A recorded batch of GPU commands, ready for submission.
pub trait CommandList: Send + Sync {
    /// Issue the command list to the device queue.
    fn submit(&self) -> GpuResult;

    /// Block until the GPU has finished executing the command list.
    fn synchronize_fence(&self) -> GpuResult;

    /// Release the resources referenced by the command list and wake any
    /// thread sleeping on one of them.
    fn notify_objects(&self);

    /// Reset the command list for re-recording.
    fn reset(&self);
}

/// The swap-chain binding of one window surface.
pub trait Presenter: Send + Sync {
    /// Queue the current swap-chain image for presentation.
    fn present_image(&self, mode: PresentMode, frame_id: u64) -> GpuResult;

    /// Notify the presenter that the present attempt for `frame_id`
    /// completed with `result`.
    fn signal_frame(&self, result: GpuResult, mode: PresentMode, frame_id: u64);
}

/// The device-level services the submission queue relies on.
pub trait GpuDevice: Send + Sync {
    /// Block until the device queue has drained all submitted work.
    fn wait_for_idle(&self);

    /// Hand a reset command list back to the device's recycler.
    fn recycle_command_list(&self, cmd_list: Arc<dyn CommandList>);
}
