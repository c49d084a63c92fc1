//! The two-stage submission queue.
//!
//! Producers hand work to the *submit worker*, which issues it to the device
//! queue; successful entries move on to the *finish worker*, which waits on
//! the GPU fence, signals frame completion and recycles resources. Entries
//! are pool slots addressed by index; each index has exactly one owner at
//! any time: the pool, one of the two rings, or one of the workers.
//!
//! # Failure handling
//!
//! The queue ratchets through `healthy → transient error → device lost`:
//!
//! - A transient error (any non-success that is not a device loss) records
//!   itself in `last_error` and drains the device with `wait_for_idle` so
//!   the driver can recover, then the queue keeps accepting work.
//! - A device loss is terminal. Every further entry bypasses the GPU and is
//!   completed as lost, with no drain; drivers want the pipeline quiescent,
//!   not blocked.
//!
//! Present entries that fail with anything short of a device loss are still
//! forwarded to the finish worker: the presenter must receive its
//! `signal_frame` so the front-end's frame bookkeeping advances.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;
use tracing::error;

use refract_sync::{AtomicSignal, FixedPool};

use crate::events::QueueEvents;
use crate::result::{AtomicGpuResult, GpuResult};
use crate::ring::RingQueue;
use crate::surface::{CommandList, GpuDevice, PresentMode, Presenter};

/// Upper bound on queued submissions; pool and ring capacity alike.
pub const MAX_QUEUED_SUBMISSIONS: u32 = 32;

/// Invoked with `true` when the submit worker (or an external holder of the
/// device-queue lock) enters the queue, `false` when it leaves.
pub type QueueCallback = Box<dyn Fn(bool) + Send + Sync>;

// =============================================================================
// Submission records
// =============================================================================

/// Feedback cell for one `submit` or `present` call.
///
/// Starts out as `NotReady`; the submit worker publishes the GPU result
/// exactly once. Readable from any thread.
#[derive(Debug, Default)]
pub struct SubmitStatus {
    result: AtomicGpuResult,
}

impl SubmitStatus {
    pub fn new() -> Self {
        Self {
            result: AtomicGpuResult::new(GpuResult::NotReady),
        }
    }

    /// The published result, or `NotReady` while the submission is pending.
    #[inline]
    pub fn result(&self) -> GpuResult {
        self.result.load()
    }

    #[inline]
    pub(crate) fn set(&self, result: GpuResult) {
        self.result.store(result);
    }
}

/// Parameters of a command-list submission.
pub struct SubmitInfo {
    pub cmd_list: Arc<dyn CommandList>,
}

/// Parameters of a swap-chain present.
#[derive(Clone)]
pub struct PresentInfo {
    pub presenter: Arc<dyn Presenter>,
    pub mode: PresentMode,
    pub frame_id: u64,
}

/// One pool slot's worth of queued work.
///
/// Exactly one of `submit` and `present` is populated; the dispatch in both
/// workers is driven by which one it is.
#[derive(Default)]
struct SubmitEntry {
    result: GpuResult,
    status: Option<Arc<SubmitStatus>>,
    submit: Option<Arc<dyn CommandList>>,
    present: Option<PresentInfo>,
}

impl SubmitEntry {
    fn reset(&mut self) {
        *self = SubmitEntry::default();
    }
}

// =============================================================================
// Shared state
// =============================================================================

struct QueueShared {
    device: Arc<dyn GpuDevice>,
    events: Arc<dyn QueueEvents>,
    callback: Option<QueueCallback>,

    stopped: AtomicBool,
    last_error: AtomicGpuResult,
    gpu_idle_us: AtomicU64,

    /// Serializes submit-worker GPU calls with external
    /// `lock_device_queue` holders.
    queue_lock: RawMutex,

    pool: FixedPool<SubmitEntry>,
    submit_queue: RingQueue<u32>,
    finish_queue: RingQueue<u32>,

    append_sync: AtomicSignal,
    submit_sync: AtomicSignal,
    submit_empty: AtomicSignal,
    finish_filled: AtomicSignal,
    finish_empty: AtomicSignal,
    finish_sync: AtomicSignal,
}

impl QueueShared {
    /// Ratchet `last_error` forward; a device loss is never overwritten.
    fn set_last_error(&self, result: GpuResult) {
        if self.last_error.load() != GpuResult::DeviceLost {
            self.last_error.store(result);
        }
    }
}

// =============================================================================
// SubmissionQueue
// =============================================================================

/// Asynchronous two-stage GPU submission queue.
///
/// Dropping the queue stops both workers: pending entries are abandoned
/// best-effort and their status cells may remain `NotReady`.
pub struct SubmissionQueue {
    shared: Arc<QueueShared>,
    submit_thread: Option<JoinHandle<()>>,
    finish_thread: Option<JoinHandle<()>>,
}

impl SubmissionQueue {
    /// Create the queue and start its worker threads.
    ///
    /// `events` receives the worker-side pipeline events (a frame pacer,
    /// typically); pass [`NullEvents`](crate::events::NullEvents) when
    /// nothing listens. `callback` fires on both edges of every device-queue
    /// lock acquisition, including external ones via
    /// [`lock_device_queue`](Self::lock_device_queue).
    pub fn new(
        device: Arc<dyn GpuDevice>,
        events: Arc<dyn QueueEvents>,
        callback: Option<QueueCallback>,
    ) -> Self {
        let shared = Arc::new(QueueShared {
            device,
            events,
            callback,
            stopped: AtomicBool::new(false),
            last_error: AtomicGpuResult::new(GpuResult::Success),
            gpu_idle_us: AtomicU64::new(0),
            queue_lock: RawMutex::INIT,
            pool: FixedPool::new(MAX_QUEUED_SUBMISSIONS),
            submit_queue: RingQueue::new(MAX_QUEUED_SUBMISSIONS as usize),
            finish_queue: RingQueue::new(MAX_QUEUED_SUBMISSIONS as usize),
            append_sync: AtomicSignal::new("append_sync", false),
            submit_sync: AtomicSignal::new("submit_sync", false),
            submit_empty: AtomicSignal::new("submit_empty", true),
            finish_filled: AtomicSignal::new("finish_filled", false),
            finish_empty: AtomicSignal::new("finish_empty", true),
            finish_sync: AtomicSignal::new("finish_sync", false),
        });

        let submit_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("refract-submit".into())
                .spawn(move || submit_worker(&shared))
                .expect("failed to spawn submit worker")
        };

        let finish_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("refract-queue".into())
                .spawn(move || finish_worker(&shared))
                .expect("failed to spawn finish worker")
        };

        Self {
            shared,
            submit_thread: Some(submit_thread),
            finish_thread: Some(finish_thread),
        }
    }

    /// Queue a command list for asynchronous submission.
    ///
    /// Returns immediately; `status`, if given, is set to `NotReady` now and
    /// to the GPU result once the submit worker has issued the command list.
    pub fn submit(&self, info: SubmitInfo, status: Option<Arc<SubmitStatus>>) {
        if let Some(status) = &status {
            status.set(GpuResult::NotReady);
        }

        let index = self.shared.pool.acquire();
        // SAFETY: `acquire` grants exclusive ownership of the slot; it is
        // relinquished below when the index is published to the ring.
        let entry = unsafe { self.shared.pool.get(index) };
        entry.status = status;
        entry.submit = Some(info.cmd_list);

        self.publish(index);
    }

    /// Queue a swap-chain present. Same return semantics as
    /// [`submit`](Self::submit).
    pub fn present(&self, info: PresentInfo, status: Option<Arc<SubmitStatus>>) {
        if let Some(status) = &status {
            status.set(GpuResult::NotReady);
        }

        let index = self.shared.pool.acquire();
        // SAFETY: as in `submit`.
        let entry = unsafe { self.shared.pool.get(index) };
        entry.status = status;
        entry.present = Some(info);

        self.publish(index);
    }

    fn publish(&self, index: u32) {
        let pushed = self.shared.submit_queue.push(index).is_ok();
        debug_assert!(pushed, "submit ring capacity matches the entry pool");

        self.shared.submit_empty.clear();
        self.shared.append_sync.signal_one();
    }

    /// Block until `status` has a published result or the queue stops.
    pub fn synchronize_submission(&self, status: &SubmitStatus) {
        while status.result() == GpuResult::NotReady && !self.stopped() {
            self.shared.submit_sync.wait();
        }
    }

    /// Block until the submit queue is observed empty.
    pub fn synchronize(&self) {
        while !self.stopped() && self.shared.submit_queue.len_approx() > 0 {
            self.shared.submit_empty.wait();
        }
    }

    /// Block until both pipeline stages are observed empty.
    pub fn wait_for_idle(&self) {
        self.synchronize();

        while !self.stopped() && self.shared.finish_queue.len_approx() > 0 {
            self.shared.finish_empty.wait();
        }
    }

    /// Block until `pred` returns true, rechecking on every finish-worker
    /// wakeup. Useful to wait on GPU progress without busy-waiting.
    pub fn synchronize_until(&self, mut pred: impl FnMut() -> bool) {
        while !self.stopped() && !pred() {
            self.shared.finish_sync.wait();
        }
    }

    /// Lock the device queue, serializing external GPU submissions with the
    /// submit worker. Fires the queue callback with `true`.
    pub fn lock_device_queue(&self) {
        self.shared.queue_lock.lock();

        if let Some(callback) = &self.shared.callback {
            callback(true);
        }
    }

    /// Unlock the device queue. Fires the queue callback with `false`.
    pub fn unlock_device_queue(&self) {
        if let Some(callback) = &self.shared.callback {
            callback(false);
        }

        // SAFETY: callers pair this with a preceding `lock_device_queue`.
        unsafe { self.shared.queue_lock.unlock() };
    }

    /// Last asynchronous submission error, or `Success`.
    pub fn last_error(&self) -> GpuResult {
        self.shared.last_error.load()
    }

    /// Accumulated time the finish worker spent starved of completed work,
    /// in microseconds. Monotonically increasing; the host samples it
    /// periodically to derive GPU load.
    pub fn gpu_idle_ticks(&self) -> u64 {
        self.shared.gpu_idle_us.load(Ordering::Relaxed)
    }

    #[inline]
    fn stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }
}

impl Drop for SubmissionQueue {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);

        // Pulse every signal so both workers (and any external waiter)
        // observe the stop flag from whichever wait they are parked in.
        self.shared.finish_filled.signal_one();
        self.shared.finish_empty.signal_one();
        self.shared.submit_empty.signal_all();
        self.shared.append_sync.signal_one();
        self.shared.submit_sync.signal_all();
        self.shared.finish_sync.signal_all();

        // Workers must be gone before the pool and rings tear down.
        if let Some(thread) = self.submit_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.finish_thread.take() {
            let _ = thread.join();
        }
    }
}

// =============================================================================
// Submit worker
// =============================================================================

fn submit_worker(shared: &QueueShared) {
    loop {
        let Some(index) = dequeue_submit(shared) else {
            return;
        };

        // SAFETY: the producer relinquished the slot when it published the
        // index; the submit worker is the ring's sole consumer.
        let entry = unsafe { shared.pool.get(index) };

        if shared.last_error.load() != GpuResult::DeviceLost {
            shared.queue_lock.lock();

            if let Some(callback) = &shared.callback {
                callback(true);
            }

            entry.result = if let Some(cmd_list) = &entry.submit {
                let result = cmd_list.submit();
                if result == GpuResult::Success {
                    shared.events.on_submit_cmdlist();
                }
                result
            } else if let Some(present) = &entry.present {
                present.presenter.present_image(present.mode, present.frame_id)
            } else {
                GpuResult::Success
            };

            if let Some(callback) = &shared.callback {
                callback(false);
            }

            // SAFETY: locked above.
            unsafe { shared.queue_lock.unlock() };
        } else {
            // Don't submit anything after device loss so the driver gets a
            // chance to recover.
            entry.result = GpuResult::DeviceLost;
        }

        if let Some(status) = &entry.status {
            status.set(entry.result);
        }

        // Non-fatal present errors still reach the finish stage: the
        // presenter needs its signal_frame so the frame counter advances.
        let forward = entry.result == GpuResult::Success
            || (entry.present.is_some() && entry.result != GpuResult::DeviceLost);

        if forward {
            let pushed = shared.finish_queue.push(index).is_ok();
            debug_assert!(pushed, "finish ring capacity matches the entry pool");

            shared.finish_empty.clear();
            shared.finish_filled.signal_one();
        } else {
            error!("command submission failed: {}", entry.result);
            shared.set_last_error(entry.result);

            if entry.result != GpuResult::DeviceLost {
                // Drain in-flight work so the driver can recover.
                shared.device.wait_for_idle();
            }

            entry.reset();
            shared.pool.release(index);
        }

        if shared.submit_queue.len_approx() == 0 {
            shared.submit_empty.signal_all();
        }

        shared.submit_sync.signal_one();
    }
}

fn dequeue_submit(shared: &QueueShared) -> Option<u32> {
    loop {
        if shared.stopped.load(Ordering::Acquire) {
            return None;
        }
        if let Some(index) = shared.submit_queue.pop() {
            return Some(index);
        }
        shared.append_sync.wait();
    }
}

// =============================================================================
// Finish worker
// =============================================================================

fn finish_worker(shared: &QueueShared) {
    loop {
        let Some(index) = dequeue_finish(shared) else {
            return;
        };

        // SAFETY: the submit worker relinquished the slot when it forwarded
        // the index; the finish worker is the ring's sole consumer.
        let entry = unsafe { shared.pool.get(index) };

        if let Some(cmd_list) = &entry.submit {
            let mut status = shared.last_error.load();

            if status != GpuResult::DeviceLost {
                status = cmd_list.synchronize_fence();
            }

            if status != GpuResult::Success {
                error!("fence synchronization failed: {}", status);
                shared.set_last_error(status);

                if status != GpuResult::DeviceLost {
                    shared.device.wait_for_idle();
                }
            }

            shared.events.on_finish_cmdlist();
        } else if let Some(present) = entry.present.take() {
            // Signal the frame and drop the presenter reference right away;
            // the front-end may destroy the presenter after this signal.
            let frame_id = present.frame_id;
            present
                .presenter
                .signal_frame(entry.result, present.mode, frame_id);
            drop(present);

            shared.events.on_finish_present(frame_id);
        }

        // Release resources and signal events before the reset below, so
        // threads sleeping on a resource wake with as little delay as
        // possible.
        if let Some(cmd_list) = &entry.submit {
            cmd_list.notify_objects();
            shared.events.on_finish_gpu_activity();
        }

        if shared.finish_queue.len_approx() == 0 {
            shared.finish_empty.signal_one();
        }

        shared.finish_sync.signal_all();

        if let Some(cmd_list) = entry.submit.take() {
            cmd_list.reset();
            shared.device.recycle_command_list(cmd_list);
        }

        entry.reset();
        shared.pool.release(index);
    }
}

fn dequeue_finish(shared: &QueueShared) -> Option<u32> {
    loop {
        if shared.stopped.load(Ordering::Acquire) {
            return None;
        }
        if let Some(index) = shared.finish_queue.pop() {
            return Some(index);
        }

        // The block below is the only starvation point of the finish stage:
        // time spent here is time the GPU had nothing completing.
        let wait_start = Instant::now();
        shared.finish_filled.wait();
        shared
            .gpu_idle_us
            .fetch_add(wait_start.elapsed().as_micros() as u64, Ordering::Relaxed);
    }
}

// =============================================================================
// Tests
// =============================================================================
