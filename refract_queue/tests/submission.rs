//! End-to-end submission pipeline tests against a scripted GPU surface.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use refract_queue::{
    CommandList, GpuDevice, GpuResult, PresentInfo, PresentMode, Presenter, QueueEvents,
    SubmissionQueue, SubmitInfo, SubmitStatus,
};

// =============================================================================
// Scripted GPU surface
// =============================================================================

/// Blocks callers until released; used to wedge the submit worker.
#[derive(Default)]
struct Gate {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn pass(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.cond.wait(&mut released);
        }
    }

    fn open(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.cond.notify_all();
    }
}

struct ScriptedCmdList {
    id: u32,
    submit_results: Mutex<VecDeque<GpuResult>>,
    fence_result: GpuResult,
    fence_delay: Duration,
    gate: Option<Arc<Gate>>,
    submit_log: Option<Arc<Mutex<Vec<u32>>>>,
    submits: AtomicU32,
    fences: AtomicU32,
    notifies: AtomicU32,
    resets: AtomicU32,
}

impl ScriptedCmdList {
    fn succeeding(id: u32) -> Arc<Self> {
        Self::with_results(id, GpuResult::Success, GpuResult::Success)
    }

    fn with_results(id: u32, submit: GpuResult, fence: GpuResult) -> Arc<Self> {
        Arc::new(Self {
            id,
            submit_results: Mutex::new(VecDeque::from(vec![submit])),
            fence_result: fence,
            fence_delay: Duration::from_millis(1),
            gate: None,
            submit_log: None,
            submits: AtomicU32::new(0),
            fences: AtomicU32::new(0),
            notifies: AtomicU32::new(0),
            resets: AtomicU32::new(0),
        })
    }

    fn gated(id: u32, gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            id,
            submit_results: Mutex::new(VecDeque::from(vec![GpuResult::Success])),
            fence_result: GpuResult::Success,
            fence_delay: Duration::ZERO,
            gate: Some(gate),
            submit_log: None,
            submits: AtomicU32::new(0),
            fences: AtomicU32::new(0),
            notifies: AtomicU32::new(0),
            resets: AtomicU32::new(0),
        })
    }

    fn logged(id: u32, log: Arc<Mutex<Vec<u32>>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            submit_results: Mutex::new(VecDeque::from(vec![GpuResult::Success])),
            fence_result: GpuResult::Success,
            fence_delay: Duration::ZERO,
            gate: None,
            submit_log: Some(log),
            submits: AtomicU32::new(0),
            fences: AtomicU32::new(0),
            notifies: AtomicU32::new(0),
            resets: AtomicU32::new(0),
        })
    }
}

impl CommandList for ScriptedCmdList {
    fn submit(&self) -> GpuResult {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if let Some(log) = &self.submit_log {
            log.lock().push(self.id);
        }
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.submit_results
            .lock()
            .pop_front()
            .unwrap_or(GpuResult::Success)
    }

    fn synchronize_fence(&self) -> GpuResult {
        if !self.fence_delay.is_zero() {
            std::thread::sleep(self.fence_delay);
        }
        self.fences.fetch_add(1, Ordering::SeqCst);
        self.fence_result
    }

    fn notify_objects(&self) {
        self.notifies.fetch_add(1, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedPresenter {
    present_result: GpuResult,
    signals: Mutex<Vec<(GpuResult, PresentMode, u64)>>,
}

impl ScriptedPresenter {
    fn with_result(result: GpuResult) -> Arc<Self> {
        Arc::new(Self {
            present_result: result,
            signals: Mutex::new(Vec::new()),
        })
    }
}

impl Presenter for ScriptedPresenter {
    fn present_image(&self, _mode: PresentMode, _frame_id: u64) -> GpuResult {
        self.present_result
    }

    fn signal_frame(&self, result: GpuResult, mode: PresentMode, frame_id: u64) {
        self.signals.lock().push((result, mode, frame_id));
    }
}

#[derive(Default)]
struct ScriptedDevice {
    idle_waits: AtomicU32,
    recycled: Mutex<Vec<Arc<dyn CommandList>>>,
}

impl GpuDevice for ScriptedDevice {
    fn wait_for_idle(&self) {
        self.idle_waits.fetch_add(1, Ordering::SeqCst);
    }

    fn recycle_command_list(&self, cmd_list: Arc<dyn CommandList>) {
        self.recycled.lock().push(cmd_list);
    }
}

#[derive(Default)]
struct CountingEvents {
    submit_cmdlists: AtomicU64,
    finish_cmdlists: AtomicU64,
    finish_activity: AtomicU64,
    finish_presents: AtomicU64,
}

impl QueueEvents for CountingEvents {
    fn on_submit_cmdlist(&self) {
        self.submit_cmdlists.fetch_add(1, Ordering::SeqCst);
    }
    fn on_finish_cmdlist(&self) {
        self.finish_cmdlists.fetch_add(1, Ordering::SeqCst);
    }
    fn on_finish_gpu_activity(&self) {
        self.finish_activity.fetch_add(1, Ordering::SeqCst);
    }
    fn on_finish_present(&self, _frame_id: u64) {
        self.finish_presents.fetch_add(1, Ordering::SeqCst);
    }
}

fn make_queue(device: Arc<ScriptedDevice>) -> (SubmissionQueue, Arc<CountingEvents>) {
    let events = Arc::new(CountingEvents::default());
    let queue = SubmissionQueue::new(device, events.clone(), None);
    (queue, events)
}

fn wait_until(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    pred()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn happy_path_submits_finishes_and_recycles() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, events) = make_queue(device.clone());

    let cmd_a = ScriptedCmdList::succeeding(1);
    let cmd_b = ScriptedCmdList::succeeding(2);
    let presenter = ScriptedPresenter::with_result(GpuResult::Success);

    let status_a = Arc::new(SubmitStatus::new());
    let status_b = Arc::new(SubmitStatus::new());
    let status_p = Arc::new(SubmitStatus::new());

    queue.submit(
        SubmitInfo {
            cmd_list: cmd_a.clone(),
        },
        Some(status_a.clone()),
    );
    queue.submit(
        SubmitInfo {
            cmd_list: cmd_b.clone(),
        },
        Some(status_b.clone()),
    );
    queue.present(
        PresentInfo {
            presenter: presenter.clone(),
            mode: PresentMode::Fifo,
            frame_id: 17,
        },
        Some(status_p.clone()),
    );

    queue.synchronize_submission(&status_a);
    queue.synchronize_submission(&status_b);
    queue.synchronize_submission(&status_p);
    queue.wait_for_idle();

    assert_eq!(status_a.result(), GpuResult::Success);
    assert_eq!(status_b.result(), GpuResult::Success);
    assert_eq!(status_p.result(), GpuResult::Success);

    assert!(wait_until(Duration::from_secs(5), || {
        device.recycled.lock().len() == 2
    }));

    assert_eq!(cmd_a.resets.load(Ordering::SeqCst), 1);
    assert_eq!(cmd_b.resets.load(Ordering::SeqCst), 1);
    assert_eq!(cmd_a.notifies.load(Ordering::SeqCst), 1);
    assert_eq!(cmd_b.notifies.load(Ordering::SeqCst), 1);

    assert!(wait_until(Duration::from_secs(5), || {
        events.finish_presents.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(
        *presenter.signals.lock(),
        vec![(GpuResult::Success, PresentMode::Fifo, 17)]
    );

    assert_eq!(events.submit_cmdlists.load(Ordering::SeqCst), 2);
    assert_eq!(events.finish_cmdlists.load(Ordering::SeqCst), 2);
    assert_eq!(events.finish_activity.load(Ordering::SeqCst), 2);

    assert_eq!(queue.last_error(), GpuResult::Success);
}

#[test]
fn transient_submit_error_drains_and_releases() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, _events) = make_queue(device.clone());

    let cmd = ScriptedCmdList::with_results(1, GpuResult::OutOfMemory, GpuResult::Success);
    let status = Arc::new(SubmitStatus::new());

    queue.submit(
        SubmitInfo {
            cmd_list: cmd.clone(),
        },
        Some(status.clone()),
    );
    queue.synchronize_submission(&status);

    assert_eq!(status.result(), GpuResult::OutOfMemory);
    assert_eq!(queue.last_error(), GpuResult::OutOfMemory);
    assert!(wait_until(Duration::from_secs(5), || {
        device.idle_waits.load(Ordering::SeqCst) == 1
    }));

    // Not forwarded: the fence is never waited, the list never reset.
    queue.wait_for_idle();
    assert_eq!(cmd.fences.load(Ordering::SeqCst), 0);
    assert_eq!(cmd.resets.load(Ordering::SeqCst), 0);
    assert!(device.recycled.lock().is_empty());

    // The failed entry's slot went back to the pool: a full pool's worth of
    // follow-up submissions completes without deadlocking on acquire.
    for i in 0..32 {
        queue.submit(
            SubmitInfo {
                cmd_list: ScriptedCmdList::succeeding(100 + i),
            },
            None,
        );
    }
    queue.wait_for_idle();
    assert!(wait_until(Duration::from_secs(5), || {
        device.recycled.lock().len() == 32
    }));
}

#[test]
fn device_lost_bypasses_gpu_without_drain() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, _events) = make_queue(device.clone());

    let cmd_a = ScriptedCmdList::with_results(1, GpuResult::DeviceLost, GpuResult::Success);
    let cmd_b = ScriptedCmdList::succeeding(2);
    let status_a = Arc::new(SubmitStatus::new());
    let status_b = Arc::new(SubmitStatus::new());

    queue.submit(
        SubmitInfo {
            cmd_list: cmd_a.clone(),
        },
        Some(status_a.clone()),
    );
    queue.synchronize_submission(&status_a);

    queue.submit(
        SubmitInfo {
            cmd_list: cmd_b.clone(),
        },
        Some(status_b.clone()),
    );
    queue.synchronize_submission(&status_b);

    assert_eq!(status_a.result(), GpuResult::DeviceLost);
    assert_eq!(status_b.result(), GpuResult::DeviceLost);
    assert_eq!(queue.last_error(), GpuResult::DeviceLost);

    // No drain on device loss, and B never reached the GPU.
    assert_eq!(device.idle_waits.load(Ordering::SeqCst), 0);
    assert_eq!(cmd_b.submits.load(Ordering::SeqCst), 0);
    assert_eq!(cmd_a.fences.load(Ordering::SeqCst), 0);
    assert_eq!(cmd_b.fences.load(Ordering::SeqCst), 0);
}

#[test]
fn present_error_still_signals_frame() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, events) = make_queue(device.clone());

    let presenter = ScriptedPresenter::with_result(GpuResult::SurfaceOutOfDate);
    let status = Arc::new(SubmitStatus::new());

    queue.present(
        PresentInfo {
            presenter: presenter.clone(),
            mode: PresentMode::Immediate,
            frame_id: 21,
        },
        Some(status.clone()),
    );
    queue.synchronize_submission(&status);
    queue.wait_for_idle();

    assert_eq!(status.result(), GpuResult::SurfaceOutOfDate);
    assert!(wait_until(Duration::from_secs(5), || {
        !presenter.signals.lock().is_empty()
    }));
    assert_eq!(
        *presenter.signals.lock(),
        vec![(GpuResult::SurfaceOutOfDate, PresentMode::Immediate, 21)]
    );
    assert!(wait_until(Duration::from_secs(5), || {
        events.finish_presents.load(Ordering::SeqCst) == 1
    }));

    // The error does not poison the queue.
    assert_eq!(queue.last_error(), GpuResult::Success);

    // The finish worker dropped its presenter reference.
    assert!(wait_until(Duration::from_secs(5), || {
        Arc::strong_count(&presenter) == 1
    }));
}

#[test]
fn shutdown_with_wedged_submissions_joins_workers() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, _events) = make_queue(device.clone());

    let gate = Arc::new(Gate::default());
    for i in 0..10 {
        queue.submit(
            SubmitInfo {
                cmd_list: ScriptedCmdList::gated(i, gate.clone()),
            },
            None,
        );
    }

    // Drop the queue on a helper thread: it sets the stop flag, pulses the
    // signals and joins the workers, which blocks until the gate opens.
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let dropper = std::thread::spawn(move || {
        drop(queue);
        let _ = done_tx.send(());
    });

    std::thread::sleep(Duration::from_millis(50));
    gate.open();

    assert!(
        done_rx.recv_timeout(Duration::from_secs(10)).is_ok(),
        "workers did not exit after shutdown"
    );
    dropper.join().unwrap();
}

// =============================================================================
// Cross-cutting invariants
// =============================================================================

#[test]
fn single_thread_submissions_reach_gpu_in_order() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, _events) = make_queue(device.clone());

    let log = Arc::new(Mutex::new(Vec::new()));
    for i in 0..100 {
        queue.submit(
            SubmitInfo {
                cmd_list: ScriptedCmdList::logged(i, log.clone()),
            },
            None,
        );
    }
    queue.wait_for_idle();
    assert!(wait_until(Duration::from_secs(5), || log.lock().len() == 100));

    let order = log.lock();
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn wait_for_idle_observes_both_queues_empty() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, _events) = make_queue(device.clone());

    for i in 0..8 {
        queue.submit(
            SubmitInfo {
                cmd_list: ScriptedCmdList::succeeding(i),
            },
            None,
        );
    }
    queue.wait_for_idle();
    assert!(wait_until(Duration::from_secs(5), || {
        device.recycled.lock().len() == 8
    }));
}

#[test]
fn gpu_idle_ticks_is_monotonic() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, _events) = make_queue(device.clone());

    let mut last = queue.gpu_idle_ticks();
    for i in 0..4 {
        queue.submit(
            SubmitInfo {
                cmd_list: ScriptedCmdList::succeeding(i),
            },
            None,
        );
        queue.wait_for_idle();
        std::thread::sleep(Duration::from_millis(5));

        let now = queue.gpu_idle_ticks();
        assert!(now >= last);
        last = now;
    }
}

#[test]
fn synchronize_until_sees_finish_progress() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, events) = make_queue(device.clone());

    for i in 0..4 {
        queue.submit(
            SubmitInfo {
                cmd_list: ScriptedCmdList::succeeding(i),
            },
            None,
        );
    }
    queue.synchronize_until(|| events.finish_cmdlists.load(Ordering::SeqCst) >= 4);
    assert!(events.finish_cmdlists.load(Ordering::SeqCst) >= 4);
}

#[test]
fn queue_callback_fires_on_both_edges() {
    let device = Arc::new(ScriptedDevice::default());
    let edges = Arc::new(Mutex::new(Vec::new()));
    let callback: refract_queue::QueueCallback = {
        let edges = edges.clone();
        Box::new(move |entered: bool| edges.lock().push(entered))
    };
    let queue = SubmissionQueue::new(
        device,
        Arc::new(refract_queue::events::NullEvents),
        Some(callback),
    );

    queue.lock_device_queue();
    queue.unlock_device_queue();

    queue.submit(
        SubmitInfo {
            cmd_list: ScriptedCmdList::succeeding(1),
        },
        None,
    );
    queue.wait_for_idle();
    assert!(wait_until(Duration::from_secs(5), || edges.lock().len() >= 4));

    let edges = edges.lock();
    // Edges alternate: every acquisition enters before it leaves.
    assert!(edges.chunks(2).all(|pair| pair == [true, false]));
}

#[test]
fn statuses_eventually_resolve_under_load() {
    let device = Arc::new(ScriptedDevice::default());
    let (queue, _events) = make_queue(device.clone());
    let queue = Arc::new(queue);

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let mut statuses = Vec::new();
                for i in 0..50 {
                    let status = Arc::new(SubmitStatus::new());
                    queue.submit(
                        SubmitInfo {
                            cmd_list: ScriptedCmdList::succeeding(p * 1000 + i),
                        },
                        Some(status.clone()),
                    );
                    statuses.push(status);
                }
                for status in &statuses {
                    queue.synchronize_submission(status);
                    assert_eq!(status.result(), GpuResult::Success);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
}
