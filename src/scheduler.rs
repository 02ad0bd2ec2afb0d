//! C7: Render Queue — priority/debounced async task scheduler (§4.7).
//!
//! Grounded in `program.rs::Launcher::block_on`'s `waker_fn`-driven poll
//! loop, generalized from "poll a single future to completion" into a
//! priority queue of pending render requests with debounce, a re-entrancy
//! guard, task identity for cancellation, and an object pool for task
//! wrappers. Per-task completion is the DESIGN NOTES "`Promise`-resolver
//! pair stored on wrapper objects → channel per task": since the whole
//! engine is single-threaded cooperative (§5), the channel is a plain
//! `Rc<RefCell<Outcome<R>>>` rather than a cross-thread channel — there is
//! never more than one logical thread touching a `Scheduler`.
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Background = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Running,
    Draining,
}

/// Opaque metadata a caller can attach to a task for later
/// `cancel_by_metadata` lookups (§4.7 "Cancellation").
pub type TaskMetadata = u64;

pub type TaskId = u64;

/// The outcome of one submitted task, shared between the scheduler and
/// the `TaskHandle` the caller holds (§4.7 "`Promise`-resolver pair").
enum Outcome<R> {
    Pending,
    Ready(Result<R, EngineError>),
}

/// A completion handle returned by `submit`. `settled` (§3 "Render task
/// wrapper") guards against double-completion; polling after settlement
/// always returns the same result.
pub struct TaskHandle<R> {
    pub id: TaskId,
    state: Rc<RefCell<Outcome<R>>>,
}

impl<R> TaskHandle<R> {
    /// Non-blocking poll: `None` while pending.
    pub fn poll(&self) -> Option<&'static str>
    where
        R: 'static,
    {
        // Exposed for callers that only want a "done yet?" check without
        // consuming the result; `take` is the consuming counterpart.
        match &*self.state.borrow() {
            Outcome::Pending => None,
            Outcome::Ready(_) => Some("ready"),
        }
    }

    /// Take the result once settled. Panics if called before the task has
    /// settled — callers drive settlement via `Scheduler::process_now`/
    /// `tick` before calling this, matching the single-threaded
    /// cooperative contract (§5): there is no background thread that
    /// could settle it out from under the caller.
    pub fn take(self) -> Result<R, EngineError> {
        match Rc::try_unwrap(self.state) {
            Ok(cell) => match cell.into_inner() {
                Outcome::Ready(result) => result,
                Outcome::Pending => Err(EngineError::Internal("polled an unsettled task handle".into())),
            },
            Err(shared) => match std::mem::replace(&mut *shared.borrow_mut(), Outcome::Pending) {
                Outcome::Ready(result) => result,
                Outcome::Pending => Err(EngineError::Internal("polled an unsettled task handle".into())),
            },
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(&*self.state.borrow(), Outcome::Pending)
    }
}

struct QueuedTask {
    id: TaskId,
    priority: Priority,
    sequence: u64,
    metadata: Option<TaskMetadata>,
    /// Runs the task and settles its handle with the real result.
    run: Box<dyn FnOnce()>,
    /// Settles the handle with `Cancelled`/`DeviceLost` without running
    /// the task body (§4.7 "reject its future").
    reject: Box<dyn FnOnce(EngineError)>,
    /// Returned to the scheduler's pool once this task settles, one way
    /// or the other.
    wrapper: TaskWrapper,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Strict priority ordering with FIFO tie-break: earlier `sequence`
/// wins among equal priorities (§4.7 "strict priority, FIFO tie-break").
/// `BinaryHeap` is a max-heap, so ties invert `sequence` to prefer the
/// smaller (earlier) one.
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A pooled task wrapper, reused across submissions to avoid
/// per-submission allocation churn (§4.7 "wrapper object pool").
#[derive(Default)]
struct TaskWrapper {
    metadata: Option<TaskMetadata>,
}

impl TaskWrapper {
    fn reset(&mut self) {
        self.metadata = None;
    }
}

fn wrapper_pool_capacity(debug: bool) -> usize {
    if debug {
        20
    } else {
        5
    }
}

fn debounce_delay(debug: bool) -> Duration {
    if debug {
        Duration::from_millis(1)
    } else {
        Duration::from_millis(0)
    }
}

/// Priority/debounced scheduler for render requests (§4.7).
///
/// Single-threaded cooperative model: `process_now` (or the debounce
/// timer firing) drains the heap strictly by priority, then FIFO.
pub struct Scheduler {
    heap: BinaryHeap<QueuedTask>,
    pool: Vec<TaskWrapper>,
    pool_capacity: usize,
    sequence: u64,
    next_id: TaskId,
    state: SchedulerState,
    debounce_until: Option<Instant>,
    debounce_delay: Duration,
    processing: bool,
    stop_requested: bool,
}

impl Scheduler {
    pub fn new(debug: bool) -> Self {
        Scheduler {
            heap: BinaryHeap::new(),
            pool: Vec::new(),
            pool_capacity: wrapper_pool_capacity(debug),
            sequence: 0,
            next_id: 0,
            state: SchedulerState::Idle,
            debounce_until: None,
            debounce_delay: debounce_delay(debug),
            processing: false,
            stop_requested: false,
        }
    }

    fn acquire_wrapper(&mut self) -> TaskWrapper {
        self.pool.pop().unwrap_or_default()
    }

    fn release_wrapper(&mut self, mut wrapper: TaskWrapper) {
        wrapper.reset();
        if self.pool.len() < self.pool_capacity {
            self.pool.push(wrapper);
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// §4.7 "Re-entrancy": a running task must check this before calling
    /// `submit` again and invoke the operation inline instead of
    /// re-entering the queue.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn pending_count(&self) -> usize {
        self.heap.len()
    }

    /// Submit work at `priority`, returning its `TaskId` and a
    /// `TaskHandle` the caller can poll/take once settled (§4.7
    /// "Submission returns a completion future"). Takes the *fast path*
    /// (runs inline, synchronously) when the scheduler is idle, nothing
    /// is pending, and `priority == Normal` (§4.7 "Fast path").
    pub fn submit<R: 'static>(&mut self, priority: Priority, metadata: Option<TaskMetadata>, work: impl FnOnce() -> R + 'static) -> TaskHandle<R> {
        let state = Rc::new(RefCell::new(Outcome::Pending));
        let id = self.next_id;
        self.next_id += 1;

        let fast_path = matches!(self.state, SchedulerState::Idle) && self.heap.is_empty() && priority == Priority::Normal && !self.processing;

        if fast_path {
            self.processing = true;
            let result = work();
            self.processing = false;
            *state.borrow_mut() = Outcome::Ready(Ok(result));
            return TaskHandle { id, state };
        }

        let mut wrapper = self.acquire_wrapper();
        wrapper.metadata = metadata;

        let sequence = self.sequence;
        self.sequence += 1;

        let run_state = state.clone();
        let reject_state = state.clone();

        self.heap.push(QueuedTask {
            id,
            priority,
            sequence,
            metadata: wrapper.metadata,
            run: Box::new(move || {
                let result = work();
                *run_state.borrow_mut() = Outcome::Ready(Ok(result));
            }),
            reject: Box::new(move |err| {
                *reject_state.borrow_mut() = Outcome::Ready(Err(err));
            }),
            wrapper,
        });

        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Scheduled;
            self.debounce_until = Some(Instant::now() + self.debounce_delay);
        }

        TaskHandle { id, state }
    }

    /// §4.7 `cancel(id)`: remove a non-running pending task, rejecting its
    /// handle with `Cancelled`. No-op (returns `false`) if `id` is not
    /// pending (already run, or never existed).
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let Some(index) = self.heap.iter().position(|task| task.id == id) else {
            return false;
        };
        let tasks: Vec<QueuedTask> = self.heap.drain().collect();
        let mut removed = None;
        for (i, task) in tasks.into_iter().enumerate() {
            if i == index {
                removed = Some(task);
            } else {
                self.heap.push(task);
            }
        }
        if let Some(task) = removed {
            (task.reject)(EngineError::Cancelled);
            self.release_wrapper(task.wrapper);
            true
        } else {
            false
        }
    }

    /// §4.7 `cancel_by_metadata`: same, for every pending task matching
    /// `metadata`. Returns the number cancelled.
    pub fn cancel_by_metadata(&mut self, metadata: TaskMetadata) -> usize {
        let tasks: Vec<QueuedTask> = self.heap.drain().collect();
        let mut cancelled = 0;
        for task in tasks {
            if task.metadata == Some(metadata) {
                (task.reject)(EngineError::Cancelled);
                self.release_wrapper(task.wrapper);
                cancelled += 1;
            } else {
                self.heap.push(task);
            }
        }
        cancelled
    }

    /// §4.7 `clear(force)`: reject and drop every pending task without
    /// running it. If a task is currently running and `force == false`,
    /// the running task is preserved (`stop_after_current`); otherwise
    /// pending tasks are rejected immediately.
    pub fn clear(&mut self, force: bool) {
        if !force && self.processing {
            self.stop_after_current();
            return;
        }
        self.reject_all_pending(EngineError::Cancelled);
        self.debounce_until = None;
        self.state = SchedulerState::Idle;
        self.stop_requested = false;
    }

    /// §4.7 "`stop_after_current` transitions to `Draining`... preserves
    /// the running task and rejects all others": the in-flight `run_all_
    /// pending` loop checks this flag between tasks and stops early.
    pub fn stop_after_current(&mut self) {
        if self.processing {
            self.stop_requested = true;
            self.state = SchedulerState::Draining;
        } else {
            self.reject_all_pending(EngineError::Cancelled);
            self.state = SchedulerState::Idle;
        }
    }

    fn reject_all_pending(&mut self, err: EngineError) {
        let tasks: Vec<QueuedTask> = self.heap.drain().collect();
        for task in tasks {
            (task.reject)(err.clone_for_reject());
            self.release_wrapper(task.wrapper);
        }
    }

    /// Force-run the debounced batch immediately, cancelling the timer
    /// (§4.7 "debounce ... cancellable by `process_now`").
    pub fn process_now(&mut self) -> Result<usize, EngineError> {
        self.debounce_until = None;
        self.run_all_pending()
    }

    /// Called by the frame-tick driver each tick: if the debounce timer
    /// has elapsed, runs the pending batch.
    pub fn tick(&mut self, now: Instant) -> Result<usize, EngineError> {
        match self.debounce_until {
            Some(deadline) if now >= deadline => self.run_all_pending(),
            Some(_) => Ok(0),
            None if self.state == SchedulerState::Draining => self.run_all_pending(),
            None => Ok(0),
        }
    }

    /// Drain the heap strictly by priority/FIFO, running every task in
    /// turn. A panic from any task rejects every remaining pending task
    /// with `EngineError::Internal` (modeling `ProcessingError`) rather
    /// than leaving the scheduler wedged (§4.7 "panic-in-loop rejects all
    /// pending"). Honors `stop_after_current`: after each task, if a stop
    /// was requested mid-run, the remaining pending tasks are rejected
    /// and the loop ends (the task that was already running completes,
    /// nothing after it does).
    fn run_all_pending(&mut self) -> Result<usize, EngineError> {
        if self.processing {
            // Re-entrancy guard: a nested call during an active run is a
            // no-op (§4.7 "re-entrancy via is_processing").
            return Ok(0);
        }

        self.processing = true;
        self.state = SchedulerState::Running;
        self.debounce_until = None;

        let mut ran = 0;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| -> usize {
            while let Some(task) = self.heap.pop() {
                (task.run)();
                self.release_wrapper(task.wrapper);
                ran += 1;
                if self.stop_requested {
                    break;
                }
            }
            ran
        }));

        self.processing = false;
        let stopped = self.stop_requested;
        self.stop_requested = false;

        match result {
            Ok(ran) => {
                if stopped {
                    self.reject_all_pending(EngineError::Cancelled);
                }
                self.state = SchedulerState::Idle;
                Ok(ran)
            }
            Err(_) => {
                self.reject_all_pending(EngineError::Internal("scheduler loop panicked".into()));
                self.state = SchedulerState::Idle;
                Err(EngineError::Internal("scheduler loop panicked".into()))
            }
        }
    }
}

impl EngineError {
    /// `EngineError` doesn't derive `Clone` (some variants wrap non-`Clone`
    /// error types elsewhere in the crate); rejection only ever needs the
    /// small set of terminal variants the scheduler itself produces, so
    /// this reconstructs those instead of requiring a blanket `Clone`.
    fn clone_for_reject(&self) -> EngineError {
        match self {
            EngineError::Cancelled => EngineError::Cancelled,
            EngineError::DeviceLost => EngineError::DeviceLost,
            EngineError::Timeout => EngineError::Timeout,
            other => EngineError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_path_runs_inline_for_idle_normal_priority() {
        let mut scheduler = Scheduler::new(true);
        let handle = scheduler.submit(Priority::Normal, None, || 42);
        assert!(handle.is_settled());
        assert_eq!(handle.take().unwrap(), 42);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn non_normal_priority_queues_instead_of_fast_path() {
        let mut scheduler = Scheduler::new(true);
        let handle = scheduler.submit(Priority::Urgent, None, || ());
        assert!(!handle.is_settled());
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn priority_ordering_is_strict_then_fifo() {
        let mut scheduler = Scheduler::new(true);
        let order = Rc::new(RefCell::new(Vec::new()));

        // Queue via High priority to avoid the fast path, then add a
        // second High (tie, should run after due to FIFO) and an Urgent
        // (should run first despite being submitted last).
        let o1 = order.clone();
        let h1 = scheduler.submit(Priority::High, None, move || o1.borrow_mut().push("high-1"));
        let o2 = order.clone();
        let h2 = scheduler.submit(Priority::High, None, move || o2.borrow_mut().push("high-2"));
        let o3 = order.clone();
        let h3 = scheduler.submit(Priority::Urgent, None, move || o3.borrow_mut().push("urgent"));

        scheduler.process_now().unwrap();
        assert_eq!(*order.borrow(), vec!["urgent", "high-1", "high-2"]);
        assert!(h1.is_settled() && h2.is_settled() && h3.is_settled());
    }

    #[test]
    fn running_count_never_exceeds_one() {
        let mut scheduler = Scheduler::new(true);
        let max_concurrent = Rc::new(RefCell::new(0usize));
        let current = Rc::new(RefCell::new(0usize));

        for _ in 0..3 {
            let max_concurrent = max_concurrent.clone();
            let current = current.clone();
            scheduler.submit(Priority::High, None, move || {
                *current.borrow_mut() += 1;
                *max_concurrent.borrow_mut() = (*max_concurrent.borrow()).max(*current.borrow());
                *current.borrow_mut() -= 1;
            });
        }
        scheduler.process_now().unwrap();
        assert_eq!(*max_concurrent.borrow(), 1);
    }

    #[test]
    fn cancel_by_id_rejects_pending_task() {
        let mut scheduler = Scheduler::new(true);
        let handle = scheduler.submit(Priority::High, None, || ());
        assert!(scheduler.cancel(handle.id));
        assert_eq!(scheduler.pending_count(), 0);
        assert!(matches!(handle.take(), Err(EngineError::Cancelled)));
    }

    #[test]
    fn cancel_by_metadata_removes_matching_tasks() {
        let mut scheduler = Scheduler::new(true);
        scheduler.submit(Priority::High, Some(7), || ());
        scheduler.submit(Priority::High, Some(9), || ());
        assert_eq!(scheduler.cancel_by_metadata(7), 1);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn clear_force_rejects_everything_and_resets_idle() {
        let mut scheduler = Scheduler::new(true);
        let handle = scheduler.submit(Priority::High, None, || ());
        scheduler.clear(true);
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(matches!(handle.take(), Err(EngineError::Cancelled)));
    }

    #[test]
    fn wrapper_pool_does_not_grow_past_capacity() {
        let mut scheduler = Scheduler::new(false);
        for _ in 0..50 {
            scheduler.submit(Priority::High, None, || ());
        }
        scheduler.process_now().unwrap();
        assert!(scheduler.pool.len() <= scheduler.pool_capacity);
    }
}
