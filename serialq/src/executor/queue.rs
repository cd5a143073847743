//! The queue executor: FIFO backlog and the single-flight drain loop.

use super::defer::{OutcomeCell, TaskOutcome};
use super::execution::{Execution, TaskContext};
use crate::cancellation::{CancellationToken, DisposalRegistry};
use crate::errors::TaskError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// The caller's settle-handle for one submitted task.
///
/// Clonable and observable any number of times; every observer sees the same
/// settled outcome. Also carries the unit's own cancellation scope, so a
/// single task can be cancelled without touching the rest of the queue.
pub struct TaskHandle<R> {
    cell: Arc<OutcomeCell>,
    signal: Arc<CancellationToken>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Clone for TaskHandle<R> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            signal: self.signal.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R: Send + Sync + 'static> TaskHandle<R> {
    /// Awaits the task's outcome.
    ///
    /// Settles exactly once with the task's result, its failure, or a
    /// cancellation rejection.
    pub async fn outcome(&self) -> Result<Arc<R>, TaskError> {
        Self::typed(self.cell.wait().await)
    }

    /// Returns the outcome if the task has already settled.
    #[must_use]
    pub fn try_outcome(&self) -> Option<Result<Arc<R>, TaskError>> {
        self.cell.get().map(Self::typed)
    }

    fn typed(outcome: TaskOutcome) -> Result<Arc<R>, TaskError> {
        match outcome {
            Ok(value) => value
                .downcast::<R>()
                .map_err(|_| TaskError::OutcomeTypeMismatch),
            Err(error) => Err(error),
        }
    }
}

impl<R> TaskHandle<R> {
    /// Cancels this task only. The drain loop skips it if it has not
    /// started; a task already running is signalled, not interrupted.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    /// Cancels this task only, with a reason.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        self.signal.cancel_with_reason(reason);
    }

    /// Returns whether this task's scope has been triggered.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Returns whether the task has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.cell.is_settled()
    }

    /// The task's own cancellation scope.
    #[must_use]
    pub fn signal(&self) -> &Arc<CancellationToken> {
        &self.signal
    }
}

impl<R> std::fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("settled", &self.cell.is_settled())
            .field("cancelled", &self.signal.is_cancelled())
            .finish()
    }
}

struct QueueInner {
    /// FIFO backlog. Pushed by `exec`, popped only by the drain loop.
    backlog: Mutex<VecDeque<Execution>>,
    /// Outcome cell of the most recently dispatched, non-cancelled unit.
    executing: Mutex<Option<Arc<OutcomeCell>>>,
    /// Single-flight guard for the drain loop.
    running: AtomicBool,
    /// The group cancellation signal.
    signal: Arc<CancellationToken>,
    /// Cleanup hooks run by `clear`.
    disposer: Arc<DisposalRegistry>,
}

impl QueueInner {
    /// Wakes the drain loop if it is idle. Idempotent: when a loop is
    /// already active it will observe the appended unit on a later
    /// iteration, so no second loop is started.
    fn notify(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let inner = self.clone();
            tokio::spawn(async move {
                inner.drain().await;
            });
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            if self.signal.is_cancelled() {
                self.flush_cancelled(self.signal.reason());
                self.running.store(false, Ordering::SeqCst);
                return;
            }

            let next = self.backlog.lock().pop_front();
            let Some(execution) = next else {
                self.running.store(false, Ordering::SeqCst);
                // A submission may have appended between the empty pop and
                // the flag store. Reclaim the flag; if the submitter won the
                // race it has already spawned the next loop.
                if self.backlog.lock().is_empty()
                    || self
                        .running
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                {
                    return;
                }
                continue;
            };

            if execution.is_cancelled() {
                trace!("skipping cancelled task");
                execution.settle_cancelled();
                continue;
            }

            // Strict serialization: wait for the predecessor to settle
            // before dispatching. Its rejection was already delivered to its
            // own caller; here it is only data for the next task.
            let previous_cell = self.executing.lock().clone();
            let previous = match previous_cell {
                Some(cell) => Some(cell.wait().await),
                None => None,
            };

            // Cancellation may have landed while waiting; the unit has not
            // started, so it is still skippable and must not become the
            // "previous" of its successor.
            if execution.is_cancelled() {
                trace!("skipping task cancelled while waiting its turn");
                execution.settle_cancelled();
                continue;
            }

            *self.executing.lock() = Some(execution.cell());
            trace!("dispatching task");
            tokio::spawn(execution.run(previous));
        }
    }

    /// Rejects every unit still in the backlog with the cancellation reason.
    ///
    /// Each unit's own scope is cancelled with the group reason first, so
    /// the rejection carries it even if the unit's link has not fired yet.
    /// A unit already cancelled individually keeps its own reason.
    fn flush_cancelled(&self, reason: Option<String>) {
        let drained: Vec<Execution> = {
            let mut backlog = self.backlog.lock();
            backlog.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        debug!(count = drained.len(), "rejecting pending tasks after group cancellation");
        for execution in drained {
            execution.signal().cancel_opt(reason.clone());
            execution.settle_cancelled();
        }
    }
}

/// A single-consumer task queue with strict FIFO execution.
///
/// Exactly one task body is in flight at a time. Each task may observe the
/// outcome of its nearest non-cancelled predecessor, and may be cancelled
/// individually (via its [`TaskHandle`]) or as a group (via [`Self::clear`]
/// or an external signal).
///
/// Requires a running Tokio runtime: the drain loop and each task body are
/// spawned onto it.
pub struct QueuedExecutor {
    inner: Arc<QueueInner>,
}

impl QueuedExecutor {
    /// Creates an executor that owns its group signal.
    ///
    /// [`Self::clear`] triggers the signal, cancelling every live unit.
    #[must_use]
    pub fn new() -> Self {
        let signal = Arc::new(CancellationToken::new());
        let disposer = Arc::new(DisposalRegistry::new());
        let owned = signal.clone();
        disposer.add_action(move || {
            owned.cancel_with_reason("executor cleared");
        });
        Self::build(signal, disposer)
    }

    /// Creates an executor bound to an externally owned group signal.
    ///
    /// [`Self::clear`] still runs the disposal registry but leaves the
    /// external signal untouched.
    #[must_use]
    pub fn with_signal(signal: Arc<CancellationToken>) -> Self {
        Self::build(signal, Arc::new(DisposalRegistry::new()))
    }

    fn build(signal: Arc<CancellationToken>, disposer: Arc<DisposalRegistry>) -> Self {
        let inner = Arc::new(QueueInner {
            backlog: Mutex::new(VecDeque::new()),
            executing: Mutex::new(None),
            running: AtomicBool::new(false),
            signal,
            disposer,
        });

        // Reject queued units when the group fires while the loop is idle.
        // Weak, so the signal does not keep a dropped executor alive.
        let weak = Arc::downgrade(&inner);
        inner.signal.on_cancel(move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.flush_cancelled(reason);
            }
        });

        Self { inner }
    }

    /// Submits a task and returns its settle-handle immediately.
    ///
    /// The task receives a [`TaskContext`] carrying its own cancellation
    /// signal, `args`, and the settled outcome of its nearest non-cancelled
    /// predecessor. Never blocks; safe to call concurrently with a running
    /// drain, including from inside another task on this queue.
    ///
    /// If the group signal has already fired, the handle is rejected
    /// immediately and nothing is enqueued.
    pub fn exec<A, R, F, Fut>(&self, task: F, args: A) -> TaskHandle<R>
    where
        A: Send + 'static,
        R: Send + Sync + 'static,
        F: FnOnce(TaskContext<A>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        let execution = Execution::new(&self.inner.signal, task, args);
        let handle = TaskHandle {
            cell: execution.cell(),
            signal: execution.signal(),
            _marker: PhantomData,
        };

        if self.inner.signal.is_cancelled() {
            execution.settle_cancelled();
            return handle;
        }

        let pending = {
            let mut backlog = self.inner.backlog.lock();
            backlog.push_back(execution);
            backlog.len()
        };
        debug!(pending, "task enqueued");

        self.inner.notify();
        handle
    }

    /// Cancels the group and releases resources.
    ///
    /// Disposes the registry (idempotently); for an executor that owns its
    /// signal this triggers the group signal, so not-yet-started units are
    /// rejected and running units are signalled but not force-terminated.
    pub fn clear(&self) {
        self.inner.disposer.dispose();
    }

    /// The group cancellation signal, for collaborators composing executors.
    #[must_use]
    pub fn signal(&self) -> &Arc<CancellationToken> {
        &self.inner.signal
    }

    /// Cleanup hooks registered here run when the executor is cleared.
    #[must_use]
    pub fn disposal_registry(&self) -> &Arc<DisposalRegistry> {
        &self.inner.disposer
    }

    /// Number of submitted units not yet picked up by the drain loop.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.backlog.lock().len()
    }
}

impl Clone for QueuedExecutor {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl Default for QueuedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueuedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedExecutor")
            .field("pending", &self.pending())
            .field("cancelled", &self.inner.signal.is_cancelled())
            .finish()
    }
}
