//! A single enqueued task bound to its own cancellation scope.

use super::defer::{Defer, ErasedValue, OutcomeCell, TaskOutcome};
use crate::cancellation::CancellationToken;
use crate::errors::TaskError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

/// What a task function receives when the drain loop dispatches it.
pub struct TaskContext<A> {
    /// The unit's own cancellation signal. Fires when the unit is cancelled
    /// individually or when the group signal fires. Cancellation after the
    /// task has started is advisory: poll this to stop early.
    pub signal: Arc<CancellationToken>,
    /// The arguments captured at submission.
    pub args: A,
    /// The settled outcome of the nearest preceding non-cancelled task, if
    /// any. A predecessor's failure lands here for inspection; it is never
    /// re-thrown into this task.
    pub previous: Option<TaskOutcome>,
}

impl<A> TaskContext<A> {
    /// Downcasts the predecessor's resolved value, if it resolved with `T`.
    #[must_use]
    pub fn previous_value<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match &self.previous {
            Some(Ok(value)) => value.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Returns the predecessor's failure, if it rejected.
    #[must_use]
    pub fn previous_error(&self) -> Option<&TaskError> {
        match &self.previous {
            Some(Err(error)) => Some(error),
            _ => None,
        }
    }
}

/// The backlog-storable form of a task: result type and argument type erased.
type ErasedTask = Box<
    dyn FnOnce(Arc<CancellationToken>, Option<TaskOutcome>) -> BoxFuture<'static, TaskOutcome>
        + Send,
>;

/// One enqueued task: its own cancellation scope (a child of the group
/// scope), its settle-handle, and the task closure itself.
pub(crate) struct Execution {
    cancel: Arc<CancellationToken>,
    defer: Defer,
    task: ErasedTask,
}

impl Execution {
    /// Binds `task` and `args` to a fresh child scope of `group`.
    pub(crate) fn new<A, R, F, Fut>(group: &Arc<CancellationToken>, task: F, args: A) -> Self
    where
        A: Send + 'static,
        R: Send + Sync + 'static,
        F: FnOnce(TaskContext<A>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        let cancel = group.child();
        let defer = Defer::new(cancel.clone());
        let task: ErasedTask = Box::new(move |signal, previous| {
            async move {
                let ctx = TaskContext { signal, args, previous };
                // The closure body runs at first poll, so a synchronous
                // panic is contained the same way an async one is.
                let guarded = std::panic::AssertUnwindSafe(async move { task(ctx).await });
                match guarded.catch_unwind().await {
                    Ok(Ok(value)) => Ok(Arc::new(value) as ErasedValue),
                    Ok(Err(error)) => Err(error),
                    Err(panic) => Err(TaskError::Panicked(panic_message(panic.as_ref()))),
                }
            }
            .boxed()
        });
        Self { cancel, defer, task }
    }

    /// The unit's outcome cell, shared with its [`super::TaskHandle`].
    pub(crate) fn cell(&self) -> Arc<OutcomeCell> {
        self.defer.cell()
    }

    /// The unit's own cancellation scope.
    pub(crate) fn signal(&self) -> Arc<CancellationToken> {
        self.cancel.clone()
    }

    /// Whether the unit's scope has been triggered.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Rejects the unit with its scope's cancellation reason without
    /// invoking the task. Used when the drain loop skips a cancelled unit.
    pub(crate) fn settle_cancelled(&self) {
        self.defer.reject(TaskError::cancelled(self.cancel.reason()));
    }

    /// Invokes the task and delivers its result through the settle-handle.
    ///
    /// A resolution after the unit's scope fired becomes a cancellation
    /// rejection; failures and contained panics reject verbatim. The unit
    /// settles exactly once either way.
    pub(crate) async fn run(self, previous: Option<TaskOutcome>) {
        let outcome = (self.task)(self.cancel.clone(), previous).await;
        match outcome {
            Ok(value) => self.defer.resolve(value),
            Err(error) => self.defer.reject(error),
        }
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("cancelled", &self.is_cancelled())
            .field("settled", &self.defer.cell().is_settled())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn group() -> Arc<CancellationToken> {
        Arc::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn test_run_resolves_with_value() {
        let group = group();
        let execution = Execution::new(
            &group,
            |ctx: TaskContext<(i32, i32)>| async move { Ok(ctx.args.0 + ctx.args.1) },
            (2, 3),
        );
        let cell = execution.cell();

        execution.run(None).await;

        let outcome = cell.wait().await;
        let value = outcome
            .ok()
            .and_then(|v| v.downcast::<i32>().ok())
            .map(|v| *v);
        assert_eq!(value, Some(5));
    }

    #[tokio::test]
    async fn test_run_propagates_failure() {
        let group = group();
        let execution = Execution::new(
            &group,
            |_ctx: TaskContext<()>| async move { Err::<i32, _>(TaskError::from("nope")) },
            (),
        );
        let cell = execution.cell();

        execution.run(None).await;

        assert_eq!(cell.wait().await.map(|_| ()), Err(TaskError::Failed("nope".to_string())));
    }

    #[tokio::test]
    async fn test_run_contains_panic() {
        let group = group();
        let execution = Execution::new(
            &group,
            |ctx: TaskContext<()>| async move {
                if !ctx.signal.is_cancelled() {
                    panic!("kaboom");
                }
                Ok::<i32, TaskError>(0)
            },
            (),
        );
        let cell = execution.cell();

        execution.run(None).await;

        assert_eq!(
            cell.wait().await.map(|_| ()),
            Err(TaskError::Panicked("kaboom".to_string()))
        );
    }

    #[tokio::test]
    async fn test_late_resolution_becomes_cancellation() {
        let group = group();
        let execution = Execution::new(
            &group,
            |_ctx: TaskContext<()>| async move { Ok::<_, TaskError>("done") },
            (),
        );
        let cell = execution.cell();

        // Scope fires while the task is conceptually in flight
        execution.signal().cancel_with_reason("changed my mind");
        execution.run(None).await;

        assert_eq!(
            cell.wait().await.map(|_| ()),
            Err(TaskError::Cancelled { reason: "changed my mind".to_string() })
        );
    }

    #[tokio::test]
    async fn test_group_cancel_reaches_unit_scope() {
        let group = group();
        let execution = Execution::new(
            &group,
            |_ctx: TaskContext<()>| async move { Ok::<_, TaskError>(()) },
            (),
        );

        assert!(!execution.is_cancelled());
        group.cancel_with_reason("group gone");
        assert!(execution.is_cancelled());
        assert_eq!(execution.signal().reason(), Some("group gone".to_string()));
    }

    #[tokio::test]
    async fn test_previous_value_downcast() {
        let previous: TaskOutcome = Ok(Arc::new("a".to_string()) as ErasedValue);
        let ctx = TaskContext { signal: group(), args: (), previous: Some(previous) };

        assert_eq!(ctx.previous_value::<String>().as_deref(), Some(&"a".to_string()));
        assert!(ctx.previous_value::<i32>().is_none());
        assert!(ctx.previous_error().is_none());
    }

    #[tokio::test]
    async fn test_previous_error_inspectable() {
        let previous: TaskOutcome = Err(TaskError::Failed("earlier".to_string()));
        let ctx = TaskContext { signal: group(), args: (), previous: Some(previous) };

        assert!(ctx.previous_value::<String>().is_none());
        assert_eq!(ctx.previous_error(), Some(&TaskError::Failed("earlier".to_string())));
    }
}
