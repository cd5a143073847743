//! Cancellation token for cooperative cancellation.

use crate::errors::DEFAULT_ABORT_REASON;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// A one-shot listener invoked with the cancellation reason.
pub type CancelListener = Box<dyn FnOnce(Option<String>) + Send>;

struct TokenInner {
    /// The reason for cancellation (first one wins).
    reason: Option<String>,
    /// Listeners drained and invoked on cancellation.
    listeners: Vec<CancelListener>,
    /// Linked child tokens, cancelled before listeners run. Weak, so a
    /// settled unit's token is reclaimed; dead links are pruned as new
    /// children are created.
    children: Vec<Weak<CancellationToken>>,
}

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
/// Listeners are one-shot: they are drained and invoked exactly once, when
/// the token fires. A listener registered after the token has fired runs
/// immediately and synchronously.
pub struct CancellationToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    inner: Mutex<TokenInner>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            inner: Mutex::new(TokenInner {
                reason: None,
                listeners: Vec::new(),
                children: Vec::new(),
            }),
        }
    }

    /// Requests cancellation without a reason.
    ///
    /// Observers see [`DEFAULT_ABORT_REASON`] through [`Self::reason_or_default`].
    pub fn cancel(&self) {
        self.cancel_opt(None);
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        self.cancel_opt(Some(reason.into()));
    }

    pub(crate) fn cancel_opt(&self, reason: Option<String>) {
        let (children, listeners) = {
            let mut inner = self.inner.lock();
            if self.cancelled.swap(true, Ordering::SeqCst) {
                return;
            }
            inner.reason = reason;
            (
                std::mem::take(&mut inner.children),
                std::mem::take(&mut inner.listeners),
            )
        };

        // Propagated and invoked outside the lock so children and listeners
        // may touch this token again. Children first: a listener observing
        // the cancellation must see every linked scope already triggered.
        let reason = self.reason();
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel_opt(reason.clone());
            }
        }
        for listener in listeners {
            Self::invoke(listener, reason.clone());
        }
    }

    /// Registers a one-shot listener invoked with the cancellation reason.
    ///
    /// If already cancelled, the listener is invoked immediately.
    /// Panics in listeners are logged and suppressed.
    pub fn on_cancel<F>(&self, listener: F)
    where
        F: FnOnce(Option<String>) + Send + 'static,
    {
        let reason = {
            let mut inner = self.inner.lock();
            if !self.cancelled.load(Ordering::SeqCst) {
                inner.listeners.push(Box::new(listener));
                return;
            }
            inner.reason.clone()
        };

        Self::invoke(Box::new(listener), reason);
    }

    fn invoke(listener: CancelListener, reason: Option<String>) {
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            listener(reason);
        })) {
            warn!("Cancellation listener panicked: {:?}", e);
        }
    }

    /// Creates a child token that fires when this token fires.
    ///
    /// The link is one-directional: cancelling the child leaves this token
    /// untouched. The parent's reason propagates to the child. A child of an
    /// already-cancelled token is born cancelled. The link holds only a weak
    /// reference, so dropping every other handle to the child releases it.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self::new());
        let fire_now = {
            let mut inner = self.inner.lock();
            if self.cancelled.load(Ordering::SeqCst) {
                Some(inner.reason.clone())
            } else {
                // Reclaim links whose tokens are gone, so a long-lived
                // parent stays bounded however many children it has seen.
                inner.children.retain(|link| link.strong_count() > 0);
                inner.children.push(Arc::downgrade(&child));
                None
            }
        };

        if let Some(reason) = fire_now {
            child.cancel_opt(reason);
        }
        child
    }

    /// Number of child links currently tracked.
    ///
    /// Dead links are pruned as new children are created, so this stays
    /// bounded by the number of live children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.lock().children.len()
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner.lock().reason.clone()
    }

    /// Returns the cancellation reason, or the default reason text.
    #[must_use]
    pub fn reason_or_default(&self) -> String {
        self.reason().unwrap_or_else(|| DEFAULT_ABORT_REASON.to_string())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel_with_reason() {
        let token = CancellationToken::new();
        token.cancel_with_reason("user requested");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("user requested".to_string()));
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel_with_reason("first reason");
        token.cancel_with_reason("second reason");

        // First reason wins
        assert_eq!(token.reason(), Some("first reason".to_string()));
    }

    #[test]
    fn test_reason_or_default() {
        let token = CancellationToken::new();
        token.cancel();

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), None);
        assert_eq!(token.reason_or_default(), DEFAULT_ABORT_REASON);
    }

    #[test]
    fn test_on_cancel_before_cancellation() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        token.on_cancel(move |reason| {
            assert_eq!(reason.as_deref(), Some("test"));
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel_with_reason("test");

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_cancel_after_cancellation() {
        let token = CancellationToken::new();
        token.cancel_with_reason("test");

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        // Should invoke immediately
        token.on_cancel(move |_reason| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_panic_suppressed() {
        let token = CancellationToken::new();

        token.on_cancel(|_reason| {
            panic!("Intentional panic");
        });

        // Should not panic
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_fires_with_parent() {
        let parent = Arc::new(CancellationToken::new());
        let child = parent.child();

        assert!(!child.is_cancelled());

        parent.cancel_with_reason("group shutdown");

        assert!(child.is_cancelled());
        assert_eq!(child.reason(), Some("group shutdown".to_string()));
    }

    #[test]
    fn test_child_cancel_does_not_touch_parent() {
        let parent = Arc::new(CancellationToken::new());
        let child = parent.child();

        child.cancel_with_reason("local only");

        assert!(!parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_born_cancelled() {
        let parent = Arc::new(CancellationToken::new());
        parent.cancel_with_reason("already gone");

        let child = parent.child();
        assert!(child.is_cancelled());
        assert_eq!(child.reason(), Some("already gone".to_string()));
    }

    #[test]
    fn test_dead_child_links_are_pruned() {
        let parent = Arc::new(CancellationToken::new());
        for _ in 0..100 {
            let child = parent.child();
            drop(child);
        }
        assert_eq!(parent.child_count(), 100);

        // The next link reclaims every dead one
        let kept = parent.child();
        assert_eq!(parent.child_count(), 1);

        parent.cancel_with_reason("done");
        assert!(kept.is_cancelled());
        assert_eq!(kept.reason(), Some("done".to_string()));
    }

    #[test]
    fn test_child_reason_stays_first() {
        let parent = Arc::new(CancellationToken::new());
        let child = parent.child();

        child.cancel_with_reason("mine");
        parent.cancel_with_reason("group");

        // The child already fired; the parent's reason must not overwrite it.
        assert_eq!(child.reason(), Some("mine".to_string()));
    }
}
