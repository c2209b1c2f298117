//! Hierarchical cancellation tokens.
//!
//! Tokens form a tree of reference-counted nodes. Triggering a node triggers
//! every live descendant; a child never triggers its parent. Triggering is
//! idempotent and the first cause wins.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use log::trace;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{CancelCause, FlowError, FlowResult};

struct Node {
    cancelled: AtomicBool,
    cause: OnceLock<CancelCause>,
    children: Mutex<Vec<Weak<Node>>>,
    notify: Notify,
}

impl Node {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            cause: OnceLock::new(),
            children: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    fn cancel(&self, cause: CancelCause) {
        if self.cause.set(cause.clone()).is_err() {
            return;
        }
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();

        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(cause.clone());
        }
    }
}

/// A cooperative cancellation signal scoped to a unit of work.
///
/// Cloning is cheap (Arc clone) and clones observe the same node.
#[derive(Clone)]
pub struct CancellationToken {
    node: Arc<Node>,
}

impl CancellationToken {
    /// Create a new root token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            node: Arc::new(Node::new()),
        }
    }

    /// Derive a child that is triggered together with this token.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        {
            let mut children = self
                .node
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.node));
        }
        // A concurrent cancel may have drained the list before our push.
        if let Some(cause) = self.cause() {
            child.cancel_with(cause);
        }
        child
    }

    /// Trigger without a specific reason.
    pub fn cancel(&self) {
        self.cancel_with(CancelCause::Requested);
    }

    /// Trigger with a cause. Later calls keep the first cause.
    pub fn cancel_with(&self, cause: CancelCause) {
        trace!("cancelling token: {cause}");
        self.node.cancel(cause);
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.node.cancelled.load(Ordering::Acquire)
    }

    /// The cause recorded by the first trigger, if any.
    #[must_use]
    pub fn cause(&self) -> Option<CancelCause> {
        self.node.cause.get().cloned()
    }

    /// Fail with `Cancelled` if the token has been triggered.
    #[inline]
    pub fn ensure_active(&self) -> FlowResult<()> {
        if self.is_cancelled() {
            Err(self.cancellation())
        } else {
            Ok(())
        }
    }

    /// Resolves once the token is triggered.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.node.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Run `work` until it finishes or the token is triggered.
    ///
    /// `work` is polled first, so work that never suspends always runs to
    /// completion. On cancellation `work` is dropped at its current
    /// suspension point.
    pub async fn run_until_cancelled<F, T>(&self, work: F) -> FlowResult<T>
    where
        F: Future<Output = FlowResult<T>>,
    {
        tokio::select! {
            biased;
            result = work => result,
            () = self.cancelled() => Err(self.cancellation()),
        }
    }

    /// Trigger with `TimedOut` once `delay` elapses.
    ///
    /// Must be called from within a tokio runtime.
    pub fn cancel_after(&self, delay: Duration) -> JoinHandle<()> {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => token.cancel_with(CancelCause::TimedOut(delay)),
                () = token.cancelled() => {}
            }
        })
    }

    /// Guard that triggers this token with `Released` when dropped.
    #[must_use]
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            token: self.clone(),
        }
    }

    pub(crate) fn cancellation(&self) -> FlowError {
        FlowError::Cancelled(self.cause().unwrap_or(CancelCause::Requested))
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("cause", &self.node.cause.get())
            .finish()
    }
}

/// Triggers its token on drop.
#[derive(Debug)]
pub struct CancelOnDrop {
    token: CancellationToken,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.token.cancel_with(CancelCause::Released);
    }
}
