//! Structured scopes for detached collections.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use log::warn;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{CancelCause, Failure, FlowError};
use crate::flow::completion::Completion;
use crate::runtime::async_task::AsyncTask;
use crate::runtime::cancel::CancellationToken;
use crate::runtime::context::ExecutionContext;

/// Handles of detached tasks. Finished handles are dropped whenever a new
/// one is added, so a long-lived owner holds only the tasks still running.
///
/// Tasks pushed here must not panic; wrap their work in `catch_unwind`.
#[derive(Default)]
pub(crate) struct TaskList(Mutex<Vec<JoinHandle<()>>>);

impl TaskList {
    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, handle: JoinHandle<()>) {
        let mut tasks = self.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Take every tracked handle, leaving the list empty.
    pub(crate) fn drain(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.lock())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Owner of a group of launched jobs.
///
/// Every job gets a child of the scope's token. A job that fails cancels
/// the whole scope.
pub struct Scope {
    token: CancellationToken,
    context: ExecutionContext,
    tasks: TaskList,
}

impl Scope {
    /// Create a root scope launching onto `context`.
    #[must_use]
    pub fn new(context: ExecutionContext) -> Self {
        Self::with_token(context, CancellationToken::new())
    }

    /// Create a scope bound to an existing token.
    #[must_use]
    pub fn with_token(context: ExecutionContext, token: CancellationToken) -> Self {
        Self {
            token,
            context,
            tasks: TaskList::default(),
        }
    }

    /// Derive a nested scope cancelled together with this one.
    #[must_use]
    pub fn child(&self) -> Scope {
        Scope::with_token(self.context.clone(), self.token.child_token())
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Cancel every job in the scope.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Start `work` as a detached job without waiting for it.
    ///
    /// `work` receives the job's token and reports a `Completion`.
    pub fn launch<F, Fut>(&self, work: F) -> Job
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let token = self.token.child_token();
        let scope_token = self.token.clone();
        let (tx, rx) = oneshot::channel();
        let future = work(token.clone());

        let handle = self.context.spawn(async move {
            let completion = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Completion::Failed(FlowError::panicked(panic)));
            if let Completion::Failed(error) = &completion {
                warn!("launched job failed, cancelling its scope: {error}");
                scope_token.cancel_with(CancelCause::Failed(Failure::new(error.clone())));
            }
            let _ = tx.send(completion);
        });
        self.tasks.push(handle);

        Job {
            token,
            task: AsyncTask::new(rx),
        }
    }

    /// Wait for every launched job, including jobs launched while waiting.
    ///
    /// Reports `Cancelled` when the scope was cancelled, whether directly or
    /// by a failing job.
    pub async fn join(&self) -> Completion {
        loop {
            let tasks = self.tasks.drain();
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!("launched job did not finish cleanly: {e}");
                }
            }
        }
        Completion::settle(Ok(()), &self.token)
    }
}

/// Handle to one launched job
pub struct Job {
    token: CancellationToken,
    task: AsyncTask<Completion>,
}

impl Job {
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this job only.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the job's completion.
    pub async fn join(self) -> Completion {
        self.task.await.unwrap_or_else(|_| {
            Completion::Failed(FlowError::failure(
                "job terminated without reporting a completion",
            ))
        })
    }
}
