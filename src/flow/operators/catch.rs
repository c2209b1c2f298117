//! Error boundary and completion hook.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use log::debug;

use crate::error::{FlowError, FlowResult};
use crate::flow::emitter::{EmitFuture, Emitter};
use crate::flow::{Flow, Stage, StageKind};

type Handler<T> = Arc<dyn Fn(FlowError, Emitter<T>) -> EmitFuture + Send + Sync>;
type Hook = Arc<dyn Fn(Option<&FlowError>) + Send + Sync>;

/// Intercepts failures raised above it in the pipeline.
///
/// A failure that travelled up from below (the downstream rejected a value)
/// passes through as a consumption failure; cancellation passes untouched.
struct CatchStage<T> {
    upstream: Flow<T>,
    handler: Handler<T>,
}

impl<T: Send + 'static> Stage<T> for CatchStage<T> {
    fn kind(&self) -> StageKind {
        StageKind::Catch
    }

    fn lineage(&self, stages: &mut Vec<StageKind>) {
        self.upstream.lineage(stages);
        stages.push(self.kind());
    }

    fn run(&self, downstream: Emitter<T>) -> EmitFuture {
        let upstream = self.upstream.clone();
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            let downstream_failed = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&downstream_failed);
            let sink = downstream.clone();
            let emitter = downstream.upstream(move |value: T| {
                let sink = sink.clone();
                let flag = Arc::clone(&flag);
                async move {
                    let result = sink.emit(value).await;
                    if result.is_err() {
                        flag.store(true, Ordering::Release);
                    }
                    result
                }
                .boxed()
            });

            match upstream.run(emitter).await {
                Ok(()) => Ok(()),
                Err(error) if downstream_failed.load(Ordering::Acquire) => {
                    Err(error.into_consumption())
                }
                Err(error @ (FlowError::Cancelled(_) | FlowError::Aborted(_))) => Err(error),
                Err(error) => {
                    debug!("catch intercepted upstream failure: {error}");
                    handler(error, downstream).await
                }
            }
        })
    }
}

/// Observes the terminal outcome of everything above it.
struct CompletionStage<T> {
    upstream: Flow<T>,
    hook: Hook,
}

impl<T: Send + 'static> Stage<T> for CompletionStage<T> {
    fn kind(&self) -> StageKind {
        StageKind::OnCompletion
    }

    fn lineage(&self, stages: &mut Vec<StageKind>) {
        self.upstream.lineage(stages);
        stages.push(self.kind());
    }

    fn run(&self, downstream: Emitter<T>) -> EmitFuture {
        let upstream = self.upstream.clone();
        let hook = Arc::clone(&self.hook);
        Box::pin(async move {
            let result = upstream.run(downstream).await;
            match &result {
                Ok(()) | Err(FlowError::Aborted(_)) => hook(None),
                Err(error) => hook(Some(error)),
            }
            result
        })
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Handle failures raised upstream of this point.
    ///
    /// `handler` may emit replacement values through the emitter, then
    /// either swallows the failure (`Ok`) or re-raises it (`Err`). Failures
    /// raised downstream of this stage and cancellations are never seen.
    pub fn catch<F, Fut>(self, handler: F) -> Flow<T>
    where
        F: Fn(FlowError, Emitter<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        Flow::from_stage(CatchStage {
            upstream: self,
            handler: Arc::new(move |error: FlowError, emitter: Emitter<T>| -> EmitFuture {
                handler(error, emitter).boxed()
            }),
        })
    }

    /// Call `hook` exactly once when everything above this point is done.
    ///
    /// The cause is `None` on normal completion (including an early stop by
    /// `take`), otherwise the failure or cancellation.
    pub fn on_completion<F>(self, hook: F) -> Flow<T>
    where
        F: Fn(Option<&FlowError>) + Send + Sync + 'static,
    {
        Flow::from_stage(CompletionStage {
            upstream: self,
            hook: Arc::new(hook),
        })
    }
}
