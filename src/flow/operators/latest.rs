//! Operators that abandon in-flight work when a newer value arrives.
//!
//! The work for each value emits into a buffer drained by the collecting
//! side, so superseding a value cancels that work only. The downstream keeps
//! handling whatever was already emitted.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, trace, warn};

use crate::error::{CancelCause, FlowError, FlowResult};
use crate::flow::config::DEFAULT_BUFFER_CAPACITY;
use crate::flow::emitter::{EmitFuture, Emitter};
use crate::flow::operators::channel::{forward, produce};
use crate::flow::{Flow, Stage, StageKind};
use crate::runtime::cancel::CancellationToken;
use crate::runtime::channel::{ChannelSpec, Receiver, Sender, channel};
use crate::runtime::context::ExecutionContext;

type Step<T, U> = Arc<dyn Fn(T, Emitter<U>) -> EmitFuture + Send + Sync>;

struct LatestStage<T, U> {
    kind: StageKind,
    upstream: Flow<T>,
    step: Step<T, U>,
}

impl<T, U> Stage<U> for LatestStage<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn kind(&self) -> StageKind {
        self.kind.clone()
    }

    fn lineage(&self, stages: &mut Vec<StageKind>) {
        self.upstream.lineage(stages);
        stages.push(self.kind());
    }

    fn run(&self, downstream: Emitter<U>) -> EmitFuture {
        let upstream = self.upstream.clone();
        let step = Arc::clone(&self.step);
        let kind = self.kind();
        Box::pin(async move {
            let token = downstream.token().clone();
            let producer_token = token.child_token();
            let _release = producer_token.drop_guard();
            let (tx, rx) = channel(ChannelSpec::RENDEZVOUS);
            let (out_tx, out_rx) = channel(ChannelSpec::bounded(DEFAULT_BUFFER_CAPACITY));

            let follower = {
                let items = producer_token.clone();
                async move {
                    let sink = Arc::new(out_tx.clone());
                    let result = AssertUnwindSafe(follow_latest(rx, step, sink, items))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            warn!("{kind:?} step panicked");
                            Err(FlowError::panicked(panic))
                        });
                    out_tx.complete(result);
                }
            };
            let producer = produce(upstream, tx, producer_token.clone());

            debug!("latest-value stage starting");
            let mut worker = ExecutionContext::caller()
                .start(futures::future::join(producer, follower).map(|_| ()).boxed());
            let result = worker
                .alongside(token.run_until_cancelled(forward(out_rx, downstream)))
                .await;

            producer_token.cancel_with(CancelCause::Released);
            worker.join().await;
            result
        })
    }
}

/// Run `step` for each received value, cancelling it as soon as the next
/// value arrives. A cancelled step is still polled until it winds down so
/// its completion hooks run. The step for the last value runs to the end.
async fn follow_latest<T, U>(
    rx: Receiver<T>,
    step: Step<T, U>,
    sink: Arc<Sender<U>>,
    token: CancellationToken,
) -> FlowResult<()>
where
    T: Send + 'static,
    U: Send + 'static,
{
    let mut next = rx.recv().await?;
    while let Some(value) = next.take() {
        let item_token = token.child_token();
        let emitter = {
            let sink = Arc::clone(&sink);
            Emitter::new(item_token.clone(), move |value: U| {
                let sink = Arc::clone(&sink);
                async move { sink.send(value).await }
            })
            .checked()
        };
        let work = item_token.run_until_cancelled(step(value, emitter));
        tokio::pin!(work);

        tokio::select! {
            biased;
            result = &mut work => {
                result?;
                next = rx.recv().await?;
            }
            received = rx.recv() => match received {
                Ok(Some(newer)) => {
                    trace!("newer value arrived, cancelling in-flight work");
                    item_token.cancel_with(CancelCause::Superseded);
                    match work.await {
                        Err(error) if !error.is_cancellation() => return Err(error),
                        _ => next = Some(newer),
                    }
                }
                Ok(None) => work.await?,
                Err(error) => {
                    let cause = error
                        .failure_cause()
                        .cloned()
                        .map_or(CancelCause::Released, CancelCause::Failed);
                    item_token.cancel_with(cause);
                    let _ = work.await;
                    return Err(error);
                }
            },
        }
    }
    Ok(())
}

impl<T: Send + 'static> Flow<T> {
    fn latest<U, F>(self, kind: StageKind, step: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T, Emitter<U>) -> EmitFuture + Send + Sync + 'static,
    {
        Flow::from_stage(LatestStage {
            kind,
            upstream: self,
            step: Arc::new(step),
        })
    }

    /// Like `transform`, but the block running for a value is cancelled when
    /// the upstream produces the next one.
    pub fn transform_latest<U, F, Fut>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T, Emitter<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        self.latest(StageKind::TransformLatest, move |value, downstream| {
            f(value, downstream).boxed()
        })
    }

    /// Suspending map whose pending computation is dropped for newer values.
    pub fn map_latest<U, E, F, Fut>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        E: Into<FlowError>,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
    {
        self.latest(StageKind::TransformLatest, move |value, downstream| {
            let pending = f(value);
            async move {
                let mapped = pending.await.map_err(Into::<FlowError>::into)?;
                downstream.emit(mapped).await
            }
            .boxed()
        })
    }

    /// Collect only the flow built for the most recent value; the previous
    /// inner flow is cancelled when a new value arrives.
    pub fn flat_map_latest<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        self.latest(StageKind::FlatMapLatest, move |value, downstream| {
            f(value).run(downstream)
        })
    }
}
