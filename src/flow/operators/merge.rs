//! Concurrent flattening.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, warn};
use tokio::sync::Semaphore;

use crate::error::{CancelCause, FlowError};
use crate::flow::config::DEFAULT_BUFFER_CAPACITY;
use crate::flow::emitter::{EmitFuture, Emitter};
use crate::flow::operators::channel::{forward, produce};
use crate::flow::{Flow, Stage, StageKind};
use crate::runtime::channel::{ChannelSpec, channel};
use crate::runtime::context::ExecutionContext;
use crate::runtime::scope::TaskList;

type Inner<T, U> = Arc<dyn Fn(T) -> Flow<U> + Send + Sync>;

/// Collects up to `concurrency` inner flows at once into a shared channel.
///
/// The outer flow is driven by a coordinator polled alongside the
/// collector. Each inner flow runs as its own task on a child of the
/// group token, so a failure anywhere cancels every sibling.
struct MergeStage<T, U> {
    upstream: Flow<T>,
    concurrency: usize,
    buffer: ChannelSpec,
    inner: Inner<T, U>,
}

impl<T, U> Stage<U> for MergeStage<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn kind(&self) -> StageKind {
        StageKind::FlatMapMerge {
            concurrency: self.concurrency,
        }
    }

    fn lineage(&self, stages: &mut Vec<StageKind>) {
        self.upstream.lineage(stages);
        stages.push(self.kind());
    }

    fn run(&self, downstream: Emitter<U>) -> EmitFuture {
        let upstream = self.upstream.clone();
        let inner = Arc::clone(&self.inner);
        let concurrency = self.concurrency;
        let buffer = self.buffer;
        Box::pin(async move {
            let token = downstream.token().clone();
            let group = token.child_token();
            let _release = group.drop_guard();
            let (tx, rx) = channel(buffer);
            let permits = Arc::new(Semaphore::new(concurrency));
            let running = Arc::new(TaskList::default());

            let launcher = {
                let tx = tx.clone();
                let group = group.clone();
                let running = Arc::clone(&running);
                Emitter::new(group.clone(), move |value: T| {
                    let permits = Arc::clone(&permits);
                    let running = Arc::clone(&running);
                    let tx = tx.clone();
                    let child = group.child_token();
                    let flow = inner(value);
                    async move {
                        let permit = permits
                            .acquire_owned()
                            .await
                            .map_err(|_| FlowError::released())?;
                        let handle = ExecutionContext::caller().spawn(async move {
                            produce(flow, tx, child).await;
                            drop(permit);
                        });
                        running.push(handle);
                        Ok(())
                    }
                })
            };
            let coordinator = async move {
                let result = AssertUnwindSafe(upstream.run(launcher))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        warn!("flat_map_merge upstream panicked");
                        Err(FlowError::panicked(panic))
                    });
                tx.complete(result);
            }
            .boxed();

            debug!("flat_map_merge starting with concurrency {concurrency}");
            let mut worker = ExecutionContext::caller().start(coordinator);
            let result = worker
                .alongside(token.run_until_cancelled(forward(rx, downstream)))
                .await;

            group.cancel_with(CancelCause::Released);
            worker.join().await;
            for handle in running.drain() {
                if let Err(e) = handle.await {
                    warn!("inner flow task ended abnormally: {e}");
                }
            }
            result
        })
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Collect the flow built for each value concurrently, at most
    /// `concurrency` at a time, emitting values as they arrive.
    ///
    /// A `concurrency` of zero is treated as one.
    pub fn flat_map_merge<U, F>(self, concurrency: usize, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        if concurrency == 0 {
            warn!("flat_map_merge concurrency must be at least 1, using 1");
        }
        self.flat_map_merge_with(
            concurrency.max(1),
            ChannelSpec::bounded(DEFAULT_BUFFER_CAPACITY),
            f,
        )
    }

    /// `flat_map_merge` with an explicit spec for the shared result channel.
    pub fn flat_map_merge_with<U, F>(self, concurrency: usize, buffer: ChannelSpec, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        Flow::from_stage(MergeStage {
            upstream: self,
            concurrency: concurrency.max(1),
            buffer,
            inner: Arc::new(f),
        })
    }
}
