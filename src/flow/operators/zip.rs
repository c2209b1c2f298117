//! Pairwise combination of two flows.

use std::sync::Arc;

use futures::FutureExt;

use crate::error::{AbortSignal, CancelCause, FlowError};
use crate::flow::emitter::{EmitFuture, Emitter};
use crate::flow::operators::channel::produce;
use crate::flow::{Flow, Stage, StageKind};
use crate::runtime::channel::{ChannelSpec, channel};
use crate::runtime::context::ExecutionContext;

struct ZipStage<A, B, U> {
    left: Flow<A>,
    right: Flow<B>,
    combine: Arc<dyn Fn(A, B) -> U + Send + Sync>,
}

impl<A, B, U> Stage<U> for ZipStage<A, B, U>
where
    A: Send + 'static,
    B: Send + 'static,
    U: Send + 'static,
{
    fn kind(&self) -> StageKind {
        StageKind::Zip
    }

    fn lineage(&self, stages: &mut Vec<StageKind>) {
        self.left.lineage(stages);
        stages.push(self.kind());
    }

    fn run(&self, downstream: Emitter<U>) -> EmitFuture {
        let left = self.left.clone();
        let right = self.right.clone();
        let combine = Arc::clone(&self.combine);
        Box::pin(async move {
            let right_token = downstream.token().child_token();
            let _release = right_token.drop_guard();
            let (tx, rx) = channel(ChannelSpec::RENDEZVOUS);
            let rx = Arc::new(rx);
            let mut worker =
                ExecutionContext::caller().start(produce(right, tx, right_token.clone()));

            // The left side drives; it is stopped once the right side runs dry.
            let signal = AbortSignal::new();
            let stop = signal.clone();
            let sink = downstream.clone();
            let emitter = downstream.upstream(move |a: A| {
                let rx = Arc::clone(&rx);
                let sink = sink.clone();
                let combine = Arc::clone(&combine);
                let stop = stop.clone();
                async move {
                    match rx.recv().await? {
                        Some(b) => sink.emit(combine(a, b)).await,
                        None => Err(FlowError::Aborted(stop)),
                    }
                }
                .boxed()
            });
            let result = worker.alongside(left.run(emitter)).await;

            right_token.cancel_with(CancelCause::Released);
            worker.join().await;
            match result {
                Err(FlowError::Aborted(raised)) if raised == signal => Ok(()),
                other => other,
            }
        })
    }
}

impl<A: Send + 'static> Flow<A> {
    /// Pair the n-th value of this flow with the n-th value of `other`.
    ///
    /// Ends as soon as either side ends; the other side is cancelled.
    pub fn zip<B, U, F>(self, other: Flow<B>, f: F) -> Flow<U>
    where
        B: Send + 'static,
        U: Send + 'static,
        F: Fn(A, B) -> U + Send + Sync + 'static,
    {
        Flow::from_stage(ZipStage {
            left: self,
            right: other,
            combine: Arc::new(f),
        })
    }
}
