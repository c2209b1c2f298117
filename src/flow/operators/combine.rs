//! Latest-value combination of two flows.

use std::sync::Arc;

use futures::FutureExt;

use crate::error::{CancelCause, FlowResult};
use crate::flow::emitter::{EmitFuture, Emitter};
use crate::flow::operators::channel::produce;
use crate::flow::{Flow, Stage, StageKind};
use crate::runtime::channel::{ChannelSpec, Receiver, channel};
use crate::runtime::context::ExecutionContext;

enum Side<A, B> {
    Left(A),
    Right(B),
}

type Combiner<A, B, U> = Arc<dyn Fn(&A, &B) -> U + Send + Sync>;

struct CombineStage<A, B, U> {
    left: Flow<A>,
    right: Flow<B>,
    combine: Combiner<A, B, U>,
}

impl<A, B, U> Stage<U> for CombineStage<A, B, U>
where
    A: Send + 'static,
    B: Send + 'static,
    U: Send + 'static,
{
    fn kind(&self) -> StageKind {
        StageKind::Combine
    }

    fn lineage(&self, stages: &mut Vec<StageKind>) {
        self.left.lineage(stages);
        stages.push(self.kind());
    }

    fn run(&self, downstream: Emitter<U>) -> EmitFuture {
        let left = self.left.clone().map(Side::<A, B>::Left);
        let right = self.right.clone().map(Side::<A, B>::Right);
        let combine = Arc::clone(&self.combine);
        Box::pin(async move {
            let token = downstream.token().clone();
            let sides_token = token.child_token();
            let _release = sides_token.drop_guard();
            let (tx, rx) = channel(ChannelSpec::RENDEZVOUS);

            let left = produce(left, tx.clone(), sides_token.clone());
            let right = produce(right, tx, sides_token.clone());
            let mut worker = ExecutionContext::caller().start(
                async move {
                    futures::join!(left, right);
                }
                .boxed(),
            );
            let result = worker
                .alongside(token.run_until_cancelled(combine_latest(rx, combine, downstream)))
                .await;

            sides_token.cancel_with(CancelCause::Released);
            worker.join().await;
            result
        })
    }
}

async fn combine_latest<A, B, U>(
    rx: Receiver<Side<A, B>>,
    combine: Combiner<A, B, U>,
    downstream: Emitter<U>,
) -> FlowResult<()>
where
    U: Send + 'static,
{
    let mut left = None;
    let mut right = None;
    while let Some(side) = rx.recv().await? {
        match side {
            Side::Left(a) => left = Some(a),
            Side::Right(b) => right = Some(b),
        }
        let combined = match (&left, &right) {
            (Some(a), Some(b)) => Some(combine(a, b)),
            _ => None,
        };
        if let Some(value) = combined {
            downstream.emit(value).await?;
        }
    }
    Ok(())
}

impl<A: Send + 'static> Flow<A> {
    /// Emit `f(latest_a, latest_b)` whenever either side produces, once both
    /// sides have produced at least one value.
    ///
    /// Ends when both sides have ended.
    pub fn combine<B, U, F>(self, other: Flow<B>, f: F) -> Flow<U>
    where
        B: Send + 'static,
        U: Send + 'static,
        F: Fn(&A, &B) -> U + Send + Sync + 'static,
    {
        Flow::from_stage(CombineStage {
            left: self,
            right: other,
            combine: Arc::new(f),
        })
    }
}
