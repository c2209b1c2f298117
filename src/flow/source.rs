//! Flow builders.

use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::error::FlowResult;
use crate::flow::emitter::{EmitFuture, Emitter};
use crate::flow::{Flow, SourceKind, Stage, StageKind};

type Producer<T> = Arc<dyn Fn(Emitter<T>) -> EmitFuture + Send + Sync>;

/// Leaf stage running a producer closure.
///
/// The producer is raced against the collection token, so it stops at its
/// next suspension point once the token is triggered. A producer that never
/// suspends runs to completion.
struct SourceStage<T> {
    kind: SourceKind,
    producer: Producer<T>,
}

impl<T: Send + 'static> Stage<T> for SourceStage<T> {
    fn kind(&self) -> StageKind {
        StageKind::Source(self.kind)
    }

    fn lineage(&self, stages: &mut Vec<StageKind>) {
        stages.push(self.kind());
    }

    fn run(&self, downstream: Emitter<T>) -> EmitFuture {
        let producer = Arc::clone(&self.producer);
        Box::pin(async move {
            let token = downstream.token().clone();
            token.run_until_cancelled(producer(downstream)).await
        })
    }
}

/// Build a flow from a producer closure.
///
/// The closure runs once per collection. Its emitter checks the
/// collection's token before and after each `emit`.
///
/// ```rust,no_run
/// use kodegen_flow::{CancellationToken, flow};
/// use std::time::Duration;
///
/// # async fn demo() {
/// let numbers = flow(|emitter| async move {
///     for i in 1..=3 {
///         tokio::time::sleep(Duration::from_millis(100)).await;
///         emitter.emit(i).await?;
///     }
///     Ok(())
/// });
/// let values = numbers.to_vec(&CancellationToken::new()).await;
/// # }
/// ```
pub fn flow<T, F, Fut>(producer: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(Emitter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FlowResult<()>> + Send + 'static,
{
    Flow::from_stage(SourceStage {
        kind: SourceKind::Builder,
        producer: Arc::new(move |emitter: Emitter<T>| -> EmitFuture {
            Box::pin(producer(emitter.checked()))
        }),
    })
}

impl<T: Send + 'static> Flow<T> {
    /// Emit the values of an in-memory sequence in order.
    ///
    /// The sequence is cloned for every collection. No cancellation check
    /// happens between values; add `cancellable()` for that.
    pub fn iter<I>(values: I) -> Flow<T>
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send,
    {
        Flow::from_stage(SourceStage {
            kind: SourceKind::Iter,
            producer: Arc::new(move |emitter: Emitter<T>| -> EmitFuture {
                let values = values.clone();
                Box::pin(async move {
                    for value in values {
                        emitter.emit(value).await?;
                    }
                    Ok(())
                })
            }),
        })
    }

    /// A flow that completes without emitting.
    #[must_use]
    pub fn empty() -> Flow<T> {
        Flow::from_stage(SourceStage {
            kind: SourceKind::Empty,
            producer: Arc::new(|_emitter: Emitter<T>| -> EmitFuture { Box::pin(async { Ok(()) }) }),
        })
    }

    /// Emit the items of a stream built fresh for every collection.
    pub fn from_stream<S, F>(factory: F) -> Flow<T>
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        Flow::from_stage(SourceStage {
            kind: SourceKind::Stream,
            producer: Arc::new(move |emitter: Emitter<T>| -> EmitFuture {
                let stream = factory();
                Box::pin(async move {
                    let mut stream = std::pin::pin!(stream);
                    while let Some(value) = stream.next().await {
                        emitter.emit(value).await?;
                    }
                    Ok(())
                })
            }),
        })
    }
}
