//! Size-limiting operator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;

use crate::error::{AbortSignal, FlowError};
use crate::flow::emitter::{EmitFuture, Emitter};
use crate::flow::{Flow, Stage, StageKind};

struct TakeStage<T> {
    upstream: Flow<T>,
    count: usize,
}

impl<T: Send + 'static> Stage<T> for TakeStage<T> {
    fn kind(&self) -> StageKind {
        StageKind::Take(self.count)
    }

    fn lineage(&self, stages: &mut Vec<StageKind>) {
        self.upstream.lineage(stages);
        stages.push(self.kind());
    }

    fn run(&self, downstream: Emitter<T>) -> EmitFuture {
        let upstream = self.upstream.clone();
        let count = self.count;
        Box::pin(async move {
            if count == 0 {
                return Ok(());
            }
            let signal = AbortSignal::new();
            let stop = signal.clone();
            let seen = Arc::new(AtomicUsize::new(0));
            let sink = downstream.clone();
            let emitter = downstream.upstream(move |value: T| {
                let sink = sink.clone();
                let stop = stop.clone();
                let position = seen.fetch_add(1, Ordering::AcqRel) + 1;
                async move {
                    if position <= count {
                        sink.emit(value).await?;
                    }
                    if position >= count {
                        Err(FlowError::Aborted(stop))
                    } else {
                        Ok(())
                    }
                }
                .boxed()
            });

            match upstream.run(emitter).await {
                Err(FlowError::Aborted(raised)) if raised == signal => Ok(()),
                other => other,
            }
        })
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Emit the first `count` values, then stop the upstream producer.
    ///
    /// Stopping is not a failure: the producer's `emit` fails with an
    /// internal abort signal that only this stage consumes.
    pub fn take(self, count: usize) -> Flow<T> {
        Flow::from_stage(TakeStage {
            upstream: self,
            count,
        })
    }
}
