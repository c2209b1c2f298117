//! Channel-backed stages: context redirection and buffering.
//!
//! The upstream runs as a producer on the stage's execution context and
//! sends into a channel; the collecting task receives from the channel and
//! pushes downstream. This is the only place where the context of upstream
//! work changes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, warn};

use crate::error::{CancelCause, FlowError, FlowResult};
use crate::flow::emitter::{EmitFuture, Emitter};
use crate::flow::{Flow, Stage, StageKind};
use crate::runtime::cancel::CancellationToken;
use crate::runtime::channel::{ChannelSpec, Receiver, Sender, channel};
use crate::runtime::context::ExecutionContext;

/// Producer future collecting `upstream` into `tx` under `token`.
///
/// Closes the channel with the upstream's failure, converting a panic into
/// a production failure.
pub(crate) fn produce<T: Send + 'static>(
    upstream: Flow<T>,
    tx: Sender<T>,
    token: CancellationToken,
) -> BoxFuture<'static, ()> {
    let sink = Arc::new(tx.clone());
    let emitter = Emitter::new(token, move |value: T| {
        let sink = Arc::clone(&sink);
        async move { sink.send(value).await }
    });
    async move {
        let result = AssertUnwindSafe(upstream.run(emitter))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                warn!("producer panicked");
                Err(FlowError::panicked(panic))
            });
        tx.complete(result);
    }
    .boxed()
}

/// Push everything received from `rx` downstream.
pub(crate) async fn forward<T: Send + 'static>(
    rx: Receiver<T>,
    downstream: Emitter<T>,
) -> FlowResult<()> {
    while let Some(value) = rx.recv().await? {
        downstream.emit(value).await?;
    }
    Ok(())
}

pub(crate) struct ChannelStage<T> {
    upstream: Flow<T>,
    context: ExecutionContext,
    spec: ChannelSpec,
}

impl<T: Send + 'static> Stage<T> for ChannelStage<T> {
    fn kind(&self) -> StageKind {
        StageKind::Channel {
            context: self.context.name().to_string(),
            spec: self.spec,
        }
    }

    fn lineage(&self, stages: &mut Vec<StageKind>) {
        self.upstream.lineage(stages);
        stages.push(self.kind());
    }

    fn as_channel(&self) -> Option<&ChannelStage<T>> {
        Some(self)
    }

    fn run(&self, downstream: Emitter<T>) -> EmitFuture {
        let upstream = self.upstream.clone();
        let context = self.context.clone();
        let spec = self.spec;
        Box::pin(async move {
            debug!("channel stage starting on '{}' with {spec:?}", context.name());
            let token = downstream.token().clone();
            let producer_token = token.child_token();
            let _release = producer_token.drop_guard();
            let (tx, rx) = channel(spec);

            let mut worker = context.start(produce(upstream, tx, producer_token.clone()));
            let result = worker
                .alongside(token.run_until_cancelled(forward(rx, downstream)))
                .await;

            producer_token.cancel_with(CancelCause::Released);
            worker.join().await;
            debug!("channel stage on '{}' finished", context.name());
            result
        })
    }
}

impl<T: Send + 'static> Flow<T> {
    fn with_channel(&self, context: ExecutionContext, spec: ChannelSpec) -> Flow<T> {
        Flow::from_stage(ChannelStage {
            upstream: self.clone(),
            context,
            spec,
        })
    }

    /// Run everything above this point on `context`.
    ///
    /// Values, their order and the downstream's context are unchanged. The
    /// upstream and the collector are decoupled by a rendezvous channel.
    /// Applied to a stage that already runs on its own context, the inner
    /// context wins.
    pub fn on_context(self, context: ExecutionContext) -> Flow<T> {
        if let Some(existing) = self.stage.as_channel() {
            if !existing.context.is_caller() {
                return self;
            }
            return existing.upstream.with_channel(context, existing.spec);
        }
        if context.is_caller() {
            return self;
        }
        self.with_channel(context, ChannelSpec::RENDEZVOUS)
    }

    /// Let the upstream run ahead of the collector by up to `spec`'s capacity.
    ///
    /// Directly after `on_context`, `buffer` or `conflate` the two channels
    /// fuse into one.
    pub fn buffer(self, spec: ChannelSpec) -> Flow<T> {
        if let Some(existing) = self.stage.as_channel() {
            return existing
                .upstream
                .with_channel(existing.context.clone(), existing.spec.fuse(spec));
        }
        self.with_channel(ExecutionContext::caller(), spec)
    }

    /// Keep only the newest value while the collector is busy.
    ///
    /// Values in between are dropped; order is never changed.
    pub fn conflate(self) -> Flow<T> {
        self.buffer(ChannelSpec::CONFLATED)
    }
}
