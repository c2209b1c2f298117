//! Per-item operators: map, filter, transform and friends.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;

use crate::error::{FlowError, FlowResult};
use crate::flow::emitter::{EmitFuture, Emitter};
use crate::flow::{Flow, Stage, StageKind};

type Step<T, U> = Arc<dyn Fn(T, Emitter<U>) -> EmitFuture + Send + Sync>;

/// A stage that turns each upstream value into zero or more downstream
/// values, tagged with the operator that built it.
pub(crate) struct TransformStage<T, U> {
    kind: StageKind,
    upstream: Flow<T>,
    step: Step<T, U>,
}

impl<T, U> Stage<U> for TransformStage<T, U>
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
        Box::pin(async move {
            let sink = downstream.clone();
            let emitter = downstream.upstream(move |value: T| step(value, sink.clone()));
            upstream.run(emitter).await
        })
    }
}

impl<T: Send + 'static> Flow<T> {
    pub(crate) fn step<U, F>(self, kind: StageKind, step: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T, Emitter<U>) -> EmitFuture + Send + Sync + 'static,
    {
        Flow::from_stage(TransformStage {
            kind,
            upstream: self,
            step: Arc::new(step),
        })
    }

    /// Apply `f` to every value.
    pub fn map<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.step(StageKind::Map, move |value, downstream| {
            let mapped = f(value);
            async move { downstream.emit(mapped).await }.boxed()
        })
    }

    /// Apply a fallible `f`; an error fails the collection as a production
    /// failure.
    pub fn try_map<U, E, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        E: Into<FlowError>,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        self.step(StageKind::Map, move |value, downstream| {
            let mapped = f(value).map_err(Into::<FlowError>::into);
            async move { downstream.emit(mapped?).await }.boxed()
        })
    }

    /// Apply a suspending, fallible `f`.
    pub fn then<U, E, F, Fut>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        E: Into<FlowError>,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
    {
        self.step(StageKind::Map, move |value, downstream| {
            let pending = f(value);
            async move {
                let mapped = pending.await.map_err(Into::<FlowError>::into)?;
                downstream.emit(mapped).await
            }
            .boxed()
        })
    }

    /// Keep the values matching `predicate`.
    pub fn filter<F>(self, predicate: F) -> Flow<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.step(StageKind::Filter, move |value, downstream| {
            if predicate(&value) {
                async move { downstream.emit(value).await }.boxed()
            } else {
                futures::future::ready(Ok(())).boxed()
            }
        })
    }

    /// General per-item operator: `f` may emit any number of values for
    /// each upstream value.
    pub fn transform<U, F, Fut>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T, Emitter<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        self.step(StageKind::Transform, move |value, downstream| {
            f(value, downstream).boxed()
        })
    }

    /// Run a side effect for each value before passing it on.
    ///
    /// A failure raised here is an ordinary production failure.
    pub fn on_each<E, F, Fut>(self, f: F) -> Flow<T>
    where
        E: Into<FlowError>,
        F: Fn(&T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.step(StageKind::OnEach, move |value, downstream| {
            let effect = f(&value);
            async move {
                effect.await.map_err(Into::<FlowError>::into)?;
                downstream.emit(value).await
            }
            .boxed()
        })
    }

    /// Check the collection token before passing each value on.
    pub fn cancellable(self) -> Flow<T> {
        self.step(StageKind::Cancellable, |value, downstream| {
            async move {
                downstream.ensure_active()?;
                downstream.emit(value).await
            }
            .boxed()
        })
    }

    /// Collect the flow built for each value to completion before taking
    /// the next value.
    pub fn flat_map_concat<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        self.step(StageKind::FlatMapConcat, move |value, downstream| {
            f(value).run(downstream)
        })
    }
}
