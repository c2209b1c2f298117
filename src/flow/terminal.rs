//! Terminal operators: the only way to start a flow.
//!
//! Every terminal runs one execution instance under a child of the given
//! token and settles its outcome into a `Completion` or `FlowResult`.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::mpsc;

use crate::error::{FlowError, FlowResult};
use crate::flow::completion::Completion;
use crate::flow::emitter::Emitter;
use crate::flow::Flow;
use crate::runtime::async_task::AsyncStream;
use crate::runtime::cancel::CancellationToken;
use crate::runtime::scope::{Job, Scope};

impl<T: Send + 'static> Flow<T> {
    /// Collect every value with `on_each` and report how the collection
    /// ended.
    ///
    /// A failure returned by `on_each` is reported as a consumption failure
    /// and passes through every `catch` stage untouched.
    pub async fn collect<F, Fut>(&self, on_each: F, token: &CancellationToken) -> Completion
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        let collection = token.child_token();
        let _release = collection.drop_guard();
        let on_each = Arc::new(Mutex::new(on_each));
        let emitter = Emitter::new(collection.clone(), move |value: T| {
            let pending = {
                let mut on_each = on_each.lock().unwrap_or_else(PoisonError::into_inner);
                (*on_each)(value)
            };
            async move { pending.await.map_err(FlowError::into_consumption) }
        });

        let result = self.run(emitter).await;
        let completion = Completion::settle(result, &collection);
        debug!("collection finished: {completion:?}");
        completion
    }

    /// Run the flow for its side effects only.
    pub async fn drain(&self, token: &CancellationToken) -> Completion {
        self.collect(|_| futures::future::ready(Ok(())), token).await
    }

    /// Collect with `action`, cancelling the running action whenever a newer
    /// value arrives.
    pub async fn collect_latest<F, Fut>(&self, action: F, token: &CancellationToken) -> Completion
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        let action = Arc::new(action);
        self.clone()
            .transform_latest(move |value, _downstream: Emitter<()>| {
                let pending = action(value);
                async move { pending.await.map_err(FlowError::into_consumption) }
            })
            .drain(token)
            .await
    }

    /// Gather every value into a vector.
    pub async fn to_vec(&self, token: &CancellationToken) -> FlowResult<Vec<T>> {
        let gathered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&gathered);
        self.collect(
            move |value| {
                sink.lock().unwrap_or_else(PoisonError::into_inner).push(value);
                futures::future::ready(Ok(()))
            },
            token,
        )
        .await
        .into_result()?;
        let values = std::mem::take(&mut *gathered.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(values)
    }

    /// Accumulate every value into `init` with `f`.
    pub async fn fold<A, F>(&self, init: A, f: F, token: &CancellationToken) -> FlowResult<A>
    where
        A: Send + 'static,
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        let state = Arc::new(Mutex::new(Some(init)));
        let acc = Arc::clone(&state);
        self.collect(
            move |value| {
                let mut acc = acc.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(current) = acc.take() {
                    *acc = Some(f(current, value));
                }
                futures::future::ready(Ok(()))
            },
            token,
        )
        .await
        .into_result()?;
        let folded = state.lock().unwrap_or_else(PoisonError::into_inner).take();
        folded.ok_or_else(|| FlowError::failure("fold accumulator was lost"))
    }

    /// Combine values pairwise with `f`; `None` for an empty flow.
    pub async fn reduce<F>(&self, f: F, token: &CancellationToken) -> FlowResult<Option<T>>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.fold(
            None,
            move |acc, value| match acc {
                None => Some(value),
                Some(acc) => Some(f(acc, value)),
            },
            token,
        )
        .await
    }

    /// The first value, stopping the producer right after it.
    pub async fn first(&self, token: &CancellationToken) -> FlowResult<Option<T>> {
        let mut values = self.clone().take(1).to_vec(token).await?;
        Ok(values.pop())
    }

    /// Collect in a background task and expose the values as a `Stream`.
    ///
    /// The stream yields every value as `Ok`, then one `Err` if the
    /// collection did not end normally. Dropping the stream cancels the
    /// collection. Must be called from within a tokio runtime.
    pub fn into_stream(self) -> AsyncStream<T> {
        let token = CancellationToken::new();
        let cancel = token.drop_guard();
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let sink = tx.clone();
            let completion = self
                .collect(
                    move |value| {
                        let sink = sink.clone();
                        async move {
                            sink.send(Ok(value))
                                .await
                                .map_err(|_| FlowError::released())
                        }
                    },
                    &token,
                )
                .await;
            if let Some(error) = completion.cause() {
                let _ = tx.send(Err(error)).await;
            }
        });
        AsyncStream::new(rx, cancel)
    }

    /// Start collecting as a job of `scope` without waiting for it.
    pub fn launch_in(self, scope: &Scope) -> Job {
        scope.launch(move |token| async move { self.drain(&token).await })
    }
}
