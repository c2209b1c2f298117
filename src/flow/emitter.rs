//! Emitter: the capability handed to producers for pushing values downstream.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::FlowResult;
use crate::runtime::cancel::CancellationToken;

/// Future returned by every push into the stage chain.
pub(crate) type EmitFuture = BoxFuture<'static, FlowResult<()>>;

type Sink<T> = Arc<dyn Fn(T) -> EmitFuture + Send + Sync>;

/// Pushes values into the next stage of a collection.
///
/// `emit` returns once every downstream stage has processed the value,
/// unless a buffering stage sits in between. Emitters handed to `flow`
/// producers check the collection's token before and after each push;
/// emitters used inside operators do not.
pub struct Emitter<T> {
    sink: Sink<T>,
    token: CancellationToken,
    checked: bool,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            token: self.token.clone(),
            checked: self.checked,
        }
    }
}

impl<T: Send + 'static> Emitter<T> {
    pub(crate) fn new<F, Fut>(token: CancellationToken, sink: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        Self {
            sink: Arc::new(move |value| -> EmitFuture { Box::pin(sink(value)) }),
            token,
            checked: false,
        }
    }

    /// Emitter for the stage above this one, bound to the same token.
    pub(crate) fn upstream<U, F>(&self, sink: F) -> Emitter<U>
    where
        U: Send + 'static,
        F: Fn(U) -> EmitFuture + Send + Sync + 'static,
    {
        Emitter {
            sink: Arc::new(sink),
            token: self.token.clone(),
            checked: false,
        }
    }

    pub(crate) fn checked(mut self) -> Self {
        self.checked = true;
        self
    }

    /// Push one value downstream.
    pub async fn emit(&self, value: T) -> FlowResult<()> {
        if self.checked {
            self.token.ensure_active()?;
        }
        (self.sink)(value).await?;
        if self.checked {
            self.token.ensure_active()?;
        }
        Ok(())
    }

    /// Push every value in order, stopping at the first failure.
    pub async fn emit_all<I>(&self, values: I) -> FlowResult<()>
    where
        I: IntoIterator<Item = T>,
    {
        for value in values {
            self.emit(value).await?;
        }
        Ok(())
    }

    /// Token of the collection this emitter belongs to.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail with `Cancelled` if the collection has been cancelled.
    pub fn ensure_active(&self) -> FlowResult<()> {
        self.token.ensure_active()
    }
}
