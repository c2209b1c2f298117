//! Async task and stream handles for detached flow collection.
//!
//! Channel-based design: the detached side owns the sender, the handle owns
//! the receiver.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::FlowResult;
use crate::runtime::cancel::CancelOnDrop;

// ============================================================================
// AsyncTask - Single-result async operation
// ============================================================================

/// A handle to an asynchronous task that produces a single result.
///
/// Uses oneshot channel internally for efficient one-time communication.
pub struct AsyncTask<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> AsyncTask<T>
where
    T: Send + 'static,
{
    /// Create from oneshot receiver.
    #[inline]
    #[must_use]
    pub fn new(rx: oneshot::Receiver<T>) -> Self {
        Self { rx }
    }
}

impl<T> Future for AsyncTask<T> {
    type Output = Result<T, oneshot::error::RecvError>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx)
    }
}

// ============================================================================
// AsyncStream - Pull-based view of a flow collection
// ============================================================================

/// A handle to a flow being collected in the background.
///
/// Yields every value as `Ok`, then a final `Err` if the collection failed
/// or was cancelled. Dropping the handle cancels the collection.
pub struct AsyncStream<T> {
    inner: ReceiverStream<FlowResult<T>>,
    _cancel: CancelOnDrop,
}

impl<T> AsyncStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<FlowResult<T>>, cancel: CancelOnDrop) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            _cancel: cancel,
        }
    }
}

impl<T> Stream for AsyncStream<T> {
    type Item = FlowResult<T>;

    #[inline]
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
