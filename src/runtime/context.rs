//! Execution contexts: where producer work runs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, warn};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ContextError;

const CALLER: &str = "caller";

/// Owns a runtime created for a context and shuts it down with the last handle.
enum RuntimeOwner {
    Pool(Option<Runtime>),
    Dedicated(Option<oneshot::Sender<()>>),
}

impl Drop for RuntimeOwner {
    fn drop(&mut self) {
        match self {
            RuntimeOwner::Pool(runtime) => {
                if let Some(runtime) = runtime.take() {
                    runtime.shutdown_background();
                }
            }
            RuntimeOwner::Dedicated(shutdown) => {
                if let Some(shutdown) = shutdown.take() {
                    let _ = shutdown.send(());
                }
            }
        }
    }
}

#[derive(Clone)]
enum Inner {
    Caller,
    Runtime {
        name: Arc<str>,
        handle: Handle,
        _owner: Option<Arc<RuntimeOwner>>,
    },
}

/// Where a producer runs.
///
/// Cloning is cheap. Contexts built with `pool` or `dedicated` own their
/// runtime; it shuts down once every clone is dropped.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Inner,
}

impl ExecutionContext {
    /// Run producers inside the collecting task, polled alongside the consumer.
    #[must_use]
    pub fn caller() -> Self {
        Self {
            inner: Inner::Caller,
        }
    }

    /// The tokio runtime driving the current thread.
    pub fn current() -> Result<Self, ContextError> {
        let handle = Handle::try_current().map_err(|_| ContextError::NoRuntime)?;
        Ok(Self::from_handle("current", handle))
    }

    /// Wrap an existing runtime handle.
    #[must_use]
    pub fn from_handle(name: impl Into<Arc<str>>, handle: Handle) -> Self {
        Self {
            inner: Inner::Runtime {
                name: name.into(),
                handle,
                _owner: None,
            },
        }
    }

    /// A dedicated multi-thread pool whose worker threads carry `name`.
    pub fn pool(name: impl Into<Arc<str>>, workers: usize) -> Result<Self, ContextError> {
        let name = name.into();
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name(name.to_string())
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        debug!("started pool context '{name}' with {} workers", workers.max(1));
        Ok(Self {
            inner: Inner::Runtime {
                name,
                handle,
                _owner: Some(Arc::new(RuntimeOwner::Pool(Some(runtime)))),
            },
        })
    }

    /// A single OS thread named `name` running a current-thread runtime.
    pub fn dedicated(name: impl Into<Arc<str>>) -> Result<Self, ContextError> {
        let name = name.into();
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|_| ContextError::ThreadExited(name.to_string()))??;
        debug!("started dedicated context '{name}'");
        Ok(Self {
            inner: Inner::Runtime {
                name,
                handle,
                _owner: Some(Arc::new(RuntimeOwner::Dedicated(Some(shutdown_tx)))),
            },
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match &self.inner {
            Inner::Caller => CALLER,
            Inner::Runtime { name, .. } => name,
        }
    }

    #[must_use]
    pub fn is_caller(&self) -> bool {
        matches!(self.inner, Inner::Caller)
    }

    /// Spawn a detached task. The caller context spawns onto the ambient
    /// runtime since a task cannot detach from itself.
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match &self.inner {
            Inner::Caller => tokio::spawn(future),
            Inner::Runtime { handle, .. } => handle.spawn(future),
        }
    }

    /// Start a producer for a channel-backed stage.
    pub(crate) fn start(&self, producer: BoxFuture<'static, ()>) -> Worker {
        match &self.inner {
            Inner::Caller => Worker::Local {
                producer,
                done: false,
            },
            Inner::Runtime { handle, .. } => Worker::Spawned(handle.spawn(producer)),
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExecutionContext").field(&self.name()).finish()
    }
}

/// A running producer owned by one stage for one collection.
pub(crate) enum Worker {
    Local {
        producer: BoxFuture<'static, ()>,
        done: bool,
    },
    Spawned(JoinHandle<()>),
}

impl Worker {
    /// Drive `consumer` to completion, polling a local producer alongside it.
    pub(crate) async fn alongside<F: Future>(&mut self, consumer: F) -> F::Output {
        let Worker::Local { producer, done } = self else {
            return consumer.await;
        };
        tokio::pin!(consumer);
        loop {
            tokio::select! {
                biased;
                output = &mut consumer => return output,
                () = producer.as_mut(), if !*done => *done = true,
            }
        }
    }

    /// Wait for the producer to wind down.
    pub(crate) async fn join(self) {
        match self {
            Worker::Local { producer, done } => {
                if !done {
                    producer.await;
                }
            }
            Worker::Spawned(handle) => {
                if let Err(e) = handle.await {
                    warn!("producer task ended abnormally: {e}");
                }
            }
        }
    }
}
