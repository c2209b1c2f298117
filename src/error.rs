//! Error types for flow collection, execution contexts and configuration

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for flow operations
pub type FlowResult<T> = Result<T, FlowError>;

/// A shareable failure cause.
///
/// Cloning is cheap (Arc clone), so the same cause can be handed to a
/// completion hook, a `catch` handler and the collector.
#[derive(Clone)]
pub struct Failure(Arc<anyhow::Error>);

impl Failure {
    /// Wrap any error convertible into `anyhow::Error`.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(error.into()))
    }

    /// Build a failure from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Attempt to view the underlying error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::msg(format!("producer panicked: {message}"))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Failure").field(&self.0.to_string()).finish()
    }
}

/// Why a cancellation token was triggered
#[derive(Debug, Clone)]
pub enum CancelCause {
    /// `cancel()` without a reason
    Requested,

    /// Cancelled with a caller supplied reason
    Reason(Arc<str>),

    /// A deadline set with `cancel_after` elapsed
    TimedOut(Duration),

    /// A sibling job failed and took its scope down
    Failed(Failure),

    /// The consuming side of an operator went away
    Released,

    /// A newer upstream item replaced the in-flight work
    Superseded,
}

impl CancelCause {
    /// Cancellation with a free-form reason.
    pub fn reason(reason: impl Into<Arc<str>>) -> Self {
        CancelCause::Reason(reason.into())
    }
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Requested => f.write_str("cancellation requested"),
            CancelCause::Reason(reason) => f.write_str(reason),
            CancelCause::TimedOut(after) => write!(f, "timed out after {after:?}"),
            CancelCause::Failed(failure) => write!(f, "scope failed: {failure}"),
            CancelCause::Released => f.write_str("consumer released the producer"),
            CancelCause::Superseded => f.write_str("superseded by a newer value"),
        }
    }
}

/// Identity of an early-stop request raised by a downstream stage.
///
/// Only the stage that created the signal treats it as a normal stop.
#[derive(Debug, Clone)]
pub struct AbortSignal(Arc<()>);

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self(Arc::new(()))
    }
}

impl PartialEq for AbortSignal {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for AbortSignal {}

/// Error types for flow collection
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// Raised inside a producer or an upstream transform
    #[error("production failed: {0}")]
    Production(Failure),

    /// Raised inside the terminal collect callback
    #[error("consumption failed: {0}")]
    Consumption(Failure),

    /// The collection's cancellation token was triggered
    #[error("cancelled: {0}")]
    Cancelled(CancelCause),

    /// A downstream stage asked the producer to stop early
    #[error("collection aborted by a downstream stage")]
    Aborted(AbortSignal),
}

impl FlowError {
    /// Production failure from a plain message.
    pub fn failure<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        FlowError::Production(Failure::msg(message))
    }

    /// True for cancellation, which recovery logic must never intercept.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FlowError::Cancelled(_))
    }

    /// The underlying cause for production and consumption failures.
    #[must_use]
    pub fn failure_cause(&self) -> Option<&Failure> {
        match self {
            FlowError::Production(failure) | FlowError::Consumption(failure) => Some(failure),
            FlowError::Cancelled(_) | FlowError::Aborted(_) => None,
        }
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        FlowError::Production(Failure::from_panic(payload))
    }

    pub(crate) fn released() -> Self {
        FlowError::Cancelled(CancelCause::Released)
    }

    /// Re-label a failure raised by the terminal callback.
    pub(crate) fn into_consumption(self) -> Self {
        match self {
            FlowError::Production(failure) => FlowError::Consumption(failure),
            other => other,
        }
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<FlowError>() {
            Ok(flow) => flow,
            Err(other) => FlowError::Production(Failure::new(other)),
        }
    }
}

impl From<Failure> for FlowError {
    fn from(failure: Failure) -> Self {
        FlowError::Production(failure)
    }
}

/// Errors raised while building execution contexts
#[derive(Debug, Error)]
pub enum ContextError {
    /// Runtime or thread creation failed
    #[error("Runtime setup failed: {0}")]
    Io(#[from] std::io::Error),

    /// The dedicated thread exited before publishing its runtime handle
    #[error("Dedicated thread '{0}' exited during startup")]
    ThreadExited(String),

    /// `current()` was called outside a tokio runtime
    #[error("No tokio runtime is active on this thread")]
    NoRuntime,
}

/// Errors raised while loading `FlowConfig`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
