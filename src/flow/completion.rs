//! Terminal signal of one collection.

use crate::error::{CancelCause, FlowError, FlowResult};
use crate::runtime::cancel::CancellationToken;

/// How a collection ended. Delivered exactly once, after the last value.
#[derive(Debug, Clone)]
pub enum Completion {
    Normal,
    Failed(FlowError),
    Cancelled(CancelCause),
}

impl Completion {
    /// Settle the outcome of a collection driven under `token`.
    ///
    /// A pipeline that finished normally while its token was triggered
    /// (a producer without suspension points never observes the token)
    /// still reports `Cancelled`.
    pub(crate) fn settle(result: FlowResult<()>, token: &CancellationToken) -> Self {
        match result {
            Ok(()) | Err(FlowError::Aborted(_)) => match token.cause() {
                Some(cause) => Completion::Cancelled(cause),
                None => Completion::Normal,
            },
            Err(FlowError::Cancelled(cause)) => Completion::Cancelled(cause),
            Err(error) => Completion::Failed(error),
        }
    }

    #[must_use]
    pub fn is_normal(&self) -> bool {
        matches!(self, Completion::Normal)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Completion::Cancelled(_))
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Completion::Failed(_))
    }

    /// The abnormal cause, `None` for `Normal`.
    #[must_use]
    pub fn cause(&self) -> Option<FlowError> {
        match self {
            Completion::Normal => None,
            Completion::Failed(error) => Some(error.clone()),
            Completion::Cancelled(cause) => Some(FlowError::Cancelled(cause.clone())),
        }
    }

    pub fn into_result(self) -> FlowResult<()> {
        match self.cause() {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }
}
