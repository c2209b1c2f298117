//! `kodegen_flow` - cold asynchronous streams on tokio
//!
//! This library provides cold, re-collectable flows with structured
//! cancellation, backpressure through hand-off channels and execution
//! context confinement. A `Flow` is a pipeline definition; nothing runs
//! until a terminal operator such as `collect` starts it, and every
//! collection runs the source again from scratch.

// Module declarations
pub mod error;
pub mod flow;
pub mod runtime;

// Re-export flow types
pub use flow::{Completion, Emitter, Flow, FlowConfig, SourceKind, StageKind, flow};

// Re-export error types
pub use error::{
    AbortSignal, CancelCause, ConfigError, ContextError, Failure, FlowError, FlowResult,
};

// Re-export runtime types
pub use runtime::{
    AsyncStream, AsyncTask, CancellationToken, Capacity, ChannelSpec, ExecutionContext, Job,
    Overflow, Scope,
};
