//! Runtime module
//!
//! Execution contexts, cancellation, hand-off channels and detached task
//! handles that the flow operators are built on.

pub mod async_task;
pub mod cancel;
pub mod channel;
pub mod context;
pub mod scope;

// Re-export runtime types
pub use async_task::{AsyncStream, AsyncTask};
pub use cancel::{CancelOnDrop, CancellationToken};
pub use channel::{Capacity, ChannelSpec, Overflow, Receiver, Sender, channel};
pub use context::ExecutionContext;
pub use scope::{Job, Scope};
