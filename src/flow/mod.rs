//! Cold asynchronous flows.
//!
//! A `Flow<T>` is an immutable pipeline definition: a source stage wrapped
//! by zero or more operator stages. Building one does no work. Every
//! collection runs the source again from scratch and shares no state with
//! other collections of the same flow.

pub mod completion;
pub mod config;
pub mod emitter;
pub mod operators;
pub mod source;
pub mod terminal;

pub use completion::Completion;
pub use config::FlowConfig;
pub use emitter::Emitter;
pub use source::flow;

use std::fmt;
use std::sync::Arc;

use crate::runtime::channel::ChannelSpec;
use emitter::EmitFuture;
use operators::channel::ChannelStage;

/// How a source produces its values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `flow(producer)`
    Builder,
    /// `Flow::iter`, values already in memory
    Iter,
    /// `Flow::from_stream`
    Stream,
    /// `Flow::empty`
    Empty,
}

/// Tag of one pipeline stage, used for introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    Source(SourceKind),
    Map,
    Filter,
    Transform,
    OnEach,
    Take(usize),
    Cancellable,
    Catch,
    OnCompletion,
    Channel { context: String, spec: ChannelSpec },
    FlatMapConcat,
    FlatMapMerge { concurrency: usize },
    FlatMapLatest,
    TransformLatest,
    Zip,
    Combine,
}

/// One node of a pipeline.
///
/// `run` starts a fresh execution instance that pushes into `downstream`
/// and resolves when the stage is done producing.
pub(crate) trait Stage<T>: Send + Sync + 'static {
    fn kind(&self) -> StageKind;

    /// Append the kinds from the source up to and including this stage.
    fn lineage(&self, stages: &mut Vec<StageKind>);

    fn run(&self, downstream: Emitter<T>) -> EmitFuture;

    /// Channel-backed stages expose themselves so adjacent channel
    /// operators can fuse into one channel.
    fn as_channel(&self) -> Option<&ChannelStage<T>> {
        None
    }
}

/// A cold, re-collectable definition of a value sequence.
///
/// Cloning is cheap (Arc clone).
pub struct Flow<T> {
    stage: Arc<dyn Stage<T>>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            stage: Arc::clone(&self.stage),
        }
    }
}

impl<T: Send + 'static> Flow<T> {
    pub(crate) fn from_stage(stage: impl Stage<T>) -> Self {
        Self {
            stage: Arc::new(stage),
        }
    }

    /// Start one execution instance pushing into `downstream`.
    pub(crate) fn run(&self, downstream: Emitter<T>) -> EmitFuture {
        self.stage.run(downstream)
    }

    pub(crate) fn lineage(&self, stages: &mut Vec<StageKind>) {
        self.stage.lineage(stages);
    }

    /// Stage kinds from the source to this flow's outermost stage.
    ///
    /// Two-input stages list their primary input.
    #[must_use]
    pub fn stages(&self) -> Vec<StageKind> {
        let mut stages = Vec::new();
        self.stage.lineage(&mut stages);
        stages
    }
}

impl<T: Send + 'static> fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow").field("stages", &self.stages()).finish()
    }
}
