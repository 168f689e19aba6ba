// Analysis module - path finding, chain building, duplicate detection

mod chain;
mod duplicates;
mod path_finder;

pub use chain::{HolderKind, ReferenceChain, ReferenceKind, TraceElement};
pub use duplicates::{
    BufferSource, DuplicateBufferAnalyzer, DuplicateGroup, DuplicateScanResult,
};
pub use path_finder::{PathFinder, PathNode, PathNodeIdx, PathResult, PathResults};

use crate::graph::NodeId;
use std::time::Duration;

/// Structural faults in a snapshot, fatal for a single analysis run.
///
/// The snapshot is immutable, so re-running the same analysis would hit
/// the same fault; callers should not retry. An unreachable target is
/// not an error (it is simply absent from the result map), and neither
/// is an empty duplicate scan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// A reference edge points at an id the snapshot does not contain.
    #[error("snapshot has no node {id}")]
    MissingNode { id: NodeId },

    /// A field expected to hold array data referenced something else.
    #[error("field '{field}' of {class} does not hold array data")]
    FieldNotAnArray { class: String, field: String },

    /// A thread-local root whose owning thread cannot be resolved.
    #[error("thread-local root {root} has no resolvable owning thread")]
    UnresolvedRootThread { root: NodeId },

    /// A search queue invariant was broken; indicates a bug rather than
    /// a snapshot problem.
    #[error("corrupt search state: {0}")]
    CorruptSearchState(&'static str),
}

/// A failed analysis run: the fault plus how long the run took before
/// aborting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("analysis failed after {elapsed:?}: {error}")]
pub struct AnalysisFailure {
    #[source]
    pub error: AnalysisError,
    pub elapsed: Duration,
}
