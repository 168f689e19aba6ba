//! leakscope - Post-mortem heap-graph leak analysis
//!
//! This library analyzes an already-decoded heap snapshot for leak
//! evidence. It does not capture dumps, parse dump containers, or render
//! reports; those belong to the surrounding tooling.
//!
//! # Architecture
//!
//! The analysis pipeline consists of:
//! 1. **Heap Graph Model** - Immutable snapshot of objects, arrays,
//!    classes and GC roots, built via [`SnapshotBuilder`]
//! 2. **Exclusion Policy** - Rules that deprioritize or forbid known
//!    framework references ([`ExcludedRefs`], [`ExcludedBuffers`])
//! 3. **Shortest Path Finder** - Two-tier BFS from GC roots to target
//!    objects, preferring paths that avoid exclusions
//! 4. **Reference Chain Builder** - Human-readable root-to-target chains
//! 5. **Duplicate Buffer Detector** - Groups of instances holding
//!    byte-identical backing buffers, with corroborating chains

pub mod analysis;
pub mod exclusions;
pub mod graph;

pub use analysis::{
    AnalysisError, AnalysisFailure, BufferSource, DuplicateBufferAnalyzer, DuplicateGroup,
    DuplicateScanResult, HolderKind, PathFinder, PathNode, PathNodeIdx, PathResult, PathResults,
    ReferenceChain, ReferenceKind, TraceElement,
};
pub use exclusions::{BufferPattern, ExcludedBuffers, ExcludedRefs, Exclusion};
pub use graph::{
    ArrayContents, FieldValue, HeapKind, Node, NodeId, NodeKind, PrimitiveKind, PrimitiveValue,
    RootKind, Snapshot, SnapshotBuilder,
};
