//! Duplicate buffer detector
//!
//! Finds groups of distinct image-like instances whose backing buffers
//! are byte-identical, then corroborates each group with the shortest
//! non-excluded reference chain to every member. Two instances holding
//! the same bytes in different arrays usually means the same bitmap was
//! decoded twice; two owners sharing one array instance are treated as
//! distinct logical copies so both show up in the group.
//!
//! Grouping uses incremental byte-position refinement rather than
//! hashing: the candidate set is partitioned by the byte at offset 0,
//! each bucket is refined by the next offset, and a bucket whose members
//! all run out of bytes at the same offset is an exact-duplicate group.
//! Unique buffers fall out of the refinement early, and buffer contents
//! are only borrowed until a group is confirmed.

use super::chain::ReferenceChain;
use super::path_finder::{PathFinder, PathResults};
use super::{AnalysisError, AnalysisFailure};
use crate::exclusions::{ExcludedBuffers, ExcludedRefs};
use crate::graph::reachability::Reachability;
use crate::graph::{FieldValue, HeapKind, Node, NodeId, PrimitiveValue, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Where image-like instances keep their backing buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSource {
    /// Class whose instances are scanned.
    pub class_name: String,
    /// Field holding the backing primitive array.
    pub buffer_field: String,
    /// Field holding the declared width, if any.
    pub width_field: String,
    /// Field holding the declared height, if any.
    pub height_field: String,
}

impl Default for BufferSource {
    /// Android's bitmap layout before pixel data moved off the Java heap.
    fn default() -> Self {
        BufferSource {
            class_name: "android.graphics.Bitmap".to_string(),
            buffer_field: "mBuffer".to_string(),
            width_field: "mWidth".to_string(),
            height_field: "mHeight".to_string(),
        }
    }
}

/// A group of instances sharing byte-identical backing buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Declared width/height of the first member; zero when the source
    /// class carries no such fields.
    pub width: u32,
    pub height: u32,
    /// The shared buffer content.
    pub buffer: Vec<u8>,
    /// One chain per surviving duplicate member.
    pub chains: Vec<ReferenceChain>,
}

/// Successful scan outcome.
#[derive(Debug, Clone, Default)]
pub struct DuplicateScanResult {
    pub groups: Vec<DuplicateGroup>,
    pub elapsed: Duration,
}

/// Scans a snapshot for duplicated backing buffers.
pub struct DuplicateBufferAnalyzer {
    min_buffer_size: usize,
    excluded_refs: ExcludedRefs,
    excluded_buffers: ExcludedBuffers,
    source: BufferSource,
}

/// One instance whose buffer qualifies for grouping. The `(array, owner)`
/// pair is the logical-copy key: a shared array instance yields one
/// candidate per owner without cloning anything.
struct Candidate<'a> {
    owner: NodeId,
    #[allow(dead_code)]
    array: NodeId,
    bytes: &'a [u8],
}

impl DuplicateBufferAnalyzer {
    pub fn new(
        min_buffer_size: usize,
        excluded_refs: ExcludedRefs,
        excluded_buffers: ExcludedBuffers,
    ) -> Self {
        DuplicateBufferAnalyzer {
            min_buffer_size,
            excluded_refs,
            excluded_buffers,
            source: BufferSource::default(),
        }
    }

    /// Scans a different source class than the Android bitmap default.
    pub fn with_source(mut self, source: BufferSource) -> Self {
        self.source = source;
        self
    }

    /// Runs the scan, reporting either the duplicate groups or the
    /// structural fault that aborted the run, with elapsed time either
    /// way.
    pub fn analyze(&self, snapshot: &Snapshot) -> Result<DuplicateScanResult, AnalysisFailure> {
        let started = Instant::now();
        match self.scan(snapshot) {
            Ok(groups) => Ok(DuplicateScanResult {
                groups,
                elapsed: started.elapsed(),
            }),
            Err(error) => Err(AnalysisFailure {
                error,
                elapsed: started.elapsed(),
            }),
        }
    }

    fn scan(&self, snapshot: &Snapshot) -> Result<Vec<DuplicateGroup>, AnalysisError> {
        let Some(source_class) = snapshot.find_class(&self.source.class_name) else {
            info!(class = %self.source.class_name, "source class not loaded, nothing to scan");
            return Ok(Vec::new());
        };

        let reachability = Reachability::compute(snapshot);
        let candidates = self.collect_candidates(snapshot, source_class, &reachability)?;
        info!(candidates = candidates.len(), "collected buffer candidates");
        if candidates.len() <= 1 {
            return Ok(Vec::new());
        }

        let mut groups = Vec::new();
        for members in refine_by_bytes(&candidates) {
            if let Some(group) = self.emit_group(snapshot, &candidates, &members)? {
                groups.push(group);
            }
        }
        info!(groups = groups.len(), "duplicate scan finished");
        Ok(groups)
    }

    fn collect_candidates<'a>(
        &self,
        snapshot: &'a Snapshot,
        source_class: NodeId,
        reachability: &Reachability,
    ) -> Result<Vec<Candidate<'a>>, AnalysisError> {
        let mut candidates = Vec::new();
        for owner in snapshot.instances_of(source_class) {
            let node = snapshot
                .node(owner)
                .ok_or(AnalysisError::MissingNode { id: owner })?;
            if !node.heap.is_app_allocated() {
                continue;
            }
            if !reachability.is_reachable(owner) {
                continue;
            }
            let Some(instance) = node.as_instance() else {
                continue;
            };
            let array = match instance.field(&self.source.buffer_field) {
                Some(FieldValue::Object(Some(array))) => *array,
                Some(FieldValue::Object(None)) | None => {
                    debug!(%owner, "skipped a candidate without buffer data");
                    continue;
                }
                Some(FieldValue::Primitive(_)) => {
                    return Err(AnalysisError::FieldNotAnArray {
                        class: self.source.class_name.clone(),
                        field: self.source.buffer_field.clone(),
                    });
                }
            };
            let bytes = snapshot
                .node(array)
                .ok_or(AnalysisError::MissingNode { id: array })?
                .as_array()
                .and_then(|a| a.raw_bytes())
                .ok_or_else(|| AnalysisError::FieldNotAnArray {
                    class: self.source.class_name.clone(),
                    field: self.source.buffer_field.clone(),
                })?;
            if bytes.len() < self.min_buffer_size {
                debug!(%owner, size = bytes.len(), "skipped a buffer below the size threshold");
                continue;
            }
            candidates.push(Candidate {
                owner,
                array,
                bytes,
            });
        }
        Ok(candidates)
    }

    fn emit_group(
        &self,
        snapshot: &Snapshot,
        candidates: &[Candidate<'_>],
        members: &[usize],
    ) -> Result<Option<DuplicateGroup>, AnalysisError> {
        let owners: Vec<NodeId> = members.iter().map(|&i| candidates[i].owner).collect();
        let (width, height) = self.dimensions(snapshot, owners[0]);

        let mut finder = PathFinder::new(snapshot, &self.excluded_refs);
        let results = finder.find_paths(&owners)?;

        let mut chains = Vec::new();
        for (owner, result) in results.iter() {
            if result.excluded {
                debug!(%owner, "dropped a duplicate member reached only through exclusions");
                continue;
            }
            let Some(holder_class) = gc_root_holder_class(snapshot, &results, result.head) else {
                debug!(%owner, "dropped a duplicate member whose GC-root holder is not a class");
                continue;
            };
            if let Some(pattern) = self
                .excluded_buffers
                .gc_root_patterns()
                .find(|p| p.matches(&holder_class))
            {
                debug!(
                    holder = %holder_class,
                    pattern = pattern.as_str(),
                    "dropped a duplicate member by GC-root holder pattern"
                );
                continue;
            }
            chains.push(results.reference_chain(snapshot, result.head));
        }

        if chains.len() < 2 {
            return Ok(None);
        }
        // The group is confirmed; copying the buffer is safe now.
        Ok(Some(DuplicateGroup {
            width,
            height,
            buffer: candidates[members[0]].bytes.to_vec(),
            chains,
        }))
    }

    fn dimensions(&self, snapshot: &Snapshot, owner: NodeId) -> (u32, u32) {
        let read = |field: &str| -> u32 {
            snapshot
                .node(owner)
                .and_then(Node::as_instance)
                .and_then(|instance| instance.field(field))
                .and_then(|value| match value {
                    FieldValue::Primitive(PrimitiveValue::Int(v)) if *v > 0 => Some(*v as u32),
                    _ => None,
                })
                .unwrap_or(0)
        };
        (read(&self.source.width_field), read(&self.source.height_field))
    }
}

/// Incremental byte-position refinement. Returns the member index sets
/// whose buffers are exactly byte-identical (size >= 2 each).
fn refine_by_bytes(candidates: &[Candidate<'_>]) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    let mut partitions: Vec<Vec<usize>> = vec![(0..candidates.len()).collect()];
    let mut offset = 0usize;

    while !partitions.is_empty() {
        let mut refined = Vec::new();
        for partition in partitions {
            // Members of one partition agree on every byte before
            // `offset`, so the ones with no bytes left are exact
            // duplicates of each other.
            let (consumed, live): (Vec<usize>, Vec<usize>) = partition
                .into_iter()
                .partition(|&i| candidates[i].bytes.len() == offset);
            if consumed.len() >= 2 {
                groups.push(consumed);
            }

            let mut buckets: HashMap<u8, Vec<usize>> = HashMap::new();
            for i in live {
                buckets.entry(candidates[i].bytes[offset]).or_default().push(i);
            }
            for bucket in buckets.into_values() {
                // A unique prefix can never become a duplicate.
                if bucket.len() >= 2 {
                    refined.push(bucket);
                }
            }
        }
        partitions = refined;
        offset += 1;
    }
    groups
}

/// Walks from a matched path node toward the root and returns the class
/// name of the GC-root holder: the highest ancestor still allocated in
/// the app heap (root records are not allocations and end the walk).
/// `None` when the walk does not end at a class node; such members are
/// dropped from their group.
fn gc_root_holder_class(
    snapshot: &Snapshot,
    results: &PathResults,
    head: super::path_finder::PathNodeIdx,
) -> Option<String> {
    let mut cursor = head;
    while let Some(parent) = results.node(cursor).parent {
        let referent = results.node(parent).referent;
        let app_allocation = snapshot
            .node(referent)
            .is_some_and(|node| node.heap == HeapKind::App && node.as_root().is_none());
        if !app_allocation {
            break;
        }
        cursor = parent;
    }
    let holder = results.node(cursor).referent;
    snapshot
        .node(holder)
        .and_then(Node::as_class)
        .map(|class| class.name.clone())
}
