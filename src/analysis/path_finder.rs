//! Shortest path finder
//!
//! Breadth-first search from the GC roots to a set of target nodes,
//! honoring the exclusion policy with two priority tiers: edges with no
//! exclusion are expanded first, and edges carrying a non-always
//! exclusion are kept in a deferred queue that is only drained when the
//! primary queue runs dry. The first arrival at a target therefore takes
//! the shortest clean path when one exists, and falls back to the
//! shortest excluded path otherwise.
//!
//! All working state (queues, pending sets, visited set, path arena) is
//! owned by the finder instance and reinitialized on every call, so the
//! finder holds no state across invocations and different snapshots can
//! be analyzed in parallel on separate finders.

use super::chain::ReferenceKind;
use super::AnalysisError;
use crate::exclusions::{ExcludedRefs, Exclusion};
use crate::graph::{
    ArrayContents, FieldValue, NodeId, NodeKind, RootKind, RootNode, Snapshot,
};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

/// Synthetic static field carrying per-class overhead in Android dumps;
/// it never holds a real reference.
const STATIC_OVERHEAD_FIELD: &str = "$staticOverhead";

const JAVA_LOCAL_LABEL: &str = "<Java Local>";

/// Index of a [`PathNode`] in the arena owned by one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathNodeIdx(usize);

/// One step of a discovered root-to-target path.
///
/// Parent links form a tree rooted at the GC roots; nodes are created
/// during one search invocation and discarded with its [`PathResults`].
#[derive(Debug, Clone)]
pub struct PathNode {
    /// The heap node this step arrived at.
    pub referent: NodeId,
    pub parent: Option<PathNodeIdx>,
    /// Field name, `[index]`, or a synthetic label like `<Java Local>`.
    pub reference_name: Option<String>,
    pub reference_kind: Option<ReferenceKind>,
    /// The exclusion that applied to the edge leading into this step.
    pub exclusion: Option<Exclusion>,
}

/// Outcome for one resolved target.
#[derive(Debug, Clone, Copy)]
pub struct PathResult {
    /// The search node that matched the target; walk `parent` links to
    /// reconstruct the path back to a GC root.
    pub head: PathNodeIdx,
    /// Whether any edge on the path carried an exclusion.
    pub excluded: bool,
}

/// Results of one [`PathFinder::find_paths`] invocation.
///
/// Targets absent from the map were unreachable; that is not an error.
#[derive(Debug, Default)]
pub struct PathResults {
    arena: Vec<PathNode>,
    found: HashMap<NodeId, PathResult>,
}

impl PathResults {
    pub fn get(&self, target: NodeId) -> Option<PathResult> {
        self.found.get(&target).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, PathResult)> + '_ {
        self.found.iter().map(|(id, result)| (*id, *result))
    }

    pub fn len(&self) -> usize {
        self.found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }

    pub fn node(&self, idx: PathNodeIdx) -> &PathNode {
        &self.arena[idx.0]
    }

    /// All path nodes created by the search.
    pub fn arena(&self) -> &[PathNode] {
        &self.arena
    }

    /// Edge count of the path ending at `head`.
    pub fn path_len(&self, head: PathNodeIdx) -> usize {
        let mut len = 0;
        let mut cursor = self.node(head);
        while let Some(parent) = cursor.parent {
            len += 1;
            cursor = self.node(parent);
        }
        len
    }
}

/// Finds the shortest reference path from a GC root to target objects.
pub struct PathFinder<'a> {
    snapshot: &'a Snapshot,
    excluded: &'a ExcludedRefs,
    arena: Vec<PathNode>,
    primary: VecDeque<PathNodeIdx>,
    deferred: VecDeque<PathNodeIdx>,
    primary_pending: HashSet<NodeId>,
    deferred_pending: HashSet<NodeId>,
    visited: HashSet<NodeId>,
    skip_strings: bool,
}

impl<'a> PathFinder<'a> {
    pub fn new(snapshot: &'a Snapshot, excluded: &'a ExcludedRefs) -> Self {
        PathFinder {
            snapshot,
            excluded,
            arena: Vec::new(),
            primary: VecDeque::new(),
            deferred: VecDeque::new(),
            primary_pending: HashSet::new(),
            deferred_pending: HashSet::new(),
            visited: HashSet::new(),
            skip_strings: true,
        }
    }

    /// Convenience wrapper for a single target.
    pub fn find_path(&mut self, target: NodeId) -> Result<PathResults, AnalysisError> {
        self.find_paths(&[target])
    }

    /// Searches for the shortest path to each target.
    ///
    /// An empty target set returns empty results without traversal.
    pub fn find_paths(&mut self, targets: &[NodeId]) -> Result<PathResults, AnalysisError> {
        let mut found: HashMap<NodeId, PathResult> = HashMap::new();
        if targets.is_empty() {
            return Ok(PathResults::default());
        }

        self.clear_state();

        // Strings cannot hold application references, so they are noise
        // in every search except one that targets a string itself.
        self.skip_strings = !targets.iter().any(|&t| self.snapshot.is_string(t));

        self.enqueue_gc_roots()?;

        let mut pending: HashSet<NodeId> = targets.iter().copied().collect();
        let mut expanded = 0usize;

        while !self.primary.is_empty() || !self.deferred.is_empty() {
            let idx = match self.primary.pop_front() {
                Some(idx) => idx,
                None => {
                    let idx = self
                        .deferred
                        .pop_front()
                        .ok_or(AnalysisError::CorruptSearchState("both queues empty"))?;
                    if self.arena[idx.0].exclusion.is_none() {
                        return Err(AnalysisError::CorruptSearchState(
                            "deferred node without an exclusion",
                        ));
                    }
                    idx
                }
            };
            let referent = self.arena[idx.0].referent;

            if pending.remove(&referent) {
                found.insert(
                    referent,
                    PathResult {
                        head: idx,
                        excluded: self.path_crossed_exclusion(idx),
                    },
                );
                if pending.is_empty() {
                    break;
                }
            }

            // First BFS arrival wins; later arrivals are never expanded.
            if !self.visited.insert(referent) {
                continue;
            }
            expanded += 1;

            let node = self
                .snapshot
                .node(referent)
                .ok_or(AnalysisError::MissingNode { id: referent })?;
            match &node.kind {
                NodeKind::Root(root) => self.visit_root(idx, root)?,
                NodeKind::Class(_) => self.visit_class(idx, referent),
                NodeKind::Instance(_) => self.visit_instance(idx, referent),
                NodeKind::Array(_) => self.visit_array(idx, referent),
            }
        }

        info!(
            targets = targets.len(),
            resolved = found.len(),
            expanded,
            "path search finished"
        );

        Ok(PathResults {
            arena: std::mem::take(&mut self.arena),
            found,
        })
    }

    fn clear_state(&mut self) {
        self.arena.clear();
        self.primary.clear();
        self.deferred.clear();
        self.primary_pending.clear();
        self.deferred_pending.clear();
        self.visited.clear();
    }

    fn path_crossed_exclusion(&self, head: PathNodeIdx) -> bool {
        let mut cursor = Some(head);
        while let Some(idx) = cursor {
            let node = &self.arena[idx.0];
            if node.exclusion.is_some() {
                return true;
            }
            cursor = node.parent;
        }
        false
    }

    fn enqueue_gc_roots(&mut self) -> Result<(), AnalysisError> {
        for &root_id in self.snapshot.roots() {
            let Some(root) = self.snapshot.node(root_id).and_then(|n| n.as_root()) else {
                return Err(AnalysisError::MissingNode { id: root_id });
            };
            match root.kind {
                RootKind::ThreadLocal => {
                    let thread = root
                        .thread
                        .ok_or(AnalysisError::UnresolvedRootThread { root: root_id })?;
                    let thread_name = self.snapshot.thread_name(thread);
                    let rule = self.excluded.thread_exclusion(&thread_name).cloned();
                    match rule {
                        Some(rule) if rule.always_exclude => {
                            debug!(thread = %thread_name, "dropped always-excluded thread root");
                        }
                        rule => self.enqueue(rule, None, root_id, None, None),
                    }
                }
                _ => self.enqueue(None, None, root_id, None, None),
            }
        }
        Ok(())
    }

    fn visit_root(&mut self, idx: PathNodeIdx, root: &RootNode) -> Result<(), AnalysisError> {
        let Some(child) = root.referent else {
            return Ok(());
        };
        if root.kind == RootKind::ThreadLocal {
            let thread = root.thread.ok_or(AnalysisError::UnresolvedRootThread {
                root: self.arena[idx.0].referent,
            })?;
            let exclusion = self.arena[idx.0].exclusion.clone();
            // Report the chain as held by the owning thread instead of
            // exposing the internal root record.
            let parent = self.push_node(PathNode {
                referent: thread,
                parent: None,
                reference_name: None,
                reference_kind: None,
                exclusion: None,
            });
            self.enqueue(
                exclusion,
                Some(parent),
                child,
                Some(JAVA_LOCAL_LABEL.to_string()),
                Some(ReferenceKind::LocalVariable),
            );
        } else {
            self.enqueue(None, Some(idx), child, None, None);
        }
        Ok(())
    }

    fn visit_class(&mut self, idx: PathNodeIdx, class_id: NodeId) {
        let Some(class) = self.snapshot.node(class_id).and_then(|n| n.as_class()) else {
            return;
        };
        for (field_name, value) in &class.static_fields {
            let FieldValue::Object(Some(child)) = value else {
                continue;
            };
            if field_name == STATIC_OVERHEAD_FIELD {
                continue;
            }
            let rule = self.excluded.static_field_exclusion(&class.name, field_name);
            match rule {
                Some(rule) if rule.always_exclude => {}
                rule => self.enqueue(
                    rule.cloned(),
                    Some(idx),
                    *child,
                    Some(field_name.clone()),
                    Some(ReferenceKind::StaticField),
                ),
            }
        }
    }

    fn visit_instance(&mut self, idx: PathNodeIdx, instance_id: NodeId) {
        let Some(instance) = self.snapshot.node(instance_id).and_then(|n| n.as_instance())
        else {
            return;
        };

        let class_exclusion = self
            .excluded
            .resolve_class_exclusion(
                self.snapshot
                    .class_hierarchy(instance.class)
                    .map(|c| c.name.as_str()),
            )
            .cloned();
        if class_exclusion
            .as_ref()
            .is_some_and(|rule| rule.always_exclude)
        {
            return;
        }
        let field_rules = self.excluded.merged_field_exclusions(
            self.snapshot
                .class_hierarchy(instance.class)
                .map(|c| c.name.as_str()),
        );

        for (field_name, value) in &instance.fields {
            let FieldValue::Object(Some(child)) = value else {
                continue;
            };
            let mut exclusion = class_exclusion.as_ref();
            if let Some(rule) = field_rules.get(field_name.as_str()) {
                // A field rule only overrides the class rule when it is
                // strictly stronger.
                let stronger = match exclusion {
                    None => true,
                    Some(current) => rule.always_exclude && !current.always_exclude,
                };
                if stronger {
                    exclusion = Some(rule);
                }
            }
            // Always-excluded fields are invisible to the search, same
            // as always-excluded static fields.
            if exclusion.is_some_and(|rule| rule.always_exclude) {
                continue;
            }
            self.enqueue(
                exclusion.cloned(),
                Some(idx),
                *child,
                Some(field_name.clone()),
                Some(ReferenceKind::InstanceField),
            );
        }
    }

    fn visit_array(&mut self, idx: PathNodeIdx, array_id: NodeId) {
        let Some(array) = self.snapshot.node(array_id).and_then(|n| n.as_array()) else {
            return;
        };
        let elements = match &array.contents {
            ArrayContents::Objects(elements) => elements,
            // Primitive arrays carry no references.
            ArrayContents::Primitive { .. } => return,
        };
        for (i, child) in elements.iter().enumerate() {
            let Some(child) = child else { continue };
            self.enqueue(
                None,
                Some(idx),
                *child,
                Some(format!("[{i}]")),
                Some(ReferenceKind::ArrayEntry),
            );
        }
    }

    fn push_node(&mut self, node: PathNode) -> PathNodeIdx {
        let idx = PathNodeIdx(self.arena.len());
        self.arena.push(node);
        idx
    }

    /// Admission filters applied uniformly before any enqueue.
    fn enqueue(
        &mut self,
        exclusion: Option<Exclusion>,
        parent: Option<PathNodeIdx>,
        child: NodeId,
        reference_name: Option<String>,
        reference_kind: Option<ReferenceKind>,
    ) {
        // Boxed primitives and primitive/wrapper arrays cannot carry
        // further references.
        if self.snapshot.is_primitive_or_wrapper_array(child)
            || self.snapshot.is_primitive_wrapper(child)
        {
            return;
        }
        // Whether we want to visit now or later, skip if already queued
        // for a primary visit.
        if self.primary_pending.contains(&child) {
            return;
        }
        let visit_now = exclusion.is_none();
        if !visit_now && self.deferred_pending.contains(&child) {
            return;
        }
        if self.skip_strings && self.snapshot.is_string(child) {
            return;
        }
        if self.visited.contains(&child) {
            return;
        }

        let idx = self.push_node(PathNode {
            referent: child,
            parent,
            reference_name,
            reference_kind,
            exclusion,
        });
        if visit_now {
            self.primary_pending.insert(child);
            self.primary.push_back(idx);
        } else {
            self.deferred_pending.insert(child);
            self.deferred.push_back(idx);
        }
    }
}
