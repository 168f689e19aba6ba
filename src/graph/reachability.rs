//! Distance-to-root pre-pass.
//!
//! Duplicate-buffer scanning only considers instances that are actually
//! reachable from a GC root. This pass materializes the whole snapshot
//! as a `petgraph` digraph once, hangs every root off a synthetic
//! super-root, and computes unit-weight shortest distances from it.
//! Exclusion rules are deliberately ignored here: an excluded path still
//! keeps an object alive.

use super::{ArrayContents, FieldValue, NodeId, NodeKind, Snapshot};
use petgraph::algo::dijkstra;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Finite root distances over a snapshot.
#[derive(Debug)]
pub struct Reachability {
    distances: HashMap<NodeId, usize>,
}

impl Reachability {
    /// Runs the pre-pass over the whole snapshot.
    pub fn compute(snapshot: &Snapshot) -> Self {
        let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
        let mut indices: HashMap<NodeId, NodeIndex> = HashMap::with_capacity(snapshot.len());

        for id in snapshot.node_ids() {
            indices.insert(id, graph.add_node(id));
        }

        for id in snapshot.node_ids() {
            let from = indices[&id];
            let node = match snapshot.node(id) {
                Some(node) => node,
                None => continue,
            };
            match &node.kind {
                NodeKind::Root(root) => {
                    if let Some(referent) = root.referent {
                        add_edge(&mut graph, &indices, from, referent);
                    }
                }
                NodeKind::Class(class) => {
                    for (_, value) in &class.static_fields {
                        if let FieldValue::Object(Some(child)) = value {
                            add_edge(&mut graph, &indices, from, *child);
                        }
                    }
                }
                NodeKind::Instance(instance) => {
                    for (_, value) in &instance.fields {
                        if let FieldValue::Object(Some(child)) = value {
                            add_edge(&mut graph, &indices, from, *child);
                        }
                    }
                }
                NodeKind::Array(array) => {
                    if let ArrayContents::Objects(elements) = &array.contents {
                        for child in elements.iter().flatten() {
                            add_edge(&mut graph, &indices, from, *child);
                        }
                    }
                }
            }
        }

        // Synthetic super-root so a single dijkstra run covers all roots.
        let super_root = graph.add_node(NodeId(u64::MAX));
        for root in snapshot.roots() {
            if let Some(&to) = indices.get(root) {
                graph.add_edge(super_root, to, ());
            }
        }

        let raw = dijkstra(&graph, super_root, None, |_| 1usize);
        let distances = raw
            .into_iter()
            .filter(|(index, _)| *index != super_root)
            .map(|(index, distance)| (graph[index], distance.saturating_sub(1)))
            .collect();

        Reachability { distances }
    }

    /// Whether the node has a finite distance to some GC root.
    pub fn is_reachable(&self, id: NodeId) -> bool {
        self.distances.contains_key(&id)
    }

    /// Edge distance from the nearest GC root, if any.
    pub fn distance(&self, id: NodeId) -> Option<usize> {
        self.distances.get(&id).copied()
    }
}

fn add_edge(
    graph: &mut DiGraph<NodeId, ()>,
    indices: &HashMap<NodeId, NodeIndex>,
    from: NodeIndex,
    to: NodeId,
) {
    // Dangling references are tolerated here; the path finder reports
    // them as structural faults when it actually needs the node.
    if let Some(&to) = indices.get(&to) {
        graph.add_edge(from, to, ());
    }
}
