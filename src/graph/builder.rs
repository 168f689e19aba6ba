// Snapshot construction API.
//
// The heap-dump decoder (an external collaborator) materializes a
// snapshot through this builder; tests use it to assemble small fixture
// graphs. Node ids are assigned sequentially, and forward references are
// handled by creating nodes first and wiring fields afterwards.

use super::{
    ArrayContents, ArrayNode, ClassNode, FieldValue, HeapKind, InstanceNode, Node, NodeId,
    NodeKind, PrimitiveKind, RootKind, RootNode, Snapshot,
};
use std::collections::HashMap;

/// Builder for an immutable [`Snapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    nodes: HashMap<NodeId, Node>,
    roots: Vec<NodeId>,
    next_id: u64,
    current_heap: Option<HeapKind>,
    string_class: Option<NodeId>,
    thread_class: Option<NodeId>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Heap label applied to nodes added from now on (defaults to
    /// [`HeapKind::App`]).
    pub fn set_heap(&mut self, heap: HeapKind) {
        self.current_heap = Some(heap);
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let heap = self.current_heap.unwrap_or(HeapKind::App);
        self.nodes.insert(id, Node { heap, kind });
        id
    }

    /// Adds a class node with no static fields yet.
    pub fn class(&mut self, name: &str, superclass: Option<NodeId>) -> NodeId {
        self.insert(NodeKind::Class(ClassNode {
            name: name.to_string(),
            superclass,
            static_fields: Vec::new(),
        }))
    }

    /// Appends a static field to an existing class node.
    ///
    /// # Panics
    ///
    /// Panics if `class` is not a class node; fixture wiring bugs should
    /// fail loudly at build time, not surface as analysis results.
    pub fn static_field(&mut self, class: NodeId, name: &str, value: FieldValue) {
        match self.nodes.get_mut(&class).map(|n| &mut n.kind) {
            Some(NodeKind::Class(c)) => c.static_fields.push((name.to_string(), value)),
            _ => panic!("static_field target {class} is not a class node"),
        }
    }

    /// Adds an instance of `class` with no fields yet.
    pub fn instance(&mut self, class: NodeId) -> NodeId {
        self.insert(NodeKind::Instance(InstanceNode {
            class,
            fields: Vec::new(),
        }))
    }

    /// Appends a declared field to an existing instance node.
    ///
    /// # Panics
    ///
    /// Panics if `instance` is not an instance node.
    pub fn field(&mut self, instance: NodeId, name: &str, value: FieldValue) {
        match self.nodes.get_mut(&instance).map(|n| &mut n.kind) {
            Some(NodeKind::Instance(i)) => i.fields.push((name.to_string(), value)),
            _ => panic!("field target {instance} is not an instance node"),
        }
    }

    /// Adds an object array.
    pub fn object_array(&mut self, class_name: &str, elements: Vec<Option<NodeId>>) -> NodeId {
        self.insert(NodeKind::Array(ArrayNode {
            class_name: class_name.to_string(),
            contents: ArrayContents::Objects(elements),
        }))
    }

    /// Adds a primitive array backed by raw snapshot bytes.
    pub fn primitive_array(&mut self, kind: PrimitiveKind, bytes: Vec<u8>) -> NodeId {
        let class_name = match kind {
            PrimitiveKind::Boolean => "boolean[]",
            PrimitiveKind::Byte => "byte[]",
            PrimitiveKind::Short => "short[]",
            PrimitiveKind::Char => "char[]",
            PrimitiveKind::Int => "int[]",
            PrimitiveKind::Long => "long[]",
            PrimitiveKind::Float => "float[]",
            PrimitiveKind::Double => "double[]",
        };
        self.insert(NodeKind::Array(ArrayNode {
            class_name: class_name.to_string(),
            contents: ArrayContents::Primitive { kind, bytes },
        }))
    }

    /// Adds a GC root pinning `referent`.
    pub fn root(&mut self, kind: RootKind, referent: Option<NodeId>) -> NodeId {
        let id = self.insert(NodeKind::Root(RootNode {
            kind,
            referent,
            thread: None,
        }));
        self.roots.push(id);
        id
    }

    /// Adds a thread-local GC root. A decoder that cannot resolve the
    /// owning thread passes `None`; the path finder reports that as a
    /// structural fault when the root is seeded.
    pub fn thread_local_root(&mut self, referent: Option<NodeId>, thread: Option<NodeId>) -> NodeId {
        let id = self.insert(NodeKind::Root(RootNode {
            kind: RootKind::ThreadLocal,
            referent,
            thread,
        }));
        self.roots.push(id);
        id
    }

    /// Adds (or reuses) `java.lang.String` and materializes an interned
    /// string instance with a UTF-8 `value` array.
    pub fn string(&mut self, text: &str) -> NodeId {
        let class = match self.string_class {
            Some(c) => c,
            None => {
                let c = self.class("java.lang.String", None);
                self.string_class = Some(c);
                c
            }
        };
        let value = self.primitive_array(PrimitiveKind::Byte, text.as_bytes().to_vec());
        let id = self.instance(class);
        self.field(id, "value", FieldValue::Object(Some(value)));
        id
    }

    /// Adds (or reuses) `java.lang.Thread` and materializes a named
    /// thread instance.
    pub fn thread(&mut self, name: &str) -> NodeId {
        let class = match self.thread_class {
            Some(c) => c,
            None => {
                let c = self.class("java.lang.Thread", None);
                self.thread_class = Some(c);
                c
            }
        };
        let name_string = self.string(name);
        let id = self.instance(class);
        self.field(id, "name", FieldValue::Object(Some(name_string)));
        id
    }

    /// Finalizes the snapshot.
    pub fn build(self) -> Snapshot {
        Snapshot::new(self.nodes, self.roots)
    }
}
