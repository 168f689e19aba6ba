//! Heap graph model
//!
//! Read-only, in-memory representation of a captured heap snapshot:
//! classes, composite instances, arrays and GC roots, plus the reference
//! edges between them. The snapshot is produced by an external heap-dump
//! decoder through [`SnapshotBuilder`]; the analysis engine never mutates
//! it, so one snapshot can be shared freely across independent analyses.

pub mod reachability;

mod builder;

pub use builder::SnapshotBuilder;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Snapshot-scoped node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Which heap a node was allocated in.
///
/// Android snapshots label every record with its heap of origin. Leak
/// analysis only cares about a coarse classification: the app/default
/// heaps hold application allocations, everything else is runtime-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeapKind {
    Default,
    Image,
    Zygote,
    App,
    Other,
}

impl HeapKind {
    /// Heaps the application allocates into.
    pub fn is_app_allocated(self) -> bool {
        matches!(self, HeapKind::Default | HeapKind::App)
    }
}

/// Category of a GC root record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootKind {
    /// Local variable in a thread's stack frame.
    ThreadLocal,
    /// Static field holder (system class or application class).
    StaticHolder,
    /// Native reference (JNI global/local, native stack).
    Native,
    /// Referenced from an active thread block.
    ThreadBlock,
    /// Busy monitor / synchronization.
    Monitor,
    Other,
}

/// A GC root entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootNode {
    pub kind: RootKind,
    /// The object this root pins; absent for roots that pin nothing.
    pub referent: Option<NodeId>,
    /// Owning thread instance, set only for [`RootKind::ThreadLocal`].
    pub thread: Option<NodeId>,
}

/// A loaded class and its static state.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassNode {
    pub name: String,
    pub superclass: Option<NodeId>,
    /// Declared static fields in snapshot order.
    pub static_fields: Vec<(String, FieldValue)>,
}

/// An object instance with its declared (and inherited) fields.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceNode {
    pub class: NodeId,
    /// Field name/value pairs, flattened over the inheritance chain in
    /// snapshot order.
    pub fields: Vec<(String, FieldValue)>,
}

impl InstanceNode {
    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// An array instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayNode {
    /// Array class name, e.g. `byte[]` or `java.lang.Object[]`.
    pub class_name: String,
    pub contents: ArrayContents,
}

impl ArrayNode {
    /// Raw byte length for primitive arrays, `None` for object arrays.
    pub fn byte_len(&self) -> Option<usize> {
        match &self.contents {
            ArrayContents::Primitive { bytes, .. } => Some(bytes.len()),
            ArrayContents::Objects(_) => None,
        }
    }

    /// Borrowed view of the raw bytes of a primitive array.
    pub fn raw_bytes(&self) -> Option<&[u8]> {
        match &self.contents {
            ArrayContents::Primitive { bytes, .. } => Some(bytes),
            ArrayContents::Objects(_) => None,
        }
    }
}

/// Element storage of an array node.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayContents {
    /// Object references; `None` entries are null elements.
    Objects(Vec<Option<NodeId>>),
    /// Primitive elements, kept as the raw snapshot bytes.
    Primitive { kind: PrimitiveKind, bytes: Vec<u8> },
}

/// Primitive element/field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Object reference; `None` means null.
    Object(Option<NodeId>),
    Primitive(PrimitiveValue),
}

impl FieldValue {
    pub fn as_object(&self) -> Option<NodeId> {
        match self {
            FieldValue::Object(id) => *id,
            FieldValue::Primitive(_) => None,
        }
    }
}

/// A primitive field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrimitiveValue {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveValue::Boolean(v) => write!(f, "{}", v),
            PrimitiveValue::Byte(v) => write!(f, "{}", v),
            PrimitiveValue::Short(v) => write!(f, "{}", v),
            PrimitiveValue::Char(v) => write!(f, "{}", v),
            PrimitiveValue::Int(v) => write!(f, "{}", v),
            PrimitiveValue::Long(v) => write!(f, "{}", v),
            PrimitiveValue::Float(v) => write!(f, "{}", v),
            PrimitiveValue::Double(v) => write!(f, "{}", v),
        }
    }
}

/// One node of the heap graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub heap: HeapKind,
    pub kind: NodeKind,
}

/// The closed set of node kinds a snapshot can contain.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root(RootNode),
    Class(ClassNode),
    Array(ArrayNode),
    Instance(InstanceNode),
}

impl Node {
    pub fn as_root(&self) -> Option<&RootNode> {
        match &self.kind {
            NodeKind::Root(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassNode> {
        match &self.kind {
            NodeKind::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayNode> {
        match &self.kind {
            NodeKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceNode> {
        match &self.kind {
            NodeKind::Instance(i) => Some(i),
            _ => None,
        }
    }
}

const STRING_CLASS: &str = "java.lang.String";
const THREAD_CLASS: &str = "java.lang.Thread";

const PRIMITIVE_WRAPPER_CLASSES: &[&str] = &[
    "java.lang.Boolean",
    "java.lang.Byte",
    "java.lang.Short",
    "java.lang.Character",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Float",
    "java.lang.Double",
];

/// An immutable heap snapshot.
///
/// Owns every node plus the GC-root list. All analysis state is derived;
/// nothing here is mutated after [`SnapshotBuilder::build`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    nodes: HashMap<NodeId, Node>,
    roots: Vec<NodeId>,
    classes_by_name: HashMap<String, NodeId>,
}

impl Snapshot {
    pub(crate) fn new(nodes: HashMap<NodeId, Node>, roots: Vec<NodeId>) -> Self {
        let classes_by_name = nodes
            .iter()
            .filter_map(|(id, node)| node.as_class().map(|c| (c.name.clone(), *id)))
            .collect();
        Snapshot {
            nodes,
            roots,
            classes_by_name,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in the snapshot (unspecified order).
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// GC-root node ids, in snapshot order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Looks up a loaded class by fully qualified name.
    pub fn find_class(&self, name: &str) -> Option<NodeId> {
        self.classes_by_name.get(name).copied()
    }

    /// Direct instances of the given class (not subclasses).
    pub fn instances_of(&self, class: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().filter_map(move |(id, node)| match &node.kind {
            NodeKind::Instance(inst) if inst.class == class => Some(*id),
            _ => None,
        })
    }

    /// The runtime class of an instance node.
    pub fn class_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.as_instance().map(|i| i.class)
    }

    /// Class name for display: the class's own name for class nodes, the
    /// runtime class name for instances, the array class name for arrays.
    pub fn class_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id)?.kind {
            NodeKind::Class(c) => Some(c.name.as_str()),
            NodeKind::Array(a) => Some(a.class_name.as_str()),
            NodeKind::Instance(inst) => self
                .node(inst.class)
                .and_then(Node::as_class)
                .map(|c| c.name.as_str()),
            NodeKind::Root(_) => None,
        }
    }

    /// Walks the superclass chain starting at `class`, inclusive.
    pub fn class_hierarchy(&self, class: NodeId) -> impl Iterator<Item = &ClassNode> {
        ClassHierarchy {
            snapshot: self,
            next: Some(class),
        }
    }

    /// Whether the class transitively extends `java.lang.Thread`.
    pub fn extends_thread(&self, class: NodeId) -> bool {
        self.class_hierarchy(class).any(|c| c.name == THREAD_CLASS)
    }

    /// Whether the node is a `java.lang.String` instance.
    pub fn is_string(&self, id: NodeId) -> bool {
        self.class_of(id)
            .and_then(|c| self.node(c))
            .and_then(Node::as_class)
            .is_some_and(|c| c.name == STRING_CLASS)
    }

    /// Whether the node is a boxed-primitive instance. Boxed primitives
    /// carry no object references and are never worth traversing.
    pub fn is_primitive_wrapper(&self, id: NodeId) -> bool {
        self.class_of(id)
            .and_then(|c| self.node(c))
            .and_then(Node::as_class)
            .is_some_and(|c| PRIMITIVE_WRAPPER_CLASSES.contains(&c.name.as_str()))
    }

    /// Whether the node is a primitive array or an array of boxed
    /// primitives.
    pub fn is_primitive_or_wrapper_array(&self, id: NodeId) -> bool {
        let Some(array) = self.node(id).and_then(Node::as_array) else {
            return false;
        };
        match &array.contents {
            ArrayContents::Primitive { .. } => true,
            ArrayContents::Objects(_) => {
                let element = array.class_name.trim_end_matches("[]");
                PRIMITIVE_WRAPPER_CLASSES.contains(&element)
            }
        }
    }

    /// Decodes a `java.lang.String` instance's backing `value` array.
    ///
    /// The decoder normalizes string contents to UTF-8 bytes when it
    /// materializes the snapshot.
    pub fn decode_string(&self, id: NodeId) -> Option<String> {
        let instance = self.node(id)?.as_instance()?;
        let value = instance.field("value")?.as_object()?;
        let bytes = self.node(value)?.as_array()?.raw_bytes()?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Best-effort name of a thread instance, read from its `name` field.
    pub fn thread_name(&self, thread: NodeId) -> String {
        self.node(thread)
            .and_then(Node::as_instance)
            .and_then(|inst| inst.field("name"))
            .and_then(FieldValue::as_object)
            .and_then(|name| self.decode_string(name))
            .unwrap_or_else(|| "<unknown thread>".to_string())
    }
}

struct ClassHierarchy<'a> {
    snapshot: &'a Snapshot,
    next: Option<NodeId>,
}

impl<'a> Iterator for ClassHierarchy<'a> {
    type Item = &'a ClassNode;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        let class = self.snapshot.node(id)?.as_class()?;
        self.next = class.superclass;
        Some(class)
    }
}
