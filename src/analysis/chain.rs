//! Reference chain builder
//!
//! Converts a discovered path (a [`PathNode`] arena walk) into an
//! ordered, human-readable chain of trace elements from the GC root to
//! the target. The chain is immutable once built and is safe to hand to
//! report writers; every type here serializes with serde.

use super::path_finder::{PathNodeIdx, PathResults};
use crate::exclusions::Exclusion;
use crate::graph::{ArrayContents, FieldValue, Node, NodeId, NodeKind, Snapshot};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Inner classes compiled from anonymous classes get `$<digits>` names.
const ANONYMOUS_CLASS_NAME_PATTERN: &str = r"^.+\$\d+$";

const JAVA_OBJECT_CLASS: &str = "java.lang.Object";

fn anonymous_class_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(ANONYMOUS_CLASS_NAME_PATTERN).expect("anonymous class pattern is valid")
    })
}

/// How a reference is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    StaticField,
    InstanceField,
    ArrayEntry,
    LocalVariable,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::StaticField => "static field",
            ReferenceKind::InstanceField => "instance field",
            ReferenceKind::ArrayEntry => "array entry",
            ReferenceKind::LocalVariable => "local variable",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of object holds a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HolderKind {
    Class,
    Array,
    Thread,
    Object,
}

impl HolderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderKind::Class => "class",
            HolderKind::Array => "array",
            HolderKind::Thread => "thread",
            HolderKind::Object => "object",
        }
    }
}

impl fmt::Display for HolderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One element of a reference chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceElement {
    /// Field name, array index, or synthetic label of the reference held
    /// by this element; `None` for the final (holder-less) element.
    pub reference_name: Option<String>,
    pub reference_kind: Option<ReferenceKind>,
    pub holder: HolderKind,
    pub class_name: String,
    /// Best-effort annotation, e.g. `(named 'queued-work-looper')` or
    /// `(anonymous subclass of android.os.AsyncTask)`.
    pub extra: Option<String>,
    /// The exclusion rule that applied to the edge leading into this
    /// element, kept for "why was this path deprioritized" reporting.
    pub exclusion: Option<Exclusion>,
    /// Human-readable field descriptions for diagnostic display.
    pub fields: Vec<String>,
}

impl fmt::Display for TraceElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.holder, self.class_name)?;
        if let Some(extra) = &self.extra {
            write!(f, " {}", extra)?;
        }
        if let (Some(name), Some(kind)) = (&self.reference_name, &self.reference_kind) {
            write!(f, " ({} '{}')", kind, name)?;
        } else if let Some(name) = &self.reference_name {
            write!(f, " ('{}')", name)?;
        }
        if let Some(exclusion) = &self.exclusion {
            let label = exclusion.name.as_deref().unwrap_or("unnamed rule");
            write!(f, " [excluded: {}]", label)?;
        }
        Ok(())
    }
}

/// Ordered description of a path from a GC root to a target object.
///
/// The first element is closest to the root; the last element describes
/// the target itself and carries no reference name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceChain {
    elements: Vec<TraceElement>,
}

impl ReferenceChain {
    pub fn elements(&self) -> &[TraceElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl fmt::Display for ReferenceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.elements {
            writeln!(f, "* {}", element)?;
        }
        Ok(())
    }
}

impl PathResults {
    /// Builds the reference chain for a discovered path.
    ///
    /// Walks parent links from the matched node back to the GC root,
    /// prepending one element per non-root step; the root record itself
    /// contributes no element.
    pub fn reference_chain(&self, snapshot: &Snapshot, head: PathNodeIdx) -> ReferenceChain {
        let mut elements = Vec::new();

        // The target itself, with no reference name.
        if let Some(element) = build_element(snapshot, self.node(head).referent, None, None, None) {
            elements.push(element);
        }

        let mut cursor = head;
        while let Some(parent) = self.node(cursor).parent {
            let step = self.node(cursor);
            let holder = self.node(parent).referent;
            if let Some(element) = build_element(
                snapshot,
                holder,
                step.reference_name.clone(),
                step.reference_kind,
                step.exclusion.clone(),
            ) {
                elements.insert(0, element);
            }
            cursor = parent;
        }

        ReferenceChain { elements }
    }
}

/// Describes `holder` and the reference it holds; `None` for GC-root
/// records, which never appear in chains.
fn build_element(
    snapshot: &Snapshot,
    holder: NodeId,
    reference_name: Option<String>,
    reference_kind: Option<ReferenceKind>,
    exclusion: Option<Exclusion>,
) -> Option<TraceElement> {
    let node = snapshot.node(holder)?;
    let class_name = snapshot
        .class_name(holder)
        .unwrap_or("<unknown class>")
        .to_string();

    let (holder_kind, extra) = match &node.kind {
        NodeKind::Root(_) => return None,
        NodeKind::Class(_) => (HolderKind::Class, None),
        NodeKind::Array(_) => (HolderKind::Array, None),
        NodeKind::Instance(instance) => classify_instance(snapshot, holder, instance.class, &class_name),
    };

    Some(TraceElement {
        reference_name,
        reference_kind,
        holder: holder_kind,
        class_name,
        extra,
        exclusion,
        fields: describe_fields(snapshot, node),
    })
}

fn classify_instance(
    snapshot: &Snapshot,
    holder: NodeId,
    class: NodeId,
    class_name: &str,
) -> (HolderKind, Option<String>) {
    if snapshot.extends_thread(class) {
        let name = snapshot.thread_name(holder);
        return (HolderKind::Thread, Some(format!("(named '{}')", name)));
    }
    if anonymous_class_pattern().is_match(class_name) {
        let superclass_name = snapshot
            .node(class)
            .and_then(Node::as_class)
            .and_then(|c| c.superclass)
            .and_then(|s| snapshot.node(s))
            .and_then(Node::as_class)
            .map(|c| c.name.as_str())
            .unwrap_or(JAVA_OBJECT_CLASS);
        return (
            HolderKind::Object,
            Some(format!("(anonymous subclass of {})", superclass_name)),
        );
    }
    (HolderKind::Object, None)
}

/// Per-kind field descriptions for diagnostic display.
fn describe_fields(snapshot: &Snapshot, node: &Node) -> Vec<String> {
    let mut fields = Vec::new();
    match &node.kind {
        NodeKind::Root(_) => {}
        NodeKind::Class(class) => {
            for (name, value) in &class.static_fields {
                fields.push(format!("static {} = {}", name, describe_value(snapshot, value)));
            }
        }
        NodeKind::Array(array) => {
            if let ArrayContents::Objects(elements) = &array.contents {
                for (i, element) in elements.iter().enumerate() {
                    let value = FieldValue::Object(*element);
                    fields.push(format!("[{}] = {}", i, describe_value(snapshot, &value)));
                }
            }
        }
        NodeKind::Instance(instance) => {
            if let Some(class) = snapshot.node(instance.class).and_then(Node::as_class) {
                for (name, value) in &class.static_fields {
                    fields.push(format!(
                        "static {} = {}",
                        name,
                        describe_value(snapshot, value)
                    ));
                }
            }
            for (name, value) in &instance.fields {
                fields.push(format!("{} = {}", name, describe_value(snapshot, value)));
            }
        }
    }
    fields
}

fn describe_value(snapshot: &Snapshot, value: &FieldValue) -> String {
    match value {
        FieldValue::Object(None) => "null".to_string(),
        FieldValue::Object(Some(id)) => {
            let class_name = snapshot.class_name(*id).unwrap_or("object");
            format!("{}@{}", class_name, id)
        }
        FieldValue::Primitive(primitive) => primitive.to_string(),
    }
}
