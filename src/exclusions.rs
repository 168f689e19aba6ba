//! Exclusion policy
//!
//! Declarative rules that deprioritize or forbid traversal through known
//! framework references during path finding. A rule is keyed by class
//! name, (class, field) pair, or thread name, and is either "skip unless
//! no other path exists" (`always_exclude = false`) or "always skip"
//! (`always_exclude = true`).
//!
//! The policy is built by an external configuration loader; everything
//! here derives serde so rule sets can be read straight from config.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single exclusion rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    /// Short label for reports, e.g. `InputMethodManager.mCurRootView`.
    #[serde(default)]
    pub name: Option<String>,
    /// Why this reference is known to be benign or transient.
    #[serde(default)]
    pub reason: Option<String>,
    /// If true the edge is never traversed; if false it is only used
    /// when no clean path exists.
    #[serde(default)]
    pub always_exclude: bool,
}

impl Exclusion {
    fn new(name: String, always_exclude: bool) -> Self {
        Exclusion {
            name: Some(name),
            reason: None,
            always_exclude,
        }
    }
}

/// Reference exclusions for the shortest path finder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludedRefs {
    /// class name -> field name -> rule, for instance fields.
    #[serde(default)]
    pub field: HashMap<String, HashMap<String, Exclusion>>,
    /// class name -> static field name -> rule.
    #[serde(default)]
    pub static_field: HashMap<String, HashMap<String, Exclusion>>,
    /// thread name -> rule, applied to thread-local roots.
    #[serde(default)]
    pub thread: HashMap<String, Exclusion>,
    /// class name -> rule, applied to every field of matching instances.
    #[serde(default)]
    pub class: HashMap<String, Exclusion>,
}

impl ExcludedRefs {
    pub fn builder() -> ExcludedRefsBuilder {
        ExcludedRefsBuilder::default()
    }

    pub fn thread_exclusion(&self, thread_name: &str) -> Option<&Exclusion> {
        self.thread.get(thread_name)
    }

    pub fn static_field_exclusion(&self, class: &str, field: &str) -> Option<&Exclusion> {
        self.static_field.get(class)?.get(field)
    }

    /// Resolves the class-level exclusion over an inheritance chain
    /// (subclass first). A rule found further up the chain replaces the
    /// current one unless the current one is already `always_exclude`;
    /// once an always-exclude rule is picked up it sticks.
    pub fn resolve_class_exclusion<'a, 'b>(
        &'a self,
        chain: impl Iterator<Item = &'b str>,
    ) -> Option<&'a Exclusion> {
        let mut resolved: Option<&Exclusion> = None;
        for class_name in chain {
            if let Some(rule) = self.class.get(class_name) {
                match resolved {
                    Some(current) if current.always_exclude => {}
                    _ => resolved = Some(rule),
                }
            }
        }
        resolved
    }

    /// Merges field-level rules over an inheritance chain (subclass
    /// first). On a field-name collision the subclass rule survives
    /// unless the superclass rule is strictly stronger.
    pub fn merged_field_exclusions<'a, 'b>(
        &'a self,
        chain: impl Iterator<Item = &'b str>,
    ) -> HashMap<&'a str, &'a Exclusion> {
        let mut merged: HashMap<&str, &Exclusion> = HashMap::new();
        for class_name in chain {
            let Some(rules) = self.field.get(class_name) else {
                continue;
            };
            for (field_name, rule) in rules {
                match merged.get(field_name.as_str()) {
                    Some(existing) if existing.always_exclude || !rule.always_exclude => {}
                    _ => {
                        merged.insert(field_name.as_str(), rule);
                    }
                }
            }
        }
        merged
    }
}

/// Fluent builder for [`ExcludedRefs`].
///
/// `reason` annotates the most recently added rule.
#[derive(Debug, Default)]
pub struct ExcludedRefsBuilder {
    refs: ExcludedRefs,
    last: Option<LastRule>,
}

#[derive(Debug)]
enum LastRule {
    Field(String, String),
    StaticField(String, String),
    Thread(String),
    Class(String),
}

impl ExcludedRefsBuilder {
    pub fn instance_field(self, class: &str, field: &str) -> Self {
        self.add_instance_field(class, field, false)
    }

    pub fn instance_field_always(self, class: &str, field: &str) -> Self {
        self.add_instance_field(class, field, true)
    }

    fn add_instance_field(mut self, class: &str, field: &str, always: bool) -> Self {
        self.refs.field.entry(class.to_string()).or_default().insert(
            field.to_string(),
            Exclusion::new(format!("{class}.{field}"), always),
        );
        self.last = Some(LastRule::Field(class.to_string(), field.to_string()));
        self
    }

    pub fn static_field(self, class: &str, field: &str) -> Self {
        self.add_static_field(class, field, false)
    }

    pub fn static_field_always(self, class: &str, field: &str) -> Self {
        self.add_static_field(class, field, true)
    }

    fn add_static_field(mut self, class: &str, field: &str, always: bool) -> Self {
        self.refs
            .static_field
            .entry(class.to_string())
            .or_default()
            .insert(
                field.to_string(),
                Exclusion::new(format!("static {class}.{field}"), always),
            );
        self.last = Some(LastRule::StaticField(class.to_string(), field.to_string()));
        self
    }

    pub fn thread(self, name: &str) -> Self {
        self.add_thread(name, false)
    }

    pub fn thread_always(self, name: &str) -> Self {
        self.add_thread(name, true)
    }

    fn add_thread(mut self, name: &str, always: bool) -> Self {
        self.refs
            .thread
            .insert(name.to_string(), Exclusion::new(format!("thread {name}"), always));
        self.last = Some(LastRule::Thread(name.to_string()));
        self
    }

    pub fn class(self, name: &str) -> Self {
        self.add_class(name, false)
    }

    pub fn class_always(self, name: &str) -> Self {
        self.add_class(name, true)
    }

    fn add_class(mut self, name: &str, always: bool) -> Self {
        self.refs
            .class
            .insert(name.to_string(), Exclusion::new(name.to_string(), always));
        self.last = Some(LastRule::Class(name.to_string()));
        self
    }

    /// Records why the most recently added rule exists.
    pub fn reason(mut self, reason: &str) -> Self {
        let rule = match &self.last {
            Some(LastRule::Field(class, field)) => self
                .refs
                .field
                .get_mut(class)
                .and_then(|fields| fields.get_mut(field)),
            Some(LastRule::StaticField(class, field)) => self
                .refs
                .static_field
                .get_mut(class)
                .and_then(|fields| fields.get_mut(field)),
            Some(LastRule::Thread(name)) => self.refs.thread.get_mut(name),
            Some(LastRule::Class(name)) => self.refs.class.get_mut(name),
            None => None,
        };
        if let Some(rule) = rule {
            rule.reason = Some(reason.to_string());
        }
        self
    }

    pub fn build(self) -> ExcludedRefs {
        self.refs
    }
}

/// A class-name pattern used by the duplicate buffer detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawBufferPattern", into = "RawBufferPattern")]
pub struct BufferPattern {
    pattern: Regex,
    /// Only applied to the GC-root holder class, not to every chain
    /// element.
    for_gc_root_only: bool,
}

impl BufferPattern {
    pub fn new(pattern: &str, for_gc_root_only: bool) -> Result<Self, regex::Error> {
        Ok(BufferPattern {
            pattern: Regex::new(pattern)?,
            for_gc_root_only,
        })
    }

    pub fn for_gc_root_only(&self) -> bool {
        self.for_gc_root_only
    }

    /// Anchored match against a fully qualified class name.
    pub fn matches(&self, class_name: &str) -> bool {
        self.pattern
            .find(class_name)
            .is_some_and(|m| m.start() == 0 && m.end() == class_name.len())
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawBufferPattern {
    pattern: String,
    #[serde(default)]
    for_gc_root_only: bool,
}

impl TryFrom<RawBufferPattern> for BufferPattern {
    type Error = regex::Error;

    fn try_from(raw: RawBufferPattern) -> Result<Self, Self::Error> {
        BufferPattern::new(&raw.pattern, raw.for_gc_root_only)
    }
}

impl From<BufferPattern> for RawBufferPattern {
    fn from(pattern: BufferPattern) -> Self {
        RawBufferPattern {
            pattern: pattern.pattern.as_str().to_string(),
            for_gc_root_only: pattern.for_gc_root_only,
        }
    }
}

/// Buffer-holder exclusions for the duplicate detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludedBuffers {
    #[serde(default)]
    pub class_name_patterns: Vec<BufferPattern>,
}

impl ExcludedBuffers {
    pub fn with_pattern(mut self, pattern: BufferPattern) -> Self {
        self.class_name_patterns.push(pattern);
        self
    }

    /// Patterns that apply to the GC-root holder class.
    pub fn gc_root_patterns(&self) -> impl Iterator<Item = &BufferPattern> {
        self.class_name_patterns
            .iter()
            .filter(|p| p.for_gc_root_only())
    }
}
