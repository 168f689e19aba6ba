//! Integration tests for the shortest path finder
//!
//! These tests build small snapshots through `SnapshotBuilder` and
//! verify the two-tier search semantics: shortest clean path first,
//! deferred fallback through exclusions, and the admission filters.

use leakscope::{
    AnalysisError, ExcludedRefs, FieldValue, NodeId, PathFinder, ReferenceKind, RootKind,
    SnapshotBuilder,
};

fn no_exclusions() -> ExcludedRefs {
    ExcludedRefs::default()
}

/// Run with `RUST_LOG=leakscope=debug` to see search diagnostics.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// A class holding a single static reference, pinned by a GC root.
/// Returns `(snapshot builder, holder class id)`.
fn rooted_static_holder(
    builder: &mut SnapshotBuilder,
    class_name: &str,
    field: &str,
    target: NodeId,
) -> NodeId {
    let holder = builder.class(class_name, None);
    builder.static_field(holder, field, FieldValue::Object(Some(target)));
    builder.root(RootKind::StaticHolder, Some(holder));
    holder
}

mod basic_search {
    use super::*;

    #[test]
    fn finds_target_behind_static_field() {
        init_logging();
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let activity = builder.instance(object);
        rooted_static_holder(&mut builder, "com.example.Cache", "sLeaked", activity);
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[activity]).unwrap();

        let result = results.get(activity).expect("target should be reachable");
        assert!(!result.excluded);
        assert_eq!(results.path_len(result.head), 2);
    }

    #[test]
    fn prefers_the_shorter_of_two_clean_paths() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);

        // Long route: holder -> middle -> target.
        let middle = builder.instance(object);
        builder.field(middle, "next", FieldValue::Object(Some(target)));
        rooted_static_holder(&mut builder, "com.example.Long", "sHead", middle);

        // Short route: holder -> target.
        rooted_static_holder(&mut builder, "com.example.Short", "sDirect", target);

        let snapshot = builder.build();
        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();

        let result = results.get(target).unwrap();
        assert_eq!(results.path_len(result.head), 2);
        let chain = results.reference_chain(&snapshot, result.head);
        assert_eq!(chain.elements()[0].class_name, "com.example.Short");
    }

    #[test]
    fn empty_target_set_returns_empty_results() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let held = builder.instance(object);
        builder.root(RootKind::Native, Some(held));
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[]).unwrap();
        assert!(results.is_empty());
        assert!(results.arena().is_empty());
    }

    #[test]
    fn unreachable_target_is_absent_not_an_error() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let held = builder.instance(object);
        let orphan = builder.instance(object);
        builder.root(RootKind::Native, Some(held));
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[orphan]).unwrap();
        assert!(results.get(orphan).is_none());
    }

    #[test]
    fn resolves_multiple_targets_in_one_search() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let first = builder.instance(object);
        let second = builder.instance(object);
        rooted_static_holder(&mut builder, "com.example.A", "sFirst", first);
        rooted_static_holder(&mut builder, "com.example.B", "sSecond", second);
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[first, second]).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn traverses_object_array_entries() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        let array = builder.object_array("java.lang.Object[]", vec![None, Some(target)]);
        rooted_static_holder(&mut builder, "com.example.Registry", "sAll", array);
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();

        let result = results.get(target).unwrap();
        let chain = results.reference_chain(&snapshot, result.head);
        let last_edge = &chain.elements()[chain.len() - 2];
        assert_eq!(last_edge.reference_name.as_deref(), Some("[1]"));
        assert_eq!(last_edge.reference_kind, Some(ReferenceKind::ArrayEntry));
    }
}

mod admission_filters {
    use super::*;
    use leakscope::PrimitiveKind;

    #[test]
    fn skips_synthetic_static_overhead_field() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        let holder = builder.class("com.example.App", None);
        builder.static_field(holder, "$staticOverhead", FieldValue::Object(Some(target)));
        builder.root(RootKind::StaticHolder, Some(holder));
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();
        assert!(results.get(target).is_none());
    }

    #[test]
    fn strings_are_skipped_unless_targeted() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let name = builder.string("leaky");
        let other = builder.instance(object);
        let holder_class = rooted_static_holder(&mut builder, "com.example.Names", "sName", name);
        builder.static_field(holder_class, "sOther", FieldValue::Object(Some(other)));
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);

        // Searching for a non-string target never enqueues the string.
        let results = finder.find_paths(&[other]).unwrap();
        assert!(results.get(other).is_some());
        assert!(!results.arena().iter().any(|node| node.referent == name));

        // Searching for the string itself disables the skip.
        let results = finder.find_paths(&[name]).unwrap();
        assert!(results.get(name).is_some());
    }

    #[test]
    fn primitive_wrapper_values_are_dropped() {
        let mut builder = SnapshotBuilder::new();
        let integer_class = builder.class("java.lang.Integer", None);
        let boxed = builder.instance(integer_class);
        rooted_static_holder(&mut builder, "com.example.Counters", "sCount", boxed);
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[boxed]).unwrap();
        assert!(results.get(boxed).is_none());
    }

    #[test]
    fn primitive_arrays_are_not_expanded() {
        let mut builder = SnapshotBuilder::new();
        let bytes = builder.primitive_array(PrimitiveKind::Byte, vec![0; 16]);
        rooted_static_holder(&mut builder, "com.example.Buffers", "sRaw", bytes);
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[bytes]).unwrap();
        assert!(results.get(bytes).is_none());
    }
}

mod exclusion_semantics {
    use super::*;

    #[test]
    fn excluded_thread_root_loses_to_clean_static_path() {
        // Two roots reach the target: a static field and a local
        // variable on an always-excluded thread. The static field
        // must win.
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        rooted_static_holder(&mut builder, "com.example.Holder", "sRef", target);
        let main_thread = builder.thread("main");
        builder.thread_local_root(Some(target), Some(main_thread));
        let snapshot = builder.build();

        let excluded = ExcludedRefs::builder().thread_always("main").build();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();

        let result = results.get(target).unwrap();
        assert!(!result.excluded);
        let chain = results.reference_chain(&snapshot, result.head);
        assert_eq!(chain.elements()[0].class_name, "com.example.Holder");
    }

    #[test]
    fn deferred_path_is_used_when_no_clean_path_exists() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        let leaker_class = builder.class("com.example.Leaker", None);
        let leaker = builder.instance(leaker_class);
        builder.field(leaker, "ref", FieldValue::Object(Some(target)));
        builder.root(RootKind::Native, Some(leaker));
        let snapshot = builder.build();

        let excluded = ExcludedRefs::builder()
            .instance_field("com.example.Leaker", "ref")
            .reason("cleared in onDestroy")
            .build();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();

        let result = results.get(target).unwrap();
        assert!(result.excluded);
        let chain = results.reference_chain(&snapshot, result.head);
        let excluded_element = chain
            .elements()
            .iter()
            .find(|e| e.exclusion.is_some())
            .expect("chain should carry the exclusion");
        assert_eq!(
            excluded_element.exclusion.as_ref().unwrap().reason.as_deref(),
            Some("cleared in onDestroy")
        );
    }

    #[test]
    fn clean_path_wins_over_shorter_excluded_path() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);

        // One-edge path through an excluded field.
        let leaker_class = builder.class("com.example.Leaker", None);
        let leaker = builder.instance(leaker_class);
        builder.field(leaker, "ref", FieldValue::Object(Some(target)));
        builder.root(RootKind::Native, Some(leaker));

        // Longer clean path.
        let middle = builder.instance(object);
        builder.field(middle, "next", FieldValue::Object(Some(target)));
        rooted_static_holder(&mut builder, "com.example.Clean", "sHead", middle);

        let snapshot = builder.build();
        let excluded = ExcludedRefs::builder()
            .instance_field("com.example.Leaker", "ref")
            .build();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();

        let result = results.get(target).unwrap();
        assert!(!result.excluded);
        assert_eq!(results.path_len(result.head), 3);
    }

    #[test]
    fn always_excluded_field_makes_target_unreachable() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        let holder_class = builder.class("com.example.Holder", None);
        let holder = builder.instance(holder_class);
        builder.field(holder, "ref", FieldValue::Object(Some(target)));
        builder.root(RootKind::Native, Some(holder));
        let snapshot = builder.build();

        let excluded = ExcludedRefs::builder()
            .instance_field_always("com.example.Holder", "ref")
            .build();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();
        assert!(results.get(target).is_none());
        // Not even the deferred tier may cross the edge.
        assert!(!results.arena().iter().any(|node| node.referent == target));
    }

    #[test]
    fn always_excluded_class_skips_every_field() {
        // Precedence scenario: a weaker field rule on the same class
        // does not reinstate traversal once the class rule is
        // always-exclude.
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        let holder_class = builder.class("com.example.Secret", None);
        let holder = builder.instance(holder_class);
        builder.field(holder, "ref", FieldValue::Object(Some(target)));
        builder.root(RootKind::Native, Some(holder));
        let snapshot = builder.build();

        let excluded = ExcludedRefs::builder()
            .class_always("com.example.Secret")
            .instance_field("com.example.Secret", "ref")
            .build();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();
        assert!(results.get(target).is_none());
    }

    #[test]
    fn class_exclusion_is_inherited_from_superclass() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        let base = builder.class("com.example.Base", None);
        let sub = builder.class("com.example.Sub", Some(base));
        let holder = builder.instance(sub);
        builder.field(holder, "ref", FieldValue::Object(Some(target)));
        builder.root(RootKind::Native, Some(holder));
        let snapshot = builder.build();

        let excluded = ExcludedRefs::builder()
            .class_always("com.example.Base")
            .build();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();
        assert!(results.get(target).is_none());
    }

    #[test]
    fn excluded_static_field_defers_instead_of_dropping() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        rooted_static_holder(&mut builder, "com.example.Cache", "sRef", target);
        let snapshot = builder.build();

        let excluded = ExcludedRefs::builder()
            .static_field("com.example.Cache", "sRef")
            .build();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();

        let result = results.get(target).unwrap();
        assert!(result.excluded);
    }
}

mod thread_roots {
    use super::*;
    use leakscope::HolderKind;

    #[test]
    fn thread_local_chain_reports_the_owning_thread() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        let worker = builder.thread("worker-1");
        builder.thread_local_root(Some(target), Some(worker));
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();

        let result = results.get(target).unwrap();
        let chain = results.reference_chain(&snapshot, result.head);
        let first = &chain.elements()[0];
        assert_eq!(first.holder, HolderKind::Thread);
        assert_eq!(first.extra.as_deref(), Some("(named 'worker-1')"));
        assert_eq!(first.reference_name.as_deref(), Some("<Java Local>"));
        assert_eq!(first.reference_kind, Some(ReferenceKind::LocalVariable));
    }

    #[test]
    fn non_excluded_thread_root_still_resolves() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        let worker = builder.thread("worker-1");
        builder.thread_local_root(Some(target), Some(worker));
        let snapshot = builder.build();

        let excluded = ExcludedRefs::builder().thread("some-other-thread").build();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let results = finder.find_paths(&[target]).unwrap();
        assert!(!results.get(target).unwrap().excluded);
    }

    #[test]
    fn unresolvable_owning_thread_is_a_structural_fault() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        let root = builder.thread_local_root(Some(target), None);
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let err = finder.find_paths(&[target]).unwrap_err();
        assert_eq!(err, AnalysisError::UnresolvedRootThread { root });
    }

    #[test]
    fn finder_state_resets_between_searches() {
        let mut builder = SnapshotBuilder::new();
        let object = builder.class("java.lang.Object", None);
        let target = builder.instance(object);
        rooted_static_holder(&mut builder, "com.example.Holder", "sRef", target);
        let snapshot = builder.build();

        let excluded = no_exclusions();
        let mut finder = PathFinder::new(&snapshot, &excluded);
        let first = finder.find_paths(&[target]).unwrap();
        let second = finder.find_paths(&[target]).unwrap();
        assert_eq!(
            first.path_len(first.get(target).unwrap().head),
            second.path_len(second.get(target).unwrap().head),
        );
    }
}

#[test]
fn missing_referenced_node_is_a_structural_fault() {
    let mut builder = SnapshotBuilder::new();
    let object = builder.class("java.lang.Object", None);
    let holder_class = builder.class("com.example.Holder", None);
    let holder = builder.instance(holder_class);
    // Reference to an id the snapshot does not contain.
    let dangling = NodeId(0xdead_beef);
    builder.field(holder, "ref", FieldValue::Object(Some(dangling)));
    builder.root(RootKind::Native, Some(holder));
    let target = builder.instance(object);
    builder.root(RootKind::Native, Some(target));
    let snapshot = builder.build();

    let excluded = ExcludedRefs::default();
    let mut finder = PathFinder::new(&snapshot, &excluded);
    // Searching for an unreachable id forces full expansion, including
    // the dangling edge.
    let unreachable = NodeId(0xfeed);
    let err = finder.find_paths(&[unreachable]).unwrap_err();
    assert_eq!(err, AnalysisError::MissingNode { id: dangling });
}
