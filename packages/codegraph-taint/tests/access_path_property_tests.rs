//! Property-based tests for access path construction
//!
//! Invariants:
//! - A path never holds more fields than the configured bound
//! - Cutting a path marks it as tainting all sub-fields
//! - Equal paths hash equally

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use proptest::prelude::*;

use codegraph_taint::features::taint_analysis::{AccessPath, AccessPathFactory};
use codegraph_taint::shared::models::{Field, Local, Type, Value};
use codegraph_taint::InfoflowConfig;

fn factory(bound: usize) -> AccessPathFactory {
    AccessPathFactory::new(&InfoflowConfig {
        access_path_length: bound,
        ..InfoflowConfig::default()
    })
}

fn chain(names: &[u8]) -> Vec<Field> {
    names
        .iter()
        .map(|n| Field::instance("Node", format!("f{}", n), Type::class("Node")))
        .collect()
}

fn node() -> Value {
    Value::local(&Local::new("n", Type::class("Node")))
}

fn hash_of(ap: &AccessPath) -> u64 {
    let mut hasher = DefaultHasher::new();
    ap.hash(&mut hasher);
    hasher.finish()
}

proptest! {
    #[test]
    fn field_count_never_exceeds_bound(
        bound in 1usize..6,
        names in prop::collection::vec(0u8..4, 0..10),
        taint_sub_fields in any::<bool>(),
    ) {
        let ap = factory(bound)
            .create_access_path_appending(&node(), &chain(&names), taint_sub_fields)
            .unwrap();

        prop_assert!(ap.field_count() <= bound);
        prop_assert_eq!(ap.field_count(), names.len().min(bound));
    }

    #[test]
    fn cut_paths_taint_sub_fields(
        bound in 1usize..4,
        names in prop::collection::vec(0u8..4, 4..8),
    ) {
        let ap = factory(bound)
            .create_access_path_appending(&node(), &chain(&names), false)
            .unwrap();

        prop_assert!(ap.is_cut_off_approximation());
        prop_assert!(ap.taint_sub_fields());
    }

    #[test]
    fn paths_within_bound_are_kept_exact(
        names in prop::collection::vec(0u8..4, 0..3),
    ) {
        let ap = factory(5)
            .create_access_path_appending(&node(), &chain(&names), false)
            .unwrap();

        prop_assert!(!ap.is_cut_off_approximation());
        prop_assert!(!ap.taint_sub_fields());
        let expected = chain(&names);
        prop_assert_eq!(ap.fields(), expected.as_slice());
    }

    #[test]
    fn equal_paths_hash_equally(
        bound in 1usize..6,
        names in prop::collection::vec(0u8..4, 0..8),
        taint_sub_fields in any::<bool>(),
    ) {
        let factory = factory(bound);
        let a = factory
            .create_access_path_appending(&node(), &chain(&names), taint_sub_fields)
            .unwrap();
        let b = factory
            .create_access_path_appending(&node(), &chain(&names), taint_sub_fields)
            .unwrap();

        prop_assert_eq!(&a, &b);
        prop_assert_eq!(hash_of(&a), hash_of(&b));
    }
}
