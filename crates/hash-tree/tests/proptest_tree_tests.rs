//! Property tests for the hash-tree invariants.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use uibuild_core::ResourceMetadata;
use uibuild_hash_tree::{HashTree, HashTreeJson};

fn ts() -> DateTime<Utc> {
    "2024-05-01T10:00:00Z".parse().unwrap()
}

/// Generate a conflict-free set of resource entries: no path is an
/// ancestor of another.
fn arb_entries() -> impl Strategy<Value = Vec<ResourceMetadata>> {
    proptest::collection::btree_map(
        proptest::collection::vec("[a-d]{1,3}", 1..4).prop_map(|segments| {
            format!("/{}", segments.join("/"))
        }),
        "[a-f0-9]{8}",
        1..8,
    )
    .prop_filter("no nesting conflicts", |map| {
        let paths: Vec<&String> = map.keys().collect();
        !paths.iter().any(|p| {
            paths
                .iter()
                .any(|q| q.len() > p.len() && q.starts_with(&format!("{p}/")))
        })
    })
    .prop_map(|map| {
        map.into_iter()
            .enumerate()
            .map(|(idx, (path, integrity))| ResourceMetadata {
                path,
                size: integrity.len() as u64,
                integrity,
                last_modified: ts(),
                inode: idx as u64 + 1,
            })
            .collect()
    })
}

/// Deterministic Fisher-Yates driven by a seed.
fn shuffled(mut entries: Vec<ResourceMetadata>, seed: u64) -> Vec<ResourceMetadata> {
    let mut state = seed | 1;
    for i in (1..entries.len()).rev() {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        let j = (state >> 33) as usize % (i + 1);
        entries.swap(i, j);
    }
    entries
}

proptest! {
    #[test]
    fn root_hash_is_permutation_invariant(entries in arb_entries(), seed in any::<u64>()) {
        let ordered = HashTree::from_metadata(entries.clone(), ts()).unwrap();
        let permuted = HashTree::from_metadata(shuffled(entries, seed), ts()).unwrap();
        prop_assert_eq!(ordered.root_hash(), permuted.root_hash());
    }

    #[test]
    fn json_round_trip_is_lossless(entries in arb_entries()) {
        let tree = HashTree::from_metadata(entries, ts()).unwrap();
        let text = serde_json::to_string(&tree.to_json()).unwrap();
        let parsed: HashTreeJson = serde_json::from_str(&text).unwrap();
        let restored = HashTree::from_json(&parsed).unwrap();
        prop_assert_eq!(restored.root_hash(), tree.root_hash());
        prop_assert_eq!(restored.resource_paths(), tree.resource_paths());
    }

    #[test]
    fn upsert_remove_round_trip_restores_signature(entries in arb_entries()) {
        let mut tree = HashTree::from_metadata(entries.clone(), ts()).unwrap();
        let original = tree.root_hash();
        let extra = ResourceMetadata {
            path: "/zz-extra/new.js".to_string(),
            integrity: "deadbeef".to_string(),
            size: 8,
            last_modified: ts(),
            inode: 999,
        };
        tree.upsert_metadata(vec![extra.clone()], ts()).unwrap();
        tree.remove_resources(&[extra.path], ts()).unwrap();
        prop_assert_eq!(tree.root_hash(), original);
    }
}
