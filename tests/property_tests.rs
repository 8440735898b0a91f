//! Property tests over the counting table: whatever multiset of keys
//! goes in, the table is exactly that multiset.

use std::collections::HashMap;

use proptest::prelude::*;

use sluice::{HashKind, PartitionedTable};

fn reference_counts(keys: &[u64]) -> HashMap<u64, u64> {
    let mut m = HashMap::new();
    for &k in keys {
        *m.entry(k).or_insert(0) += 1;
    }
    m
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_pipeline_counts_exactly(
        keys in proptest::collection::vec(1u64..500, 0..2000),
        depth_log in 0u32..7,
        wide in any::<bool>(),
    ) {
        let mut table =
            PartitionedTable::new(2048, 0, HashKind::Xxh3, 1 << depth_log, wide, false).unwrap();
        table.insert_batch(&keys);
        table.flush_inserts();

        let got: HashMap<u64, u64> = table.iter_occupied().collect();
        prop_assert_eq!(got, reference_counts(&keys));
    }

    #[test]
    fn prop_find_agrees_with_insert(
        keys in proptest::collection::vec(1u64..300, 1..500),
    ) {
        let mut table =
            PartitionedTable::new(1024, 0, HashKind::City, 32, false, false).unwrap();
        table.insert_batch(&keys);
        table.flush_inserts();

        let expected = reference_counts(&keys);
        let distinct: Vec<u64> = expected.keys().copied().collect();
        let mut out = Vec::new();
        let hits = table.find_batch(&distinct, &mut out);
        prop_assert_eq!(hits as usize, distinct.len());
        for (k, c) in out {
            prop_assert_eq!(expected[&k], c);
        }
    }
}
