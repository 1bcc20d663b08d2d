//! Property tests for buffering, cleanup and versioning invariants.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use trellis_codec::to_canonical_bytes;
use trellis_core::{
    BackpressureController, CleanupConfig, CoreContext, ManualClock, SystemClock, WriteBuffer,
    WriteBufferConfig,
};
use trellis_storage::InMemoryStore;
use trellis_testkit::prelude::*;
use trellis_versioning::{
    PruneOptions, RestoreOptions, SaveVersionOptions, VersionDiff, VersionManager, VersionQuery,
};

const NOW: u64 = 1_700_000_000_000;
const MAX_AGE_MS: u64 = 1_000;

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
        .block_on(future)
}

fn buffer(writer: Arc<FlakyWriter<u64>>, config: WriteBufferConfig) -> WriteBuffer<u64> {
    WriteBuffer::new(
        "props",
        writer,
        Arc::new(BackpressureController::default()),
        Arc::new(SystemClock),
        config,
    )
    .expect("Invalid buffer config")
}

fn versions() -> (Arc<InMemoryStore>, VersionManager) {
    let store = Arc::new(InMemoryStore::new());
    let manager = VersionManager::new(store.clone(), store.clone());
    (store, manager)
}

fn commit() -> SaveVersionOptions {
    SaveVersionOptions::new().create_commit(true)
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn only_the_last_write_per_id_is_flushed(ops in write_sequence_strategy(6, 40)) {
        let writer = Arc::new(FlakyWriter::new());
        let config = WriteBufferConfig::new().max_buffer_size(1_000).min_flush_size(1);
        let buf = buffer(Arc::clone(&writer), config);

        block_on(async {
            for op in &ops {
                buf.add(op.id.clone(), op.value).await;
            }
            buf.force_flush().await;
        });

        let mut expected = BTreeMap::new();
        for op in &ops {
            expected.insert(op.id.clone(), op.value);
        }
        prop_assert_eq!(writer.written(), expected.clone());
        for id in expected.keys() {
            prop_assert_eq!(writer.write_count(id), 1);
        }
    }

    #[test]
    fn buffer_never_exceeds_max_size(
        ops in write_sequence_strategy(30, 80),
        max in 1usize..8,
    ) {
        let writer = Arc::new(FlakyWriter::new());
        let config = WriteBufferConfig::new().max_buffer_size(max).min_flush_size(1);
        let buf = buffer(Arc::clone(&writer), config);

        let sizes = block_on(async {
            let mut sizes = Vec::new();
            for op in &ops {
                buf.add(op.id.clone(), op.value).await;
                sizes.push(buf.len());
            }
            sizes
        });

        for size in sizes {
            prop_assert!(size <= max, "buffer held {} items with max {}", size, max);
        }
    }

    #[test]
    fn exhausted_items_are_dropped_exactly_once(
        ids in prop::collection::btree_set(field_name_strategy(), 1..10),
        max_retries in 1u32..5,
        extra_flushes in 0usize..4,
    ) {
        let writer = Arc::new(FlakyWriter::new());
        writer.fail_always(true);
        let config = WriteBufferConfig::new()
            .max_buffer_size(1_000)
            .min_flush_size(1)
            .max_retries(max_retries);
        let buf = buffer(Arc::clone(&writer), config);

        let stats = block_on(async {
            for id in &ids {
                buf.add(id.clone(), 1).await;
            }
            for _ in 0..(max_retries as usize + extra_flushes) {
                buf.flush().await;
            }
            buf.get_stats()
        });

        prop_assert_eq!(stats.failed_writes, ids.len() as u64);
        prop_assert!(buf.is_empty());
        for id in &ids {
            prop_assert!(buf.state_of(id).is_none());
        }
    }

    #[test]
    fn cleanup_removes_only_expired_soft_deletes(
        items in prop::collection::vec((any::<bool>(), 0u64..3 * MAX_AGE_MS), 1..30),
    ) {
        let fixture = CleanupFixture::new();
        for (i, (deleted, age)) in items.iter().enumerate() {
            let id = format!("n-{i:02}");
            if *deleted {
                fixture.insert_deleted(&id, NOW - age);
            } else {
                fixture.insert(&id, json!({ "age": age }));
            }
        }
        let clock = Arc::new(ManualClock::new(NOW));
        let cleanup = CoreContext::default()
            .with_clock(clock)
            .cleanup(
                fixture.store.clone(),
                fixture.vectors.clone(),
                fixture.metadata.clone(),
                CleanupConfig::new()
                    .max_age(Duration::from_millis(MAX_AGE_MS))
                    .batch_delay(Duration::ZERO),
            )
            .expect("Invalid cleanup config");

        let report = block_on(cleanup.run_now());

        let mut expected_deleted = 0;
        for (i, (deleted, age)) in items.iter().enumerate() {
            let id = format!("n-{i:02}");
            let expired = *deleted && *age > MAX_AGE_MS;
            prop_assert_eq!(fixture.in_storage(&id), !expired, "item {}", id);
            prop_assert_eq!(fixture.in_any_index(&id), !expired, "item {}", id);
            expected_deleted += usize::from(expired);
        }
        prop_assert_eq!(report.deleted, expected_deleted);
    }

    #[test]
    fn failed_storage_delete_never_touches_indexes(
        failing in prop::collection::btree_set(0usize..10, 0..10),
    ) {
        let fixture = CleanupFixture::new();
        for i in 0..10 {
            let id = format!("n-{i}");
            fixture.insert_deleted(&id, 0);
            if failing.contains(&i) {
                fixture.store.fail_delete(id);
            }
        }
        let cleanup = CoreContext::default()
            .with_clock(Arc::new(ManualClock::new(NOW)))
            .cleanup(
                fixture.store.clone(),
                fixture.vectors.clone(),
                fixture.metadata.clone(),
                CleanupConfig::new()
                    .max_age(Duration::from_millis(MAX_AGE_MS))
                    .batch_delay(Duration::ZERO),
            )
            .expect("Invalid cleanup config");

        let report = block_on(cleanup.run_now());
        prop_assert_eq!(report.storage_errors, failing.len());

        for i in 0..10 {
            let id = format!("n-{i}");
            let targets = fixture.log.targets_for(&id);
            if failing.contains(&i) {
                prop_assert_eq!(targets, vec![Collaborator::Storage]);
                prop_assert!(fixture.in_any_index(&id));
            } else {
                prop_assert_eq!(
                    targets,
                    vec![Collaborator::Storage, Collaborator::Vector, Collaborator::Metadata]
                );
            }
        }
    }

    #[test]
    fn unchanged_saves_return_the_same_version(body in entity_body_strategy()) {
        let (store, manager) = versions();
        store.insert_noun("e", body);

        let (first, second) = block_on(async {
            let first = manager.save("e", commit()).await.unwrap();
            let second = manager.save("e", commit()).await.unwrap();
            (first, second)
        });
        prop_assert_eq!(first, second);
    }

    #[test]
    fn version_numbers_have_no_gaps(
        bodies in prop::collection::vec(0u8..4, 1..12),
    ) {
        let (store, manager) = versions();

        let numbers = block_on(async {
            for b in &bodies {
                store.insert_noun("e", json!({ "state": b }));
                manager.save("e", commit()).await.unwrap();
            }
            manager
                .list("e", VersionQuery::new())
                .await
                .unwrap()
                .into_iter()
                .map(|v| v.version)
                .collect::<Vec<_>>()
        });

        let n = numbers.len() as u32;
        let expected: Vec<u32> = (1..=n).rev().collect();
        prop_assert_eq!(numbers, expected);
    }

    #[test]
    fn restore_is_byte_identical(
        saved in entity_body_strategy(),
        mutated in entity_body_strategy(),
    ) {
        let (store, manager) = versions();
        store.insert_noun("e", saved.clone());

        let restored = block_on(async {
            let v = manager.save("e", commit()).await.unwrap();
            store.insert_noun("e", mutated);
            manager.restore("e", v.version, RestoreOptions::new()).await.unwrap();
            store.noun("e").unwrap()
        });

        prop_assert_eq!(
            to_canonical_bytes(&restored).unwrap(),
            to_canonical_bytes(&saved).unwrap()
        );
    }

    #[test]
    fn prune_keeps_recent_union_tagged(keep in 0usize..6) {
        let (store, manager) = versions();

        let left = block_on(async {
            for n in 1..=5u32 {
                store.insert_noun("e", json!({ "revision": n }));
                let options = if n == 2 { commit().tag("milestone") } else { commit() };
                manager.save("e", options).await.unwrap();
            }
            manager
                .prune("e", PruneOptions::new().keep_recent(keep))
                .await
                .unwrap();
            manager
                .list("e", VersionQuery::new())
                .await
                .unwrap()
                .into_iter()
                .map(|v| v.version)
                .collect::<BTreeSet<u32>>()
        });

        let mut expected: BTreeSet<u32> = (1..=5u32).rev().take(keep).collect();
        expected.insert(2);
        prop_assert_eq!(left, expected);
    }

    #[test]
    fn swapped_comparisons_mirror_each_other(
        a in entity_body_strategy(),
        b in entity_body_strategy(),
    ) {
        let differ = VersionDiff::default();
        let forward = differ.compare(&a, &b, Some(1), Some(2));
        let backward = differ.compare(&b, &a, Some(2), Some(1));

        prop_assert_eq!(&forward.added, &backward.removed);
        prop_assert_eq!(&forward.removed, &backward.added);
        prop_assert_eq!(
            forward.modified.keys().collect::<Vec<_>>(),
            backward.modified.keys().collect::<Vec<_>>()
        );
        prop_assert_eq!(
            forward.type_changed.keys().collect::<Vec<_>>(),
            backward.type_changed.keys().collect::<Vec<_>>()
        );
        prop_assert_eq!(forward.is_empty(), a == b);
    }
}

#[test]
fn equal_bodies_compare_empty() {
    let body: Value = json!({"a": [1, {"b": null}]});
    assert!(VersionDiff::default().compare(&body, &body, None, None).is_empty());
}
