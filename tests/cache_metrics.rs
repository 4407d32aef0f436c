mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{TODAY, actor, router, task, warm};
use metrics_util::debugging::DebuggingRecorder;
use tracker_cache::{
    domain::{
        change::{ChangeBatch, ChangeEntry, Operation},
        predicate::{Predicate, Property, Value},
        types::Status,
    },
    infra::memory::{FixedClock, MemoryTaskSource},
};

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let original = task("core", 1, Status::Unsolved);
    let source = MemoryTaskSource::with_tasks([original.clone(), task("web", 1, Status::Unsolved)]);
    let clock = Arc::new(FixedClock::new(TODAY));
    let router = router(&source, &clock);

    // Shard loads and an index query.
    warm(&router, "core").await;
    warm(&router, "web").await;

    // Applied and stale change entries.
    let mut resolved = original.clone();
    resolved.status = Status::Resolved;
    resolved.revision = original.revision + 1;
    let batch = ChangeBatch::new(vec![ChangeEntry::new(
        Some(original),
        resolved,
        vec![Operation::Resolved],
    )])
    .expect("batch");
    router.notify_changes(batch.clone()).await.expect("apply");
    router.notify_changes(batch).await.expect("replay");

    // Fan-out query.
    router
        .query(
            &actor(&["core", "web"]),
            &[Predicate::eq(Property::Status, Value::Status(Status::Unsolved))],
        )
        .await;

    // Rollover.
    clock.advance(1);
    warm(&router, "core").await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tracker_cache_query_total",
        "tracker_cache_query_ms",
        "tracker_cache_shard_load_ms",
        "tracker_cache_change_applied_total",
        "tracker_cache_change_stale_total",
        "tracker_cache_rollover_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
