//! Incremental index maintenance.
//!
//! Each committed change entry is reduced to the minimal set of bucket moves
//! its operation tags imply, instead of reindexing the whole task.

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::change::{ChangeBatch, ChangeEntry, Operation};
use crate::domain::task::{Task, TaskId};

use super::index::{Buckets, Insert, ShardIndex};

const METRIC_CHANGE_APPLIED: &str = "tracker_cache_change_applied_total";
const METRIC_CHANGE_STALE: &str = "tracker_cache_change_stale_total";

/// What happened to one change entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Applied,
    /// Revision not newer than the stored one; nothing was touched.
    Stale,
    /// Invalid record, wrong shard, or an archived task the shard never held.
    Rejected,
}

/// Per-batch tally returned to the notifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub batch: Uuid,
    pub applied: usize,
    pub stale: usize,
    pub rejected: usize,
    /// Operation tags the cache did not recognise.
    pub unrecognized: usize,
}

impl ShardIndex {
    pub(crate) fn apply_batch(&mut self, batch: &ChangeBatch) -> ApplySummary {
        let mut summary = ApplySummary {
            batch: batch.id,
            ..ApplySummary::default()
        };

        for entry in &batch.entries {
            summary.unrecognized += entry
                .operations
                .iter()
                .filter(|operation| matches!(operation, Operation::Unrecognized(_)))
                .count();
            match self.apply_entry(entry) {
                EntryOutcome::Applied => summary.applied += 1,
                EntryOutcome::Stale => summary.stale += 1,
                EntryOutcome::Rejected => summary.rejected += 1,
            }
        }

        counter!(METRIC_CHANGE_APPLIED).increment(summary.applied as u64);
        counter!(METRIC_CHANGE_STALE).increment(summary.stale as u64);
        summary
    }

    /// Apply one entry. The revision gate runs first, so replaying an entry
    /// is a no-op for every index.
    pub(crate) fn apply_entry(&mut self, entry: &ChangeEntry) -> EntryOutcome {
        let after = &entry.after;
        if after.shard != self.shard {
            warn!(
                shard = %self.shard,
                entry_shard = %after.shard,
                task_id = after.id,
                "Change entry routed to the wrong shard"
            );
            return EntryOutcome::Rejected;
        }
        if let Err(err) = after.validate() {
            warn!(shard = %self.shard, error = %err, "Rejected invalid change entry");
            return EntryOutcome::Rejected;
        }

        let Some(current) = self.get(after.id).cloned() else {
            if after.archived {
                return EntryOutcome::Rejected;
            }
            if !entry.operations.contains(&Operation::Created) {
                debug!(
                    shard = %self.shard,
                    task_id = after.id,
                    "Indexing previously unknown task from change entry"
                );
            }
            self.insert_new(Arc::new(after.clone()));
            return EntryOutcome::Applied;
        };

        if after.revision <= current.revision {
            debug!(
                shard = %self.shard,
                task_id = after.id,
                stored = current.revision,
                incoming = after.revision,
                "Dropped stale change entry"
            );
            return EntryOutcome::Stale;
        }

        for operation in &entry.operations {
            self.apply_operation(operation, &current, after);
        }
        self.store(Arc::new(after.clone()));
        EntryOutcome::Applied
    }

    fn apply_operation(&mut self, operation: &Operation, before: &Task, after: &Task) {
        let id = after.id;
        match operation {
            Operation::Created => {
                // Re-creation of a known id: rebuild its buckets from scratch.
                self.unindex(before);
                self.index_all(after, Insert::Incremental);
            }
            Operation::TemperatureChanged => {
                let old = usize::from(before.temperature(self.today));
                let new = usize::from(after.temperature(self.today));
                if old != new {
                    self.temperatures[old].remove(id);
                    self.temperatures[new].add(id);
                }
            }
            Operation::Resolved | Operation::Absolved | Operation::Dissolved => {
                self.statuses.relocate(&before.status, after.status, id);
                if before.solver != after.solver {
                    if let Some(solver) = &before.solver {
                        self.solvers.remove(solver.as_str(), id);
                    }
                }
                if let Some(solver) = &after.solver {
                    self.solvers.insert(solver.clone(), id, Insert::Incremental);
                }
                for name in before.participants.difference(&after.participants) {
                    self.participants.remove(name.as_str(), id);
                }
                for name in before.aspirants.difference(&after.aspirants) {
                    self.aspirants.remove(name.as_str(), id);
                }
            }
            Operation::AreaChanged => self.areas.relocate(&before.area, after.area.clone(), id),
            Operation::VersionChanged => {
                self.versions
                    .relocate(&before.version, after.version.clone(), id)
            }
            Operation::MembershipChanged => {
                diff_names(&mut self.participants, &before.participants, &after.participants, id);
                diff_names(&mut self.aspirants, &before.aspirants, &after.aspirants, id);
                diff_names(&mut self.watchers, &before.watchers, &after.watchers, id);
            }
            // Archived tasks keep their buckets until the next full reload.
            Operation::Archived => {}
            Operation::Unrecognized(tag) => {
                debug!(
                    shard = %self.shard,
                    task_id = id,
                    tag = %tag,
                    "Ignored unrecognized operation"
                );
            }
        }
    }

    fn unindex(&mut self, task: &Task) {
        let id = task.id;
        self.areas.remove(task.area.as_str(), id);
        self.versions.remove(task.version.as_str(), id);
        self.reporters.remove(task.reporter.as_str(), id);
        if let Some(solver) = &task.solver {
            self.solvers.remove(solver.as_str(), id);
        }
        for name in &task.participants {
            self.participants.remove(name.as_str(), id);
        }
        for name in &task.aspirants {
            self.aspirants.remove(name.as_str(), id);
        }
        for name in &task.watchers {
            self.watchers.remove(name.as_str(), id);
        }
        if let Some(predecessor) = task.predecessor {
            self.predecessors.remove(&predecessor, id);
        }
        if let Some(origin) = task.origin {
            self.origins.remove(&origin, id);
        }
        if let Some(serial) = task.serial {
            self.serials.remove(&serial, id);
        }
        self.statuses.remove(&task.status, id);
        self.motives.remove(&task.motive, id);
        self.purposes.remove(&task.purpose, id);
        self.temperatures[usize::from(task.temperature(self.today))].remove(id);
    }
}

fn diff_names(
    buckets: &mut Buckets<String>,
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
    id: TaskId,
) {
    for name in before.difference(after) {
        buckets.remove(name.as_str(), id);
    }
    for name in after.difference(before) {
        buckets.insert(name.clone(), id, Insert::Incremental);
    }
}

#[cfg(test)]
mod tests {
    use time::Date;
    use time::macros::date;

    use super::*;
    use crate::cache::index::Probe;
    use crate::domain::predicate::{Property, Value};
    use crate::domain::task::ShardKey;
    use crate::domain::types::Status;

    const TODAY: Date = date!(2024 - 03 - 01);

    fn shard() -> ShardKey {
        ShardKey::new("core").expect("valid shard key")
    }

    fn task(id: TaskId) -> Task {
        let mut task = Task::new(shard(), id, TODAY);
        task.area = "ui".to_string();
        task.participants.insert("ada".to_string());
        task.aspirants.insert("cy".to_string());
        task
    }

    fn index_with(tasks: &[Task]) -> ShardIndex {
        let mut index = ShardIndex::new(shard(), TODAY);
        for task in tasks {
            index.insert_new(Arc::new(task.clone()));
        }
        index
    }

    fn members(index: &ShardIndex, property: Property, value: Value) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = match index.probe(property, &value) {
            Probe::Bucket(set) => set.iter().collect(),
            Probe::Single(id) => vec![id],
            _ => Vec::new(),
        };
        ids.sort_unstable();
        ids
    }

    fn next(before: &Task) -> Task {
        let mut after = before.clone();
        after.revision += 1;
        after
    }

    #[test]
    fn resolve_moves_status_and_indexes_solver() {
        let before = task(1);
        let mut index = index_with(&[before.clone()]);

        let mut after = next(&before);
        after.status = Status::Resolved;
        after.solver = Some("bob".to_string());
        after.participants.clear();
        let outcome = index.apply_entry(&ChangeEntry::new(
            Some(before),
            after,
            vec![Operation::Resolved],
        ));

        assert_eq!(outcome, EntryOutcome::Applied);
        assert!(members(&index, Property::Status, Value::Status(Status::Unsolved)).is_empty());
        assert_eq!(members(&index, Property::Status, Value::Status(Status::Resolved)), vec![1]);
        assert_eq!(members(&index, Property::Solver, Value::text("bob")), vec![1]);
        assert!(members(&index, Property::Participant, Value::text("ada")).is_empty());
        // Aspirant unchanged, still indexed.
        assert_eq!(members(&index, Property::Aspirant, Value::text("cy")), vec![1]);
    }

    #[test]
    fn membership_applies_set_difference() {
        let before = task(2);
        let mut index = index_with(&[before.clone()]);

        let mut after = next(&before);
        after.participants = ["bob".to_string(), "eve".to_string()].into();
        after.watchers.insert("zed".to_string());
        index.apply_entry(&ChangeEntry::new(
            Some(before),
            after,
            vec![Operation::MembershipChanged],
        ));

        assert!(members(&index, Property::Participant, Value::text("ada")).is_empty());
        assert_eq!(members(&index, Property::Participant, Value::text("eve")), vec![2]);
        assert_eq!(members(&index, Property::Watcher, Value::text("zed")), vec![2]);
    }

    #[test]
    fn temperature_and_area_move_buckets() {
        let before = task(3);
        let mut index = index_with(&[before.clone()]);

        let mut after = next(&before);
        after.emphasis = 4;
        after.area = "api".to_string();
        index.apply_entry(&ChangeEntry::new(
            Some(before),
            after,
            vec![Operation::TemperatureChanged, Operation::AreaChanged],
        ));

        assert!(members(&index, Property::Temperature, Value::Number(0)).is_empty());
        assert_eq!(members(&index, Property::Temperature, Value::Number(28)), vec![3]);
        assert_eq!(members(&index, Property::Area, Value::text("api")), vec![3]);
        assert!(members(&index, Property::Area, Value::text("ui")).is_empty());
    }

    #[test]
    fn stale_entry_touches_nothing() {
        let before = task(4);
        let mut index = index_with(&[before.clone()]);

        let mut stale = before.clone();
        stale.area = "api".to_string();
        let outcome = index.apply_entry(&ChangeEntry::new(
            Some(before.clone()),
            stale,
            vec![Operation::AreaChanged],
        ));

        assert_eq!(outcome, EntryOutcome::Stale);
        assert_eq!(members(&index, Property::Area, Value::text("ui")), vec![4]);
        assert!(members(&index, Property::Area, Value::text("api")).is_empty());
        assert_eq!(index.get(4).map(|task| task.area.as_str()), Some("ui"));
    }

    #[test]
    fn archive_keeps_stale_buckets() {
        let before = task(5);
        let mut index = index_with(&[before.clone()]);

        let mut after = next(&before);
        after.archived = true;
        index.apply_entry(&ChangeEntry::new(Some(before), after, vec![Operation::Archived]));

        assert_eq!(members(&index, Property::Area, Value::text("ui")), vec![5]);
        assert!(index.get(5).is_some_and(|task| task.archived));
    }

    #[test]
    fn unrecognized_tags_are_counted_and_ignored() {
        let before = task(6);
        let mut index = index_with(&[before.clone()]);

        let mut after = next(&before);
        after.area = "api".to_string();
        let batch = ChangeBatch::new(vec![ChangeEntry::new(
            Some(before),
            after,
            vec![Operation::from("teleported")],
        )])
        .expect("batch");
        let summary = index.apply_batch(&batch);

        assert_eq!(summary.applied, 1);
        assert_eq!(summary.unrecognized, 1);
        // No area delta was requested, so the bucket is untouched.
        assert_eq!(members(&index, Property::Area, Value::text("ui")), vec![6]);
    }

    #[test]
    fn created_entry_indexes_new_task() {
        let mut index = index_with(&[]);
        let created = task(7);
        let batch = ChangeBatch::new(vec![ChangeEntry::new(
            None,
            created,
            vec![Operation::Created],
        )])
        .expect("batch");

        let summary = index.apply_batch(&batch);
        assert_eq!(summary.applied, 1);
        assert_eq!(members(&index, Property::Id, Value::Number(7)), vec![7]);
        assert_eq!(members(&index, Property::Participant, Value::text("ada")), vec![7]);

        // Replaying the same batch is a no-op.
        let replay = index.apply_batch(&batch);
        assert_eq!(replay.stale, 1);
        assert_eq!(members(&index, Property::Area, Value::text("ui")), vec![7]);
    }
}
