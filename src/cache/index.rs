//! Per-shard index state.
//!
//! `ShardIndex` is plain data: it is only ever touched from the owning shard
//! context (see `shard.rs`), so nothing in here locks.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use serde::Serialize;
use time::Date;
use tracing::warn;

use crate::application::repos::{RepoError, TaskSource};
use crate::domain::predicate::{Property, Value};
use crate::domain::task::{MAX_TEMPERATURE, ShardKey, Task, TaskId};
use crate::domain::types::{Motive, Purpose, Status};

use super::id_set::CompactIdSet;

const TEMPERATURE_BUCKETS: usize = MAX_TEMPERATURE as usize + 1;

/// How ids enter a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insert {
    /// Append without membership check (initial load, new tasks).
    Bulk,
    /// Idempotent add (incremental deltas).
    Incremental,
}

/// Key → id-set map for one indexed property.
#[derive(Debug)]
pub(crate) struct Buckets<K> {
    map: HashMap<K, CompactIdSet>,
}

impl<K> Default for Buckets<K> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> Buckets<K> {
    pub(crate) fn insert(&mut self, key: K, id: TaskId, mode: Insert) {
        let set = self.map.entry(key).or_default();
        match mode {
            Insert::Bulk => set.init(id),
            Insert::Incremental => {
                set.add(id);
            }
        }
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q, id: TaskId)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        if let Some(set) = self.map.get_mut(key) {
            set.remove(id);
        }
    }

    /// Move `id` from one key's bucket to another's. No-op when keys match.
    pub(crate) fn relocate(&mut self, from: &K, to: K, id: TaskId) {
        if *from == to {
            return;
        }
        self.remove(from, id);
        self.insert(to, id, Insert::Incremental);
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<&CompactIdSet>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.get(key)
    }

    /// Number of keys with at least one live member.
    pub(crate) fn occupied(&self) -> usize {
        self.map.values().filter(|set| !set.is_empty()).count()
    }
}

/// Outcome of probing an index with an equality value.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Probe<'a> {
    /// The property has no index for this value type.
    NotIndexed,
    /// Indexed, but nothing carries this value.
    Empty,
    /// Exactly one id (primary array hit).
    Single(TaskId),
    Bucket(&'a CompactIdSet),
}

impl Probe<'_> {
    pub(crate) fn size(&self) -> usize {
        match self {
            Probe::NotIndexed => usize::MAX,
            Probe::Empty => 0,
            Probe::Single(_) => 1,
            Probe::Bucket(set) => set.len(),
        }
    }
}

/// Full index state of one shard.
#[derive(Debug)]
pub struct ShardIndex {
    pub(crate) shard: ShardKey,
    pub(crate) today: Date,
    pub(crate) by_idn: Vec<Option<Arc<Task>>>,
    pub(crate) areas: Buckets<String>,
    pub(crate) versions: Buckets<String>,
    pub(crate) reporters: Buckets<String>,
    pub(crate) solvers: Buckets<String>,
    pub(crate) participants: Buckets<String>,
    pub(crate) aspirants: Buckets<String>,
    pub(crate) watchers: Buckets<String>,
    pub(crate) predecessors: Buckets<u32>,
    pub(crate) origins: Buckets<u32>,
    pub(crate) serials: Buckets<u32>,
    pub(crate) statuses: Buckets<Status>,
    pub(crate) motives: Buckets<Motive>,
    pub(crate) purposes: Buckets<Purpose>,
    pub(crate) temperatures: Vec<CompactIdSet>,
}

impl ShardIndex {
    pub fn new(shard: ShardKey, today: Date) -> Self {
        Self {
            shard,
            today,
            by_idn: Vec::new(),
            areas: Buckets::default(),
            versions: Buckets::default(),
            reporters: Buckets::default(),
            solvers: Buckets::default(),
            participants: Buckets::default(),
            aspirants: Buckets::default(),
            watchers: Buckets::default(),
            predecessors: Buckets::default(),
            origins: Buckets::default(),
            serials: Buckets::default(),
            statuses: Buckets::default(),
            motives: Buckets::default(),
            purposes: Buckets::default(),
            temperatures: vec![CompactIdSet::new(); TEMPERATURE_BUCKETS],
        }
    }

    /// Build the index from one full scan of the store.
    pub fn load(shard: ShardKey, today: Date, source: &dyn TaskSource) -> Result<Self, RepoError> {
        let mut index = Self::new(shard, today);
        let mut skipped = 0usize;
        let shard = index.shard.clone();

        source.scan(&shard, &mut |task| {
            if task.archived || task.shard != shard || task.validate().is_err() {
                skipped += 1;
                return;
            }
            if index.get(task.id).is_some() {
                skipped += 1;
                return;
            }
            index.insert_new(Arc::new(task));
        })?;

        if skipped > 0 {
            warn!(shard = %shard, skipped, "Skipped tasks during shard load");
        }
        Ok(index)
    }

    pub fn shard(&self) -> &ShardKey {
        &self.shard
    }

    pub fn today(&self) -> Date {
        self.today
    }

    pub fn get(&self, id: TaskId) -> Option<&Arc<Task>> {
        self.by_idn.get(usize::from(id)).and_then(Option::as_ref)
    }

    /// Every task in the primary array, in id order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> + '_ {
        self.by_idn.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.tasks().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a task that is not yet known: primary slot plus every bucket via
    /// the bulk path.
    pub(crate) fn insert_new(&mut self, task: Arc<Task>) {
        self.index_all(&task, Insert::Bulk);
        self.store(task);
    }

    pub(crate) fn store(&mut self, task: Arc<Task>) {
        let slot = usize::from(task.id);
        if slot >= self.by_idn.len() {
            self.by_idn.resize((slot + 1).next_power_of_two(), None);
        }
        self.by_idn[slot] = Some(task);
    }

    pub(super) fn index_all(&mut self, task: &Task, mode: Insert) {
        let id = task.id;
        self.areas.insert(task.area.clone(), id, mode);
        self.versions.insert(task.version.clone(), id, mode);
        self.reporters.insert(task.reporter.clone(), id, mode);
        if let Some(solver) = &task.solver {
            self.solvers.insert(solver.clone(), id, mode);
        }
        for name in &task.participants {
            self.participants.insert(name.clone(), id, mode);
        }
        for name in &task.aspirants {
            self.aspirants.insert(name.clone(), id, mode);
        }
        for name in &task.watchers {
            self.watchers.insert(name.clone(), id, mode);
        }
        if let Some(predecessor) = task.predecessor {
            self.predecessors.insert(predecessor, id, mode);
        }
        if let Some(origin) = task.origin {
            self.origins.insert(origin, id, mode);
        }
        if let Some(serial) = task.serial {
            self.serials.insert(serial, id, mode);
        }
        self.statuses.insert(task.status, id, mode);
        self.motives.insert(task.motive, id, mode);
        self.purposes.insert(task.purpose, id, mode);

        let bucket = &mut self.temperatures[usize::from(task.temperature(self.today))];
        match mode {
            Insert::Bulk => bucket.init(id),
            Insert::Incremental => {
                bucket.add(id);
            }
        }
    }

    /// Look up the bucket an equality on `property = value` would select.
    pub(crate) fn probe(&self, property: Property, value: &Value) -> Probe<'_> {
        let found = match (property, value) {
            (Property::Id, Value::Number(number)) => {
                return TaskId::try_from(*number)
                    .ok()
                    .filter(|id| self.get(*id).is_some())
                    .map_or(Probe::Empty, Probe::Single);
            }
            (Property::Area, Value::Text(text)) => self.areas.get(text.as_str()),
            (Property::Version, Value::Text(text)) => self.versions.get(text.as_str()),
            (Property::Reporter, Value::Text(text)) => self.reporters.get(text.as_str()),
            (Property::Solver, Value::Text(text)) => self.solvers.get(text.as_str()),
            (Property::Participant, Value::Text(text)) => self.participants.get(text.as_str()),
            (Property::Aspirant, Value::Text(text)) => self.aspirants.get(text.as_str()),
            (Property::Watcher, Value::Text(text)) => self.watchers.get(text.as_str()),
            (Property::Predecessor, Value::Number(number)) => {
                number_key(*number).and_then(|key| self.predecessors.get(&key))
            }
            (Property::Origin, Value::Number(number)) => {
                number_key(*number).and_then(|key| self.origins.get(&key))
            }
            (Property::Serial, Value::Number(number)) => {
                number_key(*number).and_then(|key| self.serials.get(&key))
            }
            (Property::Status, Value::Status(status)) => self.statuses.get(status),
            (Property::Motive, Value::Motive(motive)) => self.motives.get(motive),
            (Property::Purpose, Value::Purpose(purpose)) => self.purposes.get(purpose),
            (Property::Temperature, Value::Number(number)) => usize::try_from(*number)
                .ok()
                .and_then(|bucket| self.temperatures.get(bucket)),
            _ => return Probe::NotIndexed,
        };

        match found {
            Some(set) if !set.is_empty() => Probe::Bucket(set),
            _ => Probe::Empty,
        }
    }

    pub fn stats(&self) -> ShardStats {
        let mut buckets = BTreeMap::new();
        buckets.insert(Property::Area.as_str(), self.areas.occupied());
        buckets.insert(Property::Version.as_str(), self.versions.occupied());
        buckets.insert(Property::Reporter.as_str(), self.reporters.occupied());
        buckets.insert(Property::Solver.as_str(), self.solvers.occupied());
        buckets.insert(Property::Participant.as_str(), self.participants.occupied());
        buckets.insert(Property::Aspirant.as_str(), self.aspirants.occupied());
        buckets.insert(Property::Watcher.as_str(), self.watchers.occupied());
        buckets.insert(Property::Predecessor.as_str(), self.predecessors.occupied());
        buckets.insert(Property::Origin.as_str(), self.origins.occupied());
        buckets.insert(Property::Serial.as_str(), self.serials.occupied());
        buckets.insert(Property::Status.as_str(), self.statuses.occupied());
        buckets.insert(Property::Motive.as_str(), self.motives.occupied());
        buckets.insert(Property::Purpose.as_str(), self.purposes.occupied());
        buckets.insert(
            Property::Temperature.as_str(),
            self.temperatures.iter().filter(|set| !set.is_empty()).count(),
        );

        ShardStats {
            shard: self.shard.clone(),
            tasks: self.len(),
            archived: self.tasks().filter(|task| task.archived).count(),
            primary_slots: self.by_idn.len(),
            buckets,
        }
    }
}

fn number_key(number: i64) -> Option<u32> {
    u32::try_from(number).ok()
}

/// Snapshot of a shard's index occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub shard: ShardKey,
    /// Tasks present in the primary array.
    pub tasks: usize,
    /// Tasks archived since the last load; still reachable until reload.
    pub archived: usize,
    pub primary_slots: usize,
    /// Non-empty buckets per indexed property.
    pub buckets: BTreeMap<&'static str, usize>,
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    const TODAY: Date = date!(2024 - 03 - 01);

    fn shard() -> ShardKey {
        ShardKey::new("core").expect("valid shard key")
    }

    fn task(id: TaskId) -> Task {
        let mut task = Task::new(shard(), id, TODAY);
        task.area = "ui".to_string();
        task.reporter = "ada".to_string();
        task.participants.insert("bob".to_string());
        task.serial = Some(u32::from(id) * 10);
        task.emphasis = 2;
        task
    }

    #[test]
    fn primary_array_grows_by_powers_of_two() {
        let mut index = ShardIndex::new(shard(), TODAY);
        index.insert_new(Arc::new(task(5)));
        assert_eq!(index.by_idn.len(), 8);
        index.insert_new(Arc::new(task(9)));
        assert_eq!(index.by_idn.len(), 16);
        assert_eq!(index.len(), 2);
        assert!(index.get(5).is_some());
        assert!(index.get(6).is_none());
        assert!(index.get(900).is_none());
    }

    #[test]
    fn insert_populates_every_applicable_bucket() {
        let mut index = ShardIndex::new(shard(), TODAY);
        index.insert_new(Arc::new(task(1)));

        let probe = |property, value| index.probe(property, &value).size();
        assert_eq!(probe(Property::Area, Value::text("ui")), 1);
        assert_eq!(probe(Property::Reporter, Value::text("ada")), 1);
        assert_eq!(probe(Property::Participant, Value::text("bob")), 1);
        assert_eq!(probe(Property::Serial, Value::Number(10)), 1);
        assert_eq!(probe(Property::Status, Value::Status(Status::Unsolved)), 1);
        assert_eq!(probe(Property::Temperature, Value::Number(14)), 1);
        assert_eq!(probe(Property::Id, Value::Number(1)), 1);
        assert_eq!(probe(Property::Solver, Value::text("ada")), 0);
        assert_eq!(probe(Property::Temperature, Value::Number(400)), 0);
        assert!(matches!(
            index.probe(Property::Title, &Value::text("x")),
            Probe::NotIndexed
        ));
    }

    #[test]
    fn relocate_moves_between_keys() {
        let mut buckets: Buckets<String> = Buckets::default();
        buckets.insert("a".to_string(), 1, Insert::Bulk);
        buckets.relocate(&"a".to_string(), "b".to_string(), 1);
        assert!(buckets.get("a").is_some_and(CompactIdSet::is_empty));
        assert!(buckets.get("b").is_some_and(|set| set.contains(1)));
        assert_eq!(buckets.occupied(), 1);
    }

    #[test]
    fn stats_count_tasks_and_buckets() {
        let mut index = ShardIndex::new(shard(), TODAY);
        index.insert_new(Arc::new(task(1)));
        let mut second = task(2);
        second.area = "api".to_string();
        index.insert_new(Arc::new(second));

        let stats = index.stats();
        assert_eq!(stats.tasks, 2);
        assert_eq!(stats.archived, 0);
        assert_eq!(stats.buckets["area"], 2);
        assert_eq!(stats.buckets["status"], 1);
    }
}
