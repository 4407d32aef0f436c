//! In-process task store and a settable clock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use dashmap::DashMap;
use time::{Date, Duration};

use crate::application::repos::{Clock, RepoError, TaskSource};
use crate::domain::change::ChangeEntry;
use crate::domain::task::{ShardKey, Task, TaskId};

/// Committed tasks held in memory, keyed by shard then id.
///
/// Shared freely between the writer that commits changes and the shard
/// contexts that scan it.
#[derive(Debug, Default, Clone)]
pub struct MemoryTaskSource {
    shards: Arc<DashMap<ShardKey, BTreeMap<TaskId, Task>>>,
    scans: Arc<AtomicUsize>,
}

impl MemoryTaskSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let source = Self::new();
        for task in tasks {
            source.insert(task);
        }
        source
    }

    /// Store a task, returning the state it replaced.
    pub fn insert(&self, task: Task) -> Option<Task> {
        self.shards
            .entry(task.shard.clone())
            .or_default()
            .insert(task.id, task)
    }

    /// Commit the new state of a change entry.
    pub fn commit(&self, entry: &ChangeEntry) {
        self.insert(entry.after.clone());
    }

    pub fn shards(&self) -> Vec<ShardKey> {
        let mut keys: Vec<ShardKey> = self.shards.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times any shard was scanned.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

impl TaskSource for MemoryTaskSource {
    fn scan(&self, shard: &ShardKey, visit: &mut dyn FnMut(Task)) -> Result<usize, RepoError> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        // Copy out first so no map guard is held while the visitor runs.
        let tasks: Vec<Task> = match self.shards.get(shard) {
            Some(tasks) => tasks.values().filter(|task| !task.archived).cloned().collect(),
            None => Vec::new(),
        };
        let visited = tasks.len();
        for task in tasks {
            visit(task);
        }
        Ok(visited)
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    julian_day: AtomicI32,
}

impl FixedClock {
    pub fn new(today: Date) -> Self {
        Self {
            julian_day: AtomicI32::new(today.to_julian_day()),
        }
    }

    pub fn set(&self, today: Date) {
        self.julian_day.store(today.to_julian_day(), Ordering::Release);
    }

    pub fn advance(&self, days: i64) {
        let next = self.today().saturating_add(Duration::days(days));
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn today(&self) -> Date {
        let day = self.julian_day.load(Ordering::Acquire);
        // Only values produced by `Date::to_julian_day` are ever stored.
        Date::from_julian_day(day).unwrap_or(Date::MIN)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn shard(name: &str) -> ShardKey {
        ShardKey::new(name).expect("valid shard key")
    }

    #[test]
    fn scan_visits_only_live_tasks_of_one_shard() {
        let mut archived = Task::new(shard("core"), 2, date!(2024 - 01 - 01));
        archived.archived = true;
        let source = MemoryTaskSource::with_tasks([
            Task::new(shard("core"), 1, date!(2024 - 01 - 01)),
            archived,
            Task::new(shard("web"), 1, date!(2024 - 01 - 01)),
        ]);

        let mut seen = Vec::new();
        let visited = source
            .scan(&shard("core"), &mut |task| seen.push(task.id))
            .expect("scan");

        assert_eq!(visited, 1);
        assert_eq!(seen, vec![1]);
        assert_eq!(source.len(), 3);
        assert_eq!(source.scan_count(), 1);
        assert_eq!(source.shards(), vec![shard("core"), shard("web")]);
    }

    #[test]
    fn unknown_shard_scans_empty() {
        let source = MemoryTaskSource::new();
        let visited = source.scan(&shard("ghost"), &mut |_| {}).expect("scan");
        assert_eq!(visited, 0);
    }

    #[test]
    fn fixed_clock_moves_on_request() {
        let clock = FixedClock::new(date!(2024 - 02 - 28));
        clock.advance(2);
        assert_eq!(clock.today(), date!(2024 - 03 - 01));
        clock.set(date!(2025 - 01 - 01));
        assert_eq!(clock.today(), date!(2025 - 01 - 01));
    }
}
