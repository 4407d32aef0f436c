use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::task::{ShardKey, Task};

/// Immutable answer to one router query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchResult {
    tasks: Vec<Arc<Task>>,
    total: usize,
    included: BTreeSet<ShardKey>,
    excluded: BTreeSet<ShardKey>,
    erroneous: BTreeSet<ShardKey>,
}

impl MatchResult {
    pub fn new(
        tasks: Vec<Arc<Task>>,
        total: usize,
        included: BTreeSet<ShardKey>,
        excluded: BTreeSet<ShardKey>,
        erroneous: BTreeSet<ShardKey>,
    ) -> Self {
        Self {
            tasks,
            total,
            included,
            excluded,
            erroneous,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Empty result naming shards that are not cached.
    pub fn excluded(shards: impl IntoIterator<Item = ShardKey>) -> Self {
        Self {
            excluded: shards.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Empty result naming a shard whose query failed.
    pub fn failed(shard: ShardKey) -> Self {
        Self {
            erroneous: BTreeSet::from([shard]),
            ..Self::default()
        }
    }

    /// Tasks on this page, in result order.
    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    /// Matches before pagination.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn included(&self) -> &BTreeSet<ShardKey> {
        &self.included
    }

    pub fn excluded_shards(&self) -> &BTreeSet<ShardKey> {
        &self.excluded
    }

    pub fn erroneous(&self) -> &BTreeSet<ShardKey> {
        &self.erroneous
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_fill_the_right_set() {
        let core = ShardKey::new("core").expect("valid shard key");
        let excluded = MatchResult::excluded([core.clone()]);
        assert!(excluded.is_empty());
        assert!(excluded.excluded_shards().contains(&core));
        assert!(excluded.included().is_empty());

        let failed = MatchResult::failed(core.clone());
        assert_eq!(failed.total(), 0);
        assert!(failed.erroneous().contains(&core));
    }

    #[test]
    fn serializes_shard_sets_as_names() {
        let core = ShardKey::new("core").expect("valid shard key");
        let json = serde_json::to_value(MatchResult::excluded([core])).expect("serialize");
        assert_eq!(json["excluded"], serde_json::json!(["core"]));
        assert_eq!(json["total"], 0);
    }
}
