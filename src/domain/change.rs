//! Committed task changes delivered to the read cache.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;
use super::task::{ShardKey, Task};

/// What kind of modification a change entry carries.
///
/// Unknown tags survive parsing as [`Operation::Unrecognized`] so a newer
/// producer never breaks an older cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Created,
    TemperatureChanged,
    Resolved,
    Absolved,
    Dissolved,
    AreaChanged,
    VersionChanged,
    MembershipChanged,
    Archived,
    Unrecognized(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Created => "created",
            Operation::TemperatureChanged => "temperature",
            Operation::Resolved => "resolved",
            Operation::Absolved => "absolved",
            Operation::Dissolved => "dissolved",
            Operation::AreaChanged => "area",
            Operation::VersionChanged => "version",
            Operation::MembershipChanged => "membership",
            Operation::Archived => "archived",
            Operation::Unrecognized(tag) => tag,
        }
    }
}

impl From<&str> for Operation {
    fn from(tag: &str) -> Self {
        match tag.trim() {
            "created" => Operation::Created,
            "temperature" | "emphasis" => Operation::TemperatureChanged,
            "resolved" => Operation::Resolved,
            "absolved" => Operation::Absolved,
            "dissolved" => Operation::Dissolved,
            "area" => Operation::AreaChanged,
            "version" => Operation::VersionChanged,
            "membership" | "participants" | "aspirants" | "watchers" => {
                Operation::MembershipChanged
            }
            "archived" => Operation::Archived,
            other => Operation::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for Operation {
    fn from(tag: String) -> Self {
        Operation::from(tag.as_str())
    }
}

impl From<Operation> for String {
    fn from(operation: Operation) -> Self {
        operation.as_str().to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prior and new state of one task plus the operations that led there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    #[serde(default)]
    pub before: Option<Task>,
    pub after: Task,
    pub operations: Vec<Operation>,
}

impl ChangeEntry {
    pub fn new(before: Option<Task>, after: Task, operations: Vec<Operation>) -> Self {
        Self {
            before,
            after,
            operations,
        }
    }

    pub fn shard(&self) -> &ShardKey {
        &self.after.shard
    }
}

/// A committed batch of change entries belonging to exactly one shard.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Unique identifier used to correlate log lines.
    pub id: Uuid,
    pub shard: ShardKey,
    pub entries: Vec<ChangeEntry>,
}

impl ChangeBatch {
    /// Build a batch, checking that every entry belongs to the same shard.
    pub fn new(entries: Vec<ChangeEntry>) -> Result<Self, DomainError> {
        let shard = entries
            .first()
            .map(|entry| entry.shard().clone())
            .ok_or(DomainError::EmptyBatch)?;

        if let Some(stray) = entries.iter().find(|entry| *entry.shard() != shard) {
            return Err(DomainError::MixedShards {
                expected: shard,
                found: stray.shard().clone(),
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            shard,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn task(shard: &str, id: u16) -> Task {
        Task::new(
            ShardKey::new(shard).expect("valid shard key"),
            id,
            date!(2024 - 01 - 01),
        )
    }

    #[test]
    fn unknown_tags_are_preserved() {
        assert_eq!(Operation::from("resolved"), Operation::Resolved);
        assert_eq!(
            Operation::from("teleported"),
            Operation::Unrecognized("teleported".to_string())
        );
        assert_eq!(Operation::from("teleported").to_string(), "teleported");
    }

    #[test]
    fn batch_takes_shard_from_entries() {
        let batch = ChangeBatch::new(vec![
            ChangeEntry::new(None, task("core", 1), vec![Operation::Created]),
            ChangeEntry::new(None, task("core", 2), vec![Operation::Created]),
        ])
        .expect("single shard batch");

        assert_eq!(batch.shard.as_str(), "core");
        assert_eq!(batch.len(), 2);
        assert!(!batch.id.is_nil());
    }

    #[test]
    fn batch_rejects_mixed_shards_and_empty_input() {
        let mixed = ChangeBatch::new(vec![
            ChangeEntry::new(None, task("core", 1), vec![Operation::Created]),
            ChangeEntry::new(None, task("web", 2), vec![Operation::Created]),
        ]);
        assert!(matches!(mixed, Err(DomainError::MixedShards { .. })));
        assert_eq!(ChangeBatch::new(Vec::new()).unwrap_err(), DomainError::EmptyBatch);
    }
}
