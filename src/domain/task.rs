//! Task records as seen by the read cache.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::Date;

use super::error::DomainError;
use super::types::{Motive, Purpose, Status};

/// Numeric task id, unique within one shard.
pub type TaskId = u16;

/// Largest task id a shard can index.
pub const MAX_TASK_ID: TaskId = 32766;

/// Upper bound of the derived temperature score.
pub const MAX_TEMPERATURE: u8 = 99;

const EMPHASIS_WEIGHT: i64 = 7;
const COOLING_DAYS: i64 = 10;

/// Project/output name identifying one shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShardKey(String);

impl ShardKey {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("shard key must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ShardKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ShardKey> for String {
    fn from(key: ShardKey) -> Self {
        key.0
    }
}

/// A task record. The cache references these, it never owns their truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub shard: ShardKey,
    #[serde(default)]
    pub title: String,
    pub status: Status,
    pub motive: Motive,
    pub purpose: Purpose,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub reporter: String,
    #[serde(default)]
    pub solver: Option<String>,
    #[serde(default)]
    pub participants: BTreeSet<String>,
    #[serde(default)]
    pub aspirants: BTreeSet<String>,
    #[serde(default)]
    pub watchers: BTreeSet<String>,
    #[serde(default)]
    pub predecessor: Option<u32>,
    #[serde(default)]
    pub origin: Option<u32>,
    #[serde(default)]
    pub serial: Option<u32>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub emphasis: u32,
    pub created: Date,
    /// Monotonic record version; newer states carry larger values.
    #[serde(default)]
    pub revision: u64,
}

impl Task {
    /// A fresh unsolved task with empty name fields.
    pub fn new(shard: ShardKey, id: TaskId, created: Date) -> Self {
        Self {
            id,
            shard,
            title: String::new(),
            status: Status::Unsolved,
            motive: Motive::Defect,
            purpose: Purpose::Fix,
            area: String::new(),
            version: String::new(),
            reporter: String::new(),
            solver: None,
            participants: BTreeSet::new(),
            aspirants: BTreeSet::new(),
            watchers: BTreeSet::new(),
            predecessor: None,
            origin: None,
            serial: None,
            archived: false,
            emphasis: 0,
            created,
            revision: 1,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id == 0 || self.id > MAX_TASK_ID {
            return Err(DomainError::TaskIdOutOfRange {
                id: u32::from(self.id),
                max: MAX_TASK_ID,
            });
        }
        Ok(())
    }

    /// Heat score in `0..=99`: emphasis pushes it up, age cools it down.
    pub fn temperature(&self, today: Date) -> u8 {
        let age_days = (today - self.created).whole_days().max(0);
        let heat =
            i64::from(self.emphasis).saturating_mul(EMPHASIS_WEIGHT) - age_days / COOLING_DAYS;
        heat.clamp(0, i64::from(MAX_TEMPERATURE)) as u8
    }
}
