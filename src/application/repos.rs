//! Traits describing the persistence and time adapters the cache consumes.

use thiserror::Error;
use time::{Date, OffsetDateTime};

use crate::domain::task::{ShardKey, Task};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Read access to committed tasks.
///
/// `scan` is synchronous and is called once per shard creation; it hands
/// every non-archived task of the shard to `visit` and returns how many it
/// visited.
pub trait TaskSource: Send + Sync {
    fn scan(&self, shard: &ShardKey, visit: &mut dyn FnMut(Task)) -> Result<usize, RepoError>;
}

/// Source of "today" for temperature and daily rollover.
pub trait Clock: Send + Sync {
    fn today(&self) -> Date;
}

/// Wall clock in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Date {
        OffsetDateTime::now_utc().date()
    }
}
