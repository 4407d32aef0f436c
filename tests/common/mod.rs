#![allow(dead_code)]

use std::sync::Arc;

use time::{Date, macros::date};
use tracker_cache::{
    cache::{CacheConfig, CacheRouter, MatchResult},
    domain::{
        actor::Actor,
        predicate::Predicate,
        task::{ShardKey, Task, TaskId},
        types::Status,
    },
    infra::memory::{FixedClock, MemoryTaskSource},
};

pub const TODAY: Date = date!(2024 - 03 - 01);

pub fn shard(name: &str) -> ShardKey {
    ShardKey::new(name).expect("valid shard key")
}

pub fn task(shard_name: &str, id: TaskId, status: Status) -> Task {
    let mut task = Task::new(shard(shard_name), id, date!(2024 - 01 - 01));
    task.status = status;
    task
}

pub fn actor(shards: &[&str]) -> Actor {
    Actor::new("ada").with_shards(shards.iter().map(|name| shard(name)))
}

pub fn router(source: &MemoryTaskSource, clock: &Arc<FixedClock>) -> CacheRouter {
    CacheRouter::new(
        Arc::new(source.clone()),
        clock.clone(),
        CacheConfig::default(),
    )
}

/// Load a shard through the creating path.
pub async fn warm(router: &CacheRouter, name: &str) -> MatchResult {
    router
        .query(&actor(&[name]), &[Predicate::shard(shard(name))])
        .await
}

pub fn ids(result: &MatchResult) -> Vec<TaskId> {
    result.tasks().iter().map(|task| task.id).collect()
}
