//! Shard routing, cross-shard fan-out and daily invalidation.
//!
//! The router owns the only state shared between execution contexts: the
//! shard map and the "valid for day" marker. Sub-queries are enqueued on the
//! shard contexts while the map's read lock is held, and teardown takes the
//! write lock before closing shards, so a query that saw a shard is always
//! served by it in full.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, histogram};
use time::Date;
use tracing::{debug, info, instrument, warn};

use crate::application::repos::{Clock, TaskSource};
use crate::domain::actor::Actor;
use crate::domain::change::ChangeBatch;
use crate::domain::predicate::{Predicate, Property, Value};
use crate::domain::task::ShardKey;

use super::config::CacheConfig;
use super::delta::ApplySummary;
use super::error::CacheError;
use super::index::ShardStats;
use super::lock::{rw_read, rw_write};
use super::lookup::{Page, ResultSpec};
use super::merge::MergeContext;
use super::result::MatchResult;
use super::shard::ShardCache;

const METRIC_QUERY_TOTAL: &str = "tracker_cache_query_total";
const METRIC_QUERY_MS: &str = "tracker_cache_query_ms";
const METRIC_ROLLOVER_TOTAL: &str = "tracker_cache_rollover_total";

const LOCK_TARGET: &str = "cache::router";

/// Where a query goes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    /// `shard = K` and nothing else to filter on: the creating path.
    Index(ShardKey),
    Empty,
    Single(ShardKey),
    Multi(BTreeSet<ShardKey>),
}

impl Route {
    fn of(actor: &Actor, predicates: &[Predicate]) -> Self {
        let targeting: Vec<&Predicate> = predicates
            .iter()
            .filter(|predicate| predicate.property == Property::Shard)
            .collect();
        let filters = predicates
            .iter()
            .filter(|predicate| predicate.property.is_filter())
            .count();

        if let ([only], 0) = (targeting.as_slice(), filters) {
            if let Some(Value::Shard(key)) = only.equality_value() {
                return Route::Index(key.clone());
            }
        }

        let mut included: Option<BTreeSet<ShardKey>> = None;
        let mut excluded = BTreeSet::new();
        for predicate in targeting {
            let keys = shard_values(predicate);
            if predicate.operator.is_inclusive() {
                included = Some(match included {
                    Some(current) => current.intersection(&keys).cloned().collect(),
                    None => keys,
                });
            } else if predicate.operator.is_exclusive() {
                excluded.extend(keys);
            }
        }

        let mut targets: BTreeSet<ShardKey> = included
            .unwrap_or_else(|| actor.shards.clone())
            .difference(&excluded)
            .cloned()
            .collect();
        match (targets.len(), targets.pop_first()) {
            (1, Some(key)) => Route::Single(key),
            (_, None) => Route::Empty,
            (_, Some(first)) => {
                targets.insert(first);
                Route::Multi(targets)
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Route::Index(_) => "index",
            Route::Empty => "empty",
            Route::Single(_) => "single",
            Route::Multi(_) => "multi",
        }
    }

    fn targets(self) -> BTreeSet<ShardKey> {
        match self {
            Route::Index(key) | Route::Single(key) => BTreeSet::from([key]),
            Route::Empty => BTreeSet::new(),
            Route::Multi(targets) => targets,
        }
    }
}

fn shard_values(predicate: &Predicate) -> BTreeSet<ShardKey> {
    predicate
        .values
        .iter()
        .filter_map(|value| match value {
            Value::Shard(key) => Some(key.clone()),
            _ => None,
        })
        .collect()
}

/// Predicates a shard evaluates: everything but shard targeting.
fn without_targeting(predicates: &[Predicate]) -> Vec<Predicate> {
    predicates
        .iter()
        .filter(|predicate| predicate.property != Property::Shard)
        .cloned()
        .collect()
}

/// Predicates a shard evaluates during fan-out: filters only.
fn filters_only(predicates: &[Predicate]) -> Vec<Predicate> {
    predicates
        .iter()
        .filter(|predicate| predicate.property.is_filter())
        .cloned()
        .collect()
}

/// Entry point of the read cache.
pub struct CacheRouter {
    source: Arc<dyn TaskSource>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    shards: RwLock<HashMap<ShardKey, ShardCache>>,
    /// Julian day the cached shards were built for.
    valid_for: AtomicI32,
    merge: MergeContext,
    closed: AtomicBool,
}

impl std::fmt::Debug for CacheRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRouter")
            .field("config", &self.config)
            .field("shards", &self.cached_shards())
            .field("valid_for", &self.valid_for.load(Ordering::Acquire))
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl CacheRouter {
    /// Must be called from within a tokio runtime.
    pub fn new(source: Arc<dyn TaskSource>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        let today = clock.today();
        Self {
            source,
            clock,
            config,
            shards: RwLock::new(HashMap::new()),
            valid_for: AtomicI32::new(today.to_julian_day()),
            merge: MergeContext::spawn(),
            closed: AtomicBool::new(false),
        }
    }

    /// Answer a query on behalf of `actor`.
    ///
    /// Never fails: uncached or failing shards are reported in the result's
    /// excluded and erroneous sets instead.
    #[instrument(
        skip(self, predicates),
        fields(actor = %actor.name, predicates = predicates.len(), route = tracing::field::Empty)
    )]
    pub async fn query(&self, actor: &Actor, predicates: &[Predicate]) -> MatchResult {
        let started_at = Instant::now();
        let today = self.roll_over_if_due();
        let route = Route::of(actor, predicates);
        let closed = self.is_closed();
        let label = if closed { "closed" } else { route.label() };
        tracing::Span::current().record("route", label);

        let result = if closed {
            MatchResult::excluded(route.targets())
        } else {
            match route {
                Route::Index(key) => self.index_request(key, predicates).await,
                Route::Empty => MatchResult::empty(),
                Route::Single(key) => self.single(key, predicates).await,
                Route::Multi(targets) => self.fan_out(targets, predicates, today).await,
            }
        };

        counter!(METRIC_QUERY_TOTAL, "route" => label).increment(1);
        histogram!(METRIC_QUERY_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        debug!(
            total = result.total(),
            returned = result.tasks().len(),
            included = result.included().len(),
            excluded = result.excluded_shards().len(),
            erroneous = result.erroneous().len(),
            "Query answered"
        );
        result
    }

    /// Forward a committed batch to its shard if that shard is cached.
    ///
    /// `Ok(None)` means the shard is not cached and nothing was done.
    #[instrument(
        skip(self, batch),
        fields(shard = %batch.shard, batch_id = %batch.id, entries = batch.len())
    )]
    pub async fn notify_changes(
        &self,
        batch: ChangeBatch,
    ) -> Result<Option<ApplySummary>, CacheError> {
        let pending = {
            let shards = rw_read(&self.shards, LOCK_TARGET, "notify_changes");
            shards.get(&batch.shard).map(|shard| shard.apply(batch))
        };
        match pending {
            Some(pending) => pending.await.map(Some),
            None => {
                debug!("Change batch for uncached shard ignored");
                Ok(None)
            }
        }
    }

    /// Index statistics of a cached shard.
    pub async fn stats(&self, key: &ShardKey) -> Result<Option<ShardStats>, CacheError> {
        let pending = {
            let shards = rw_read(&self.shards, LOCK_TARGET, "stats");
            shards.get(key).map(ShardCache::stats)
        };
        match pending {
            Some(pending) => pending.await.map(Some),
            None => Ok(None),
        }
    }

    /// Close and forget one shard; the next index request reloads it.
    pub fn evict(&self, key: &ShardKey) -> bool {
        let removed = rw_write(&self.shards, LOCK_TARGET, "evict").remove(key);
        match removed {
            Some(shard) => {
                shard.close();
                info!(shard = %key, "Shard evicted");
                true
            }
            None => false,
        }
    }

    /// Currently cached shard keys, sorted.
    pub fn cached_shards(&self) -> Vec<ShardKey> {
        let mut keys: Vec<ShardKey> = rw_read(&self.shards, LOCK_TARGET, "cached_shards")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the merge context and every shard. Idempotent, never fails.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.merge.close();
        let retired = std::mem::take(&mut *rw_write(&self.shards, LOCK_TARGET, "close"));
        for shard in retired.values() {
            shard.close();
        }
        info!(shards = retired.len(), "Cache router closed");
    }

    /// Tear down every shard once per day. Only the caller that wins the
    /// marker swap does the teardown.
    fn roll_over_if_due(&self) -> Date {
        let today = self.clock.today();
        let day = today.to_julian_day();
        let marked = self.valid_for.load(Ordering::Acquire);
        if day <= marked {
            return today;
        }
        if self
            .valid_for
            .compare_exchange(marked, day, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return today;
        }

        let retired = std::mem::take(&mut *rw_write(&self.shards, LOCK_TARGET, "rollover"));
        for shard in retired.values() {
            shard.close();
        }
        counter!(METRIC_ROLLOVER_TOTAL).increment(1);
        info!(%today, shards = retired.len(), "Daily shard rollover");
        today
    }

    async fn index_request(&self, key: ShardKey, predicates: &[Predicate]) -> MatchResult {
        let pending = {
            let mut shards = rw_write(&self.shards, LOCK_TARGET, "index_request");
            if self.is_closed() {
                return MatchResult::excluded([key]);
            }
            let shard = shards.entry(key.clone()).or_insert_with(|| {
                info!(shard = %key, "Creating shard");
                ShardCache::spawn(
                    key.clone(),
                    self.clock.today(),
                    Arc::clone(&self.source),
                    self.config.clone(),
                )
            });
            shard.lookup(without_targeting(predicates))
        };
        Self::single_result(key, pending.await)
    }

    async fn single(&self, key: ShardKey, predicates: &[Predicate]) -> MatchResult {
        let pending = {
            let shards = rw_read(&self.shards, LOCK_TARGET, "single");
            shards
                .get(&key)
                .map(|shard| shard.lookup(without_targeting(predicates)))
        };
        match pending {
            Some(pending) => Self::single_result(key, pending.await),
            None => MatchResult::excluded([key]),
        }
    }

    fn single_result(key: ShardKey, page: Result<Page, CacheError>) -> MatchResult {
        match page {
            Ok(page) => MatchResult::new(
                page.tasks,
                page.total,
                BTreeSet::from([key]),
                BTreeSet::new(),
                BTreeSet::new(),
            ),
            Err(err) => {
                warn!(shard = %key, error = %err, "Shard query failed");
                MatchResult::failed(key)
            }
        }
    }

    async fn fan_out(
        &self,
        targets: BTreeSet<ShardKey>,
        predicates: &[Predicate],
        today: Date,
    ) -> MatchResult {
        let filters = filters_only(predicates);
        let mut excluded = BTreeSet::new();
        let pending: Vec<_> = {
            let shards = rw_read(&self.shards, LOCK_TARGET, "fan_out");
            targets
                .into_iter()
                .filter_map(|key| match shards.get(&key) {
                    Some(shard) => {
                        let answer = shard.filter(filters.clone());
                        Some(async move { (key, answer.await) })
                    }
                    None => {
                        excluded.insert(key);
                        None
                    }
                })
                .collect()
        };

        let mut included = BTreeSet::new();
        let mut erroneous = BTreeSet::new();
        let mut parts = Vec::with_capacity(pending.len());
        for (key, answer) in join_all(pending).await {
            match answer {
                Ok(tasks) => {
                    included.insert(key);
                    parts.push(tasks);
                }
                Err(err) => {
                    warn!(shard = %key, error = %err, "Shard failed during fan-out");
                    erroneous.insert(key);
                }
            }
        }

        let spec = ResultSpec::from_predicates(predicates, &self.config);
        match self.merge.merge(parts, spec, today).await {
            Ok(page) => MatchResult::new(page.tasks, page.total, included, excluded, erroneous),
            Err(err) => {
                warn!(error = %err, "Merge context unavailable");
                erroneous.extend(included);
                MatchResult::new(Vec::new(), 0, BTreeSet::new(), excluded, erroneous)
            }
        }
    }
}

impl Drop for CacheRouter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ShardKey {
        ShardKey::new(name).expect("valid shard key")
    }

    fn actor() -> Actor {
        Actor::new("ada").with_shards([key("core"), key("web"), key("docs")])
    }

    #[test]
    fn lone_shard_equality_is_an_index_request() {
        let predicates = vec![Predicate::shard(key("core")), Predicate::length(10)];
        assert_eq!(Route::of(&actor(), &predicates), Route::Index(key("core")));
    }

    #[test]
    fn shard_equality_with_filters_is_a_targeted_query() {
        let predicates = vec![
            Predicate::shard(key("core")),
            Predicate::eq(Property::Area, Value::text("ui")),
        ];
        assert_eq!(Route::of(&actor(), &predicates), Route::Single(key("core")));
    }

    #[test]
    fn affiliation_minus_exclusions() {
        let predicates = vec![
            Predicate::eq(Property::Area, Value::text("ui")),
            Predicate::none_of(Property::Shard, vec![Value::Shard(key("web"))]),
        ];
        assert_eq!(
            Route::of(&actor(), &predicates),
            Route::Multi(BTreeSet::from([key("core"), key("docs")]))
        );
    }

    #[test]
    fn explicit_targets_override_affiliation() {
        let predicates = vec![
            Predicate::any_of(
                Property::Shard,
                vec![Value::Shard(key("core")), Value::Shard(key("other"))],
            ),
            Predicate::eq(Property::Area, Value::text("ui")),
        ];
        let route = Route::of(&Actor::new("nobody"), &predicates);
        assert_eq!(route, Route::Multi(BTreeSet::from([key("core"), key("other")])));
        assert_eq!(route.label(), "multi");
    }

    #[test]
    fn no_affiliation_no_targets() {
        let predicates = vec![Predicate::eq(Property::Area, Value::text("ui"))];
        assert_eq!(Route::of(&Actor::new("nobody"), &predicates), Route::Empty);
    }
}
