//! Filter, order and page tasks for one lookup.

use std::cmp::Ordering;
use std::sync::Arc;

use time::Date;

use crate::domain::predicate::{Predicate, Property, SortKey, Value, compare_by};
use crate::domain::task::{Task, TaskId};

use super::config::CacheConfig;
use super::index::{Probe, ShardIndex};
use super::planner::{Plan, plan};

/// Ordering and pagination requested by the result properties of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSpec {
    pub offset: usize,
    pub length: usize,
    pub order: Vec<SortKey>,
}

impl ResultSpec {
    /// Collect `offset`, `length` and `order` from a predicate list.
    ///
    /// Missing or negative values fall back to the configured defaults; the
    /// page length is capped only when `max_page_length` is configured.
    /// Later predicates win.
    pub fn from_predicates(predicates: &[Predicate], config: &CacheConfig) -> Self {
        let mut spec = Self {
            offset: 0,
            length: config.default_page_length,
            order: Vec::new(),
        };

        for predicate in predicates {
            match predicate.property {
                Property::Offset => {
                    if let Some(offset) = first_count(predicate) {
                        spec.offset = offset;
                    }
                }
                Property::Length => {
                    if let Some(length) = first_count(predicate) {
                        spec.length = length;
                    }
                }
                Property::Order => {
                    spec.order = predicate
                        .values
                        .iter()
                        .filter_map(|value| match value {
                            Value::Sort(key) => Some(*key),
                            _ => None,
                        })
                        .collect();
                }
                _ => {}
            }
        }

        if let Some(max) = config.max_page_length {
            spec.length = spec.length.min(max.get());
        }
        spec
    }
}

fn first_count(predicate: &Predicate) -> Option<usize> {
    predicate
        .values
        .first()
        .and_then(Value::as_number)
        .and_then(|number| usize::try_from(number).ok())
}

/// One ordered page plus the pre-page total.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub tasks: Vec<Arc<Task>>,
    pub total: usize,
}

/// Every task of the shard matching all filter predicates, in no particular order.
pub(crate) fn filter(index: &ShardIndex, predicates: &[Predicate]) -> Vec<Arc<Task>> {
    let today = index.today();
    let keep = |task: &Task, skip: Option<usize>| {
        predicates
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip)
            .all(|(_, predicate)| predicate.matches(task, today))
    };

    match plan(index, predicates) {
        Plan::Everything => index.tasks().cloned().collect(),
        Plan::Nothing => Vec::new(),
        Plan::FullScan => index
            .tasks()
            .filter(|task| keep(task, None))
            .cloned()
            .collect(),
        Plan::Probe { probe, chosen } => {
            let members: Box<dyn Iterator<Item = TaskId> + '_> = match probe {
                Probe::Single(id) => Box::new(std::iter::once(id)),
                Probe::Bucket(set) => Box::new(set.iter()),
                Probe::Empty | Probe::NotIndexed => Box::new(std::iter::empty()),
            };
            members
                .filter_map(|id| index.get(id))
                .filter(|task| keep(task, Some(chosen)))
                .cloned()
                .collect()
        }
    }
}

/// Sort by the requested keys; ties fall back to shard then id so pages are stable.
pub fn sort_tasks(tasks: &mut [Arc<Task>], order: &[SortKey], today: Date) {
    tasks.sort_by(|left, right| {
        order
            .iter()
            .map(|key| compare_by(left, right, *key, today))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| {
                left.shard
                    .cmp(&right.shard)
                    .then_with(|| left.id.cmp(&right.id))
            })
    });
}

/// Slice `[offset, min(total, offset + length))`; an offset past the end is an empty page.
pub fn paginate(tasks: Vec<Arc<Task>>, spec: &ResultSpec) -> Page {
    let total = tasks.len();
    let tasks = if spec.offset >= total {
        Vec::new()
    } else {
        let end = total.min(spec.offset.saturating_add(spec.length));
        tasks
            .into_iter()
            .skip(spec.offset)
            .take(end - spec.offset)
            .collect()
    };
    Page { tasks, total }
}

/// Full single-shard lookup: filter, order, page.
pub(crate) fn lookup(index: &ShardIndex, predicates: &[Predicate], spec: &ResultSpec) -> Page {
    let mut matched = filter(index, predicates);
    sort_tasks(&mut matched, &spec.order, index.today());
    paginate(matched, spec)
}
