//! Query planning.
//!
//! Picks the cheapest equality index to probe for a predicate list.

use std::fmt;

use crate::domain::predicate::Predicate;

use super::index::{Probe, ShardIndex};

/// How a shard answers one lookup.
#[derive(Debug)]
pub(crate) enum Plan<'a> {
    /// No filters at all: every task in the primary array.
    Everything,
    /// Filters present, none backed by an index: scan the primary array.
    FullScan,
    /// An indexed equality has no members, so nothing can match.
    Nothing,
    /// Walk one bucket and filter the rest. `chosen` is the position of the
    /// predicate the probe already satisfies.
    Probe { probe: Probe<'a>, chosen: usize },
}

impl fmt::Display for Plan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Everything => f.write_str("everything"),
            Plan::FullScan => f.write_str("full_scan"),
            Plan::Nothing => f.write_str("nothing"),
            Plan::Probe { probe, chosen } => write!(f, "probe(#{chosen}, {})", probe.size()),
        }
    }
}

/// Plan a lookup.
///
/// - Result and shard properties are ignored
/// - The first empty indexed bucket short-circuits to [`Plan::Nothing`]
/// - Otherwise the smallest bucket wins; equal sizes go to the more selective property
pub(crate) fn plan<'a>(index: &'a ShardIndex, predicates: &[Predicate]) -> Plan<'a> {
    if !predicates.iter().any(|predicate| predicate.property.is_filter()) {
        return Plan::Everything;
    }

    let mut best: Option<(Probe<'a>, usize, u8)> = None;
    for (position, predicate) in predicates.iter().enumerate() {
        if !predicate.property.is_filter() {
            continue;
        }
        let Some(value) = predicate.equality_value() else {
            continue;
        };

        let probe = index.probe(predicate.property, value);
        let size = match probe {
            Probe::NotIndexed => continue,
            Probe::Empty => return Plan::Nothing,
            _ => probe.size(),
        };

        let selectivity = predicate.property.selectivity();
        let better = match &best {
            None => true,
            Some((current, _, current_selectivity)) => {
                size < current.size()
                    || (size == current.size() && selectivity > *current_selectivity)
            }
        };
        if better {
            best = Some((probe, position, selectivity));
        }
    }

    match best {
        Some((probe, chosen, _)) => Plan::Probe { probe, chosen },
        None => Plan::FullScan,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::Date;
    use time::macros::date;

    use super::*;
    use crate::domain::predicate::{Operator, Property, Value};
    use crate::domain::task::{ShardKey, Task};
    use crate::domain::types::Status;

    const TODAY: Date = date!(2024 - 03 - 01);

    fn index() -> ShardIndex {
        let shard = ShardKey::new("core").expect("valid shard key");
        let mut index = ShardIndex::new(shard.clone(), TODAY);
        for id in 1..=6 {
            let mut task = Task::new(shard.clone(), id, TODAY);
            task.area = if id <= 2 { "ui" } else { "api" }.to_string();
            task.reporter = if id <= 2 { "ada" } else { "bob" }.to_string();
            index.insert_new(Arc::new(task));
        }
        index
    }

    fn chosen(plan: &Plan<'_>) -> Option<usize> {
        match plan {
            Plan::Probe { chosen, .. } => Some(*chosen),
            _ => None,
        }
    }

    #[test]
    fn no_filters_means_everything() {
        let index = index();
        let plan = plan(&index, &[Predicate::offset(3), Predicate::length(2)]);
        assert!(matches!(plan, Plan::Everything));
    }

    #[test]
    fn picks_smallest_bucket() {
        let index = index();
        let predicates = [
            Predicate::eq(Property::Status, Value::Status(Status::Unsolved)),
            Predicate::eq(Property::Area, Value::text("ui")),
        ];
        let plan = plan(&index, &predicates);
        assert_eq!(chosen(&plan), Some(1));
    }

    #[test]
    fn ties_prefer_more_selective_property() {
        let index = index();
        // area=ui and reporter=ada both hold two ids; reporter ranks higher.
        let predicates = [
            Predicate::eq(Property::Area, Value::text("ui")),
            Predicate::eq(Property::Reporter, Value::text("ada")),
        ];
        assert_eq!(chosen(&plan(&index, &predicates)), Some(1));
    }

    #[test]
    fn empty_bucket_short_circuits() {
        let index = index();
        let predicates = [
            Predicate::eq(Property::Area, Value::text("ui")),
            Predicate::eq(Property::Area, Value::text("docs")),
        ];
        assert!(matches!(plan(&index, &predicates), Plan::Nothing));
    }

    #[test]
    fn non_equality_filters_fall_back_to_scan() {
        let index = index();
        let predicates = [
            Predicate::ne(Property::Area, Value::text("ui")),
            Predicate::new(Property::Title, Operator::Contains, vec![Value::text("x")]),
        ];
        assert!(matches!(plan(&index, &predicates), Plan::FullScan));
    }

    #[test]
    fn id_equality_uses_primary_array() {
        let index = index();
        let predicates = [
            Predicate::eq(Property::Area, Value::text("api")),
            Predicate::eq(Property::Id, Value::Number(4)),
        ];
        let plan = plan(&index, &predicates);
        assert!(matches!(plan, Plan::Probe { probe: Probe::Single(4), chosen: 1 }));
    }
}
