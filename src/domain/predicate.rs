//! Typed query predicates.
//!
//! A query is an ordered list of `(property, operator, values)` constraints.
//! Most properties filter tasks; `shard`, `offset`, `length` and `order`
//! instead target shards or shape the result page.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;
use time::macros::format_description;

use super::error::DomainError;
use super::task::{ShardKey, Task};
use super::types::{Motive, Purpose, Status};

/// A queryable property of a task or of the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    Shard,
    Offset,
    Length,
    Order,
    Id,
    Title,
    Status,
    Motive,
    Purpose,
    Area,
    Version,
    Reporter,
    Solver,
    Participant,
    Aspirant,
    Watcher,
    Predecessor,
    Origin,
    Serial,
    Temperature,
    Archived,
    Created,
}

impl Property {
    /// Static estimate of how strongly an equality on this property narrows a
    /// shard: 0 for "not at all", 100 for unique.
    pub fn selectivity(self) -> u8 {
        match self {
            Property::Id => 100,
            Property::Serial => 90,
            Property::Predecessor | Property::Origin => 80,
            Property::Solver => 60,
            Property::Participant | Property::Aspirant | Property::Reporter => 50,
            Property::Version | Property::Area => 40,
            Property::Watcher => 30,
            Property::Temperature => 20,
            Property::Motive | Property::Purpose => 10,
            Property::Status => 5,
            Property::Title
            | Property::Archived
            | Property::Created
            | Property::Shard
            | Property::Offset
            | Property::Length
            | Property::Order => 0,
        }
    }

    /// Pagination and ordering properties.
    pub fn is_result_property(self) -> bool {
        matches!(self, Property::Offset | Property::Length | Property::Order)
    }

    /// True for properties evaluated against task fields.
    pub fn is_filter(self) -> bool {
        !self.is_result_property() && self != Property::Shard
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Property::Shard => "shard",
            Property::Offset => "offset",
            Property::Length => "length",
            Property::Order => "order",
            Property::Id => "id",
            Property::Title => "title",
            Property::Status => "status",
            Property::Motive => "motive",
            Property::Purpose => "purpose",
            Property::Area => "area",
            Property::Version => "version",
            Property::Reporter => "reporter",
            Property::Solver => "solver",
            Property::Participant => "participant",
            Property::Aspirant => "aspirant",
            Property::Watcher => "watcher",
            Property::Predecessor => "predecessor",
            Property::Origin => "origin",
            Property::Serial => "serial",
            Property::Temperature => "temperature",
            Property::Archived => "archived",
            Property::Created => "created",
        }
    }
}

impl TryFrom<&str> for Property {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let property = match value {
            "shard" | "project" => Property::Shard,
            "offset" => Property::Offset,
            "length" => Property::Length,
            "order" => Property::Order,
            "id" => Property::Id,
            "title" => Property::Title,
            "status" => Property::Status,
            "motive" | "why" => Property::Motive,
            "purpose" | "what_for" => Property::Purpose,
            "area" => Property::Area,
            "version" => Property::Version,
            "reporter" => Property::Reporter,
            "solver" => Property::Solver,
            "participant" => Property::Participant,
            "aspirant" => Property::Aspirant,
            "watcher" => Property::Watcher,
            "predecessor" => Property::Predecessor,
            "origin" => Property::Origin,
            "serial" => Property::Serial,
            "temperature" => Property::Temperature,
            "archived" => Property::Archived,
            "created" => Property::Created,
            other => {
                return Err(DomainError::validation(format!(
                    "unknown property `{other}`"
                )));
            }
        };
        Ok(property)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    In,
    NotIn,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl Operator {
    /// Operators whose match set is a union of exact values.
    pub fn is_inclusive(self) -> bool {
        matches!(self, Operator::Eq | Operator::In)
    }

    /// Operators whose match set excludes exact values.
    pub fn is_exclusive(self) -> bool {
        matches!(self, Operator::Ne | Operator::NotIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

/// One `(property, direction)` element of an ordering request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub property: Property,
    pub direction: Direction,
}

impl SortKey {
    pub fn asc(property: Property) -> Self {
        Self {
            property,
            direction: Direction::Asc,
        }
    }

    pub fn desc(property: Property) -> Self {
        Self {
            property,
            direction: Direction::Desc,
        }
    }
}

impl FromStr for SortKey {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (name, direction) = match raw.split_once(':') {
            Some((name, "asc")) => (name, Direction::Asc),
            Some((name, "desc")) => (name, Direction::Desc),
            Some((_, other)) => {
                return Err(DomainError::validation(format!(
                    "unknown sort direction `{other}`"
                )));
            }
            None => (raw, Direction::Asc),
        };
        Ok(Self {
            property: Property::try_from(name.trim())?,
            direction,
        })
    }
}

/// A typed predicate operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Number(i64),
    Flag(bool),
    Status(Status),
    Motive(Motive),
    Purpose(Purpose),
    Date(Date),
    Shard(ShardKey),
    Sort(SortKey),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// Parse a raw operand according to the type of `property`.
    pub fn parse_for(property: Property, raw: &str) -> Result<Self, DomainError> {
        let raw = raw.trim();
        let invalid = || DomainError::validation(format!("invalid {property} value `{raw}`"));
        let value = match property {
            Property::Shard => Value::Shard(ShardKey::new(raw)?),
            Property::Order => Value::Sort(raw.parse()?),
            Property::Status => Value::Status(Status::try_from(raw).map_err(|_| invalid())?),
            Property::Motive => Value::Motive(Motive::try_from(raw).map_err(|_| invalid())?),
            Property::Purpose => Value::Purpose(Purpose::try_from(raw).map_err(|_| invalid())?),
            Property::Archived => Value::Flag(raw.parse().map_err(|_| invalid())?),
            Property::Created => {
                let format = format_description!("[year]-[month]-[day]");
                Value::Date(Date::parse(raw, &format).map_err(|_| invalid())?)
            }
            Property::Offset
            | Property::Length
            | Property::Id
            | Property::Predecessor
            | Property::Origin
            | Property::Serial
            | Property::Temperature => Value::Number(raw.parse().map_err(|_| invalid())?),
            Property::Title
            | Property::Area
            | Property::Version
            | Property::Reporter
            | Property::Solver
            | Property::Participant
            | Property::Aspirant
            | Property::Watcher => Value::Text(raw.to_string()),
        };
        Ok(value)
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(number) => Some(*number),
            _ => None,
        }
    }
}

/// A single `(property, operator, values)` constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub property: Property,
    pub operator: Operator,
    pub values: Vec<Value>,
}

impl Predicate {
    pub fn new(property: Property, operator: Operator, values: Vec<Value>) -> Self {
        Self {
            property,
            operator,
            values,
        }
    }

    pub fn eq(property: Property, value: Value) -> Self {
        Self::new(property, Operator::Eq, vec![value])
    }

    pub fn ne(property: Property, value: Value) -> Self {
        Self::new(property, Operator::Ne, vec![value])
    }

    pub fn any_of(property: Property, values: Vec<Value>) -> Self {
        Self::new(property, Operator::In, values)
    }

    pub fn none_of(property: Property, values: Vec<Value>) -> Self {
        Self::new(property, Operator::NotIn, values)
    }

    pub fn shard(key: ShardKey) -> Self {
        Self::eq(Property::Shard, Value::Shard(key))
    }

    pub fn order(keys: Vec<SortKey>) -> Self {
        Self::new(
            Property::Order,
            Operator::Eq,
            keys.into_iter().map(Value::Sort).collect(),
        )
    }

    pub fn offset(offset: usize) -> Self {
        Self::eq(Property::Offset, Value::Number(offset as i64))
    }

    pub fn length(length: usize) -> Self {
        Self::eq(Property::Length, Value::Number(length as i64))
    }

    /// The single operand of an equality constraint, if this is one.
    pub fn equality_value(&self) -> Option<&Value> {
        match (self.operator, self.values.as_slice()) {
            (Operator::Eq, [value]) => Some(value),
            _ => None,
        }
    }

    /// Evaluate this predicate against a task. Non-filter properties always match.
    pub fn matches(&self, task: &Task, today: Date) -> bool {
        if !self.property.is_filter() {
            return true;
        }
        let field = Field::of(task, self.property, today);
        match self.operator {
            Operator::Eq | Operator::In => self.values.iter().any(|value| field.equals(value)),
            Operator::Ne | Operator::NotIn => !self.values.iter().any(|value| field.equals(value)),
            Operator::Lt => self.compare_first(&field, |ordering| ordering == Ordering::Less),
            Operator::Le => self.compare_first(&field, |ordering| ordering != Ordering::Greater),
            Operator::Gt => self.compare_first(&field, |ordering| ordering == Ordering::Greater),
            Operator::Ge => self.compare_first(&field, |ordering| ordering != Ordering::Less),
            Operator::Contains => self.values.iter().any(|value| field.contains(value)),
        }
    }

    fn compare_first(&self, field: &Field<'_>, accept: impl Fn(Ordering) -> bool) -> bool {
        self.values
            .first()
            .and_then(|value| field.compare(value))
            .is_some_and(accept)
    }
}

impl FromStr for Predicate {
    type Err = DomainError;

    /// Parse the compact `property<op>value[,value...]` form used on the
    /// command line. Operators: `=`, `!=`, `<`, `<=`, `>`, `>=`, `~`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        const OPERATORS: [(&str, Operator); 7] = [
            ("!=", Operator::Ne),
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("=", Operator::Eq),
            ("<", Operator::Lt),
            (">", Operator::Gt),
            ("~", Operator::Contains),
        ];

        let (name, operator, operand) = OPERATORS
            .iter()
            .find_map(|(token, operator)| {
                raw.split_once(token)
                    .map(|(name, operand)| (name, *operator, operand))
            })
            .ok_or_else(|| DomainError::validation(format!("missing operator in `{raw}`")))?;

        let property = Property::try_from(name.trim())?;
        let values = operand
            .split(',')
            .map(|part| Value::parse_for(property, part))
            .collect::<Result<Vec<_>, _>>()?;

        let operator = match (operator, values.len()) {
            (Operator::Eq, n) if n > 1 && property != Property::Order => Operator::In,
            (Operator::Ne, n) if n > 1 => Operator::NotIn,
            (operator, _) => operator,
        };
        Ok(Self::new(property, operator, values))
    }
}

/// Compare two tasks by one sort key.
pub fn compare_by(left: &Task, right: &Task, key: SortKey, today: Date) -> Ordering {
    let left_field = Field::of(left, key.property, today);
    let right_field = Field::of(right, key.property, today);
    let ordering = left_field.order(&right_field);
    match key.direction {
        Direction::Asc => ordering,
        Direction::Desc => ordering.reverse(),
    }
}

/// Borrowed view of one task field, typed for comparison.
enum Field<'a> {
    Text(&'a str),
    Number(i64),
    Flag(bool),
    Status(Status),
    Motive(Motive),
    Purpose(Purpose),
    Date(Date),
    Names(&'a BTreeSet<String>),
    Absent,
}

impl<'a> Field<'a> {
    fn of(task: &'a Task, property: Property, today: Date) -> Self {
        match property {
            Property::Id => Field::Number(i64::from(task.id)),
            Property::Title => Field::Text(&task.title),
            Property::Status => Field::Status(task.status),
            Property::Motive => Field::Motive(task.motive),
            Property::Purpose => Field::Purpose(task.purpose),
            Property::Area => Field::Text(&task.area),
            Property::Version => Field::Text(&task.version),
            Property::Reporter => Field::Text(&task.reporter),
            Property::Solver => task.solver.as_deref().map_or(Field::Absent, Field::Text),
            Property::Participant => Field::Names(&task.participants),
            Property::Aspirant => Field::Names(&task.aspirants),
            Property::Watcher => Field::Names(&task.watchers),
            Property::Predecessor => optional_number(task.predecessor),
            Property::Origin => optional_number(task.origin),
            Property::Serial => optional_number(task.serial),
            Property::Temperature => Field::Number(i64::from(task.temperature(today))),
            Property::Archived => Field::Flag(task.archived),
            Property::Created => Field::Date(task.created),
            Property::Shard => Field::Text(task.shard.as_str()),
            Property::Offset | Property::Length | Property::Order => Field::Absent,
        }
    }

    fn equals(&self, value: &Value) -> bool {
        match (self, value) {
            (Field::Names(names), Value::Text(name)) => names.contains(name),
            _ => self.compare(value) == Some(Ordering::Equal),
        }
    }

    fn compare(&self, value: &Value) -> Option<Ordering> {
        match (self, value) {
            (Field::Text(text), Value::Text(other)) => Some((*text).cmp(other.as_str())),
            (Field::Text(text), Value::Shard(shard)) => Some((*text).cmp(shard.as_str())),
            (Field::Number(number), Value::Number(other)) => Some(number.cmp(other)),
            (Field::Flag(flag), Value::Flag(other)) => Some(flag.cmp(other)),
            (Field::Status(status), Value::Status(other)) => Some(status.cmp(other)),
            (Field::Motive(motive), Value::Motive(other)) => Some(motive.cmp(other)),
            (Field::Purpose(purpose), Value::Purpose(other)) => Some(purpose.cmp(other)),
            (Field::Date(date), Value::Date(other)) => Some(date.cmp(other)),
            _ => None,
        }
    }

    fn contains(&self, value: &Value) -> bool {
        let Value::Text(needle) = value else {
            return false;
        };
        let needle = needle.to_lowercase();
        match self {
            Field::Text(text) => text.to_lowercase().contains(&needle),
            Field::Names(names) => names
                .iter()
                .any(|name| name.to_lowercase().contains(&needle)),
            _ => false,
        }
    }

    /// Total order used for sorting; absent values sort first.
    fn order(&self, other: &Field<'_>) -> Ordering {
        match (self, other) {
            (Field::Absent, Field::Absent) => Ordering::Equal,
            (Field::Absent, _) => Ordering::Less,
            (_, Field::Absent) => Ordering::Greater,
            (Field::Text(left), Field::Text(right)) => left.cmp(right),
            (Field::Number(left), Field::Number(right)) => left.cmp(right),
            (Field::Flag(left), Field::Flag(right)) => left.cmp(right),
            (Field::Status(left), Field::Status(right)) => left.cmp(right),
            (Field::Motive(left), Field::Motive(right)) => left.cmp(right),
            (Field::Purpose(left), Field::Purpose(right)) => left.cmp(right),
            (Field::Date(left), Field::Date(right)) => left.cmp(right),
            (Field::Names(left), Field::Names(right)) => left.len().cmp(&right.len()),
            _ => Ordering::Equal,
        }
    }
}

fn optional_number<'a>(value: Option<u32>) -> Field<'a> {
    value.map_or(Field::Absent, |number| Field::Number(i64::from(number)))
}
