//! Domain layer types and invariants.

pub mod actor;
pub mod change;
pub mod error;
pub mod predicate;
pub mod task;
pub mod types;
