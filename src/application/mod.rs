//! Application layer: the ports the cache consumes and the top-level error.

pub mod error;
pub mod repos;
