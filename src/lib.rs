//! In-memory read cache for an issue tracker.
//!
//! Tasks are indexed per shard by long-lived execution contexts; a router
//! dispatches queries to them, fans out across shards and merges the pages.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
