//! Tracker Read Cache
//!
//! In-memory, incrementally maintained indexes over per-project task sets:
//!
//! - **Shard**: one project's primary array and secondary buckets, owned by a
//!   single tokio task that serves lookups and change batches in order
//! - **Router**: maps project keys to shards, fans multi-project queries out
//!   and merges them, and drops every shard once per day
//!
//! ## Configuration
//!
//! Paging defaults come from `tracker-cache.toml`. `max_page_length` is
//! optional; without it requested lengths are honored as given.
//!
//! ```toml
//! [cache]
//! default_page_length = 50
//! # max_page_length = 1000
//! ```

mod config;
mod delta;
mod error;
mod id_set;
mod index;
mod lock;
mod lookup;
mod merge;
mod planner;
mod result;
mod router;
mod shard;

pub use config::CacheConfig;
pub use delta::{ApplySummary, EntryOutcome};
pub use error::CacheError;
pub use id_set::CompactIdSet;
pub use index::{ShardIndex, ShardStats};
pub use lookup::{Page, ResultSpec, paginate, sort_tasks};
pub use result::MatchResult;
pub use router::CacheRouter;
pub use shard::ShardCache;
