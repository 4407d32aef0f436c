//! Cache configuration.
//!
//! Controls result paging defaults via the `[cache]` table of `tracker-cache.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_PAGE_LENGTH: usize = 50;

/// Cache configuration from `tracker-cache.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Page length when a query carries no `length` predicate.
    pub default_page_length: usize,
    /// Optional upper bound applied to any requested page length; unset
    /// means requested lengths are honored as given.
    pub max_page_length: Option<NonZeroUsize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_page_length: DEFAULT_PAGE_LENGTH,
            max_page_length: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_page_length: settings.default_page_length.get(),
            max_page_length: settings.max_page_length,
        }
    }
}
