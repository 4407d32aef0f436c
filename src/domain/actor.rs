use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::task::ShardKey;

/// The user a query runs on behalf of, with the shards they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    #[serde(default)]
    pub shards: BTreeSet<ShardKey>,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shards: BTreeSet::new(),
        }
    }

    pub fn with_shards(mut self, shards: impl IntoIterator<Item = ShardKey>) -> Self {
        self.shards.extend(shards);
        self
    }
}
