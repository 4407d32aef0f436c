use thiserror::Error;

use crate::domain::task::ShardKey;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("shard `{0}` is closed")]
    ShardClosed(ShardKey),
    #[error("shard `{shard}` failed to load: {message}")]
    LoadFailed { shard: ShardKey, message: String },
    #[error("shard `{0}` dropped the reply")]
    ReplyDropped(ShardKey),
    #[error("cache router is closed")]
    RouterClosed,
}

impl CacheError {
    pub fn load_failed(shard: &ShardKey, message: impl Into<String>) -> Self {
        Self::LoadFailed {
            shard: shard.clone(),
            message: message.into(),
        }
    }
}
