use thiserror::Error;

use super::task::ShardKey;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("task id {id} is outside the supported range 1..={max}")]
    TaskIdOutOfRange { id: u32, max: u16 },
    #[error("change batch for shard `{expected}` contains an entry for shard `{found}`")]
    MixedShards { expected: ShardKey, found: ShardKey },
    #[error("change batch is empty")]
    EmptyBatch,
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
