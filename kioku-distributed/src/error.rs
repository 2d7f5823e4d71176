//! Errors of the distributed buffer layer.
use kioku_core::KiokuError;
use thiserror::Error;

/// Errors surfaced to callers of the distributed buffers.
///
/// Local buffer errors pass through as [`DistributedError::Core`];
/// coordination failures carry enough context to tell a dead shard from a
/// degraded batch.
#[derive(Debug, Error)]
pub enum DistributedError {
    /// A shard's request queue is gone or full.
    #[error("Shard {shard} is unreachable")]
    ShardUnreachable {
        /// Identifier of the shard.
        shard: usize,
    },

    /// Fewer shards than expected completed a coordinated operation.
    #[error("Partial failure: {consulted} of {total} shards completed")]
    PartialFailure {
        /// Shards that completed every request made to them.
        consulted: usize,

        /// Shards the operation was addressed to.
        total: usize,
    },

    /// An error raised by a shard's local buffer.
    #[error(transparent)]
    Core(#[from] KiokuError),
}
