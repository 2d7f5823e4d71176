#![warn(missing_docs)]
//! Sharded replay buffers served by worker threads.
//!
//! A [`DistributedBuffer`] (or [`DistributedPrioritizedBuffer`]) spawns N
//! shard workers, each owning a private `kioku-core` store and serving
//! requests from its own channel. Producers append through per-shard
//! [`ShardWriter`]s without contending with each other; a consumer samples
//! globally through the coordinator, which assembles batches per the
//! configured [`SampleStrategy`] and routes priority updates back to the
//! owning shards via [`SampleSource`] provenance.
//!
//! ```no_run
//! use kioku_core::{FieldValue, SampleMethod, Transition};
//! use kioku_distributed::{DistributedBuffer, DistributedBufferConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let buffer = DistributedBuffer::build(&DistributedBufferConfig::default().n_shards(4));
//!     let mut writer = buffer.writer(0)?;
//!     writer.append(Transition::from_slice(&[(
//!         "reward",
//!         FieldValue::Scalar(1.0),
//!     )]))?;
//!     writer.flush()?;
//!     let batch = buffer.sample_batch(32, SampleMethod::Uniform, true, None)?;
//!     assert!(!batch.is_degraded());
//!     buffer.stop_and_join();
//!     Ok(())
//! }
//! ```

mod buffer;
mod config;
mod error;
mod messages;
mod shard;
mod store;
mod wire;
mod writer;

pub use buffer::{
    DistributedBatch, DistributedBuffer, DistributedBufferImpl, DistributedPrioritizedBuffer,
    SampleSource,
};
pub use config::{
    DistributedBufferConfig, DistributedPrioritizedBufferConfig, FailurePolicy, SampleStrategy,
};
pub use error::DistributedError;
pub use store::ShardStore;
pub use wire::WireBatch;
pub use writer::ShardWriter;
