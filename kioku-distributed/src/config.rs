//! Configurations of the distributed buffers.

use anyhow::Result;
use kioku_core::PerConfig;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// How a global sample is assembled from the shards.
///
/// The strategy is an explicit consistency choice, not an implementation
/// accident; both are supported and tested.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum SampleStrategy {
    /// The coordinator queries each shard's size (or total weight) and
    /// dispatches a proportional number of local draws to each shard.
    ///
    /// Global uniformity is approximate: each shard's contribution is
    /// proportional to its reported stat at query time, which may be
    /// stale under concurrent local writes. Traffic is one stat and one
    /// sub-sample per shard.
    ProportionalDispatch,

    /// The coordinator pulls every shard's full contents and samples
    /// locally from the merged pool.
    ///
    /// Consistent global sampling at the cost of shipping all records on
    /// every call.
    FullMirror,
}

/// What to do when a shard misses its reply deadline.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum FailurePolicy {
    /// Drop the shard from the operation, log a warning, and mark the
    /// returned batch degraded (`shards_consulted < shards_total`).
    Skip,

    /// Fail the whole operation with `PartialFailure`.
    Fail,
}

/// Configuration of a [`DistributedBuffer`](crate::DistributedBuffer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct DistributedBufferConfig {
    /// Number of shard workers.
    pub n_shards: usize,

    /// Capacity of each shard; global capacity is `n_shards *
    /// shard_capacity`.
    pub shard_capacity: usize,

    /// Base random seed; shard `k` is seeded with `seed + k`.
    pub seed: u64,

    /// Reply deadline of every coordinator request, in milliseconds.
    pub timeout_ms: u64,

    /// Bound of each shard's request queue.
    pub channel_bound: usize,

    /// Number of records a [`ShardWriter`](crate::ShardWriter) buffers
    /// before sending one append message.
    pub n_buffer: usize,

    /// How global samples are assembled.
    pub strategy: SampleStrategy,

    /// How unresponsive shards are handled.
    pub failure_policy: FailurePolicy,
}

impl Default for DistributedBufferConfig {
    fn default() -> Self {
        Self {
            n_shards: 2,
            shard_capacity: 10000,
            seed: 42,
            timeout_ms: 1000,
            channel_bound: 1000,
            n_buffer: 1,
            strategy: SampleStrategy::ProportionalDispatch,
            failure_policy: FailurePolicy::Skip,
        }
    }
}

impl DistributedBufferConfig {
    /// Sets the number of shards.
    pub fn n_shards(mut self, n_shards: usize) -> Self {
        self.n_shards = n_shards;
        self
    }

    /// Sets the per-shard capacity.
    pub fn shard_capacity(mut self, shard_capacity: usize) -> Self {
        self.shard_capacity = shard_capacity;
        self
    }

    /// Sets the base random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the reply deadline in milliseconds.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the writer batching size.
    pub fn n_buffer(mut self, n_buffer: usize) -> Self {
        self.n_buffer = n_buffer;
        self
    }

    /// Sets the sampling strategy.
    pub fn strategy(mut self, strategy: SampleStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the failure policy.
    pub fn failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Configuration of a
/// [`DistributedPrioritizedBuffer`](crate::DistributedPrioritizedBuffer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct DistributedPrioritizedBufferConfig {
    /// Shard and coordination parameters.
    pub dist: DistributedBufferConfig,

    /// Prioritized sampling parameters, shared by all shards.
    pub per: PerConfig,
}

impl Default for DistributedPrioritizedBufferConfig {
    fn default() -> Self {
        Self {
            dist: DistributedBufferConfig::default(),
            per: PerConfig::default(),
        }
    }
}

impl DistributedPrioritizedBufferConfig {
    /// Sets the shard and coordination parameters.
    pub fn dist(mut self, dist: DistributedBufferConfig) -> Self {
        self.dist = dist;
        self
    }

    /// Sets the prioritized sampling parameters.
    pub fn per(mut self, per: PerConfig) -> Self {
        self.per = per;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
