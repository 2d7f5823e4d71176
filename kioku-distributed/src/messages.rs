//! Messages exchanged between the coordinator and shard workers.

use crossbeam_channel::Sender;
use kioku_core::{KiokuError, SampleMethod, Transition};

/// Requests a shard worker serves.
///
/// Requests that expect an answer carry the reply sender; the coordinator
/// waits on the paired receiver with a timeout. Appends are fire-and-forget
/// so that producers never block on the coordinator.
pub enum ShardRequest {
    /// Append a batch of records, each with an optional priority.
    Append(Vec<(Transition, Option<f32>)>),

    /// Report the current size and sampling weight.
    Stat(Sender<StatReply>),

    /// Draw records from the local store.
    Sample {
        /// Number of records to draw (ignored by [`SampleMethod::All`]).
        n: usize,

        /// Selection method.
        method: SampleMethod,

        /// Where to send the result.
        reply: Sender<Result<SampleReply, KiokuError>>,
    },

    /// Ship every occupied record, for the full-mirror strategy.
    Snapshot(Sender<SnapshotReply>),

    /// Rewrite slot priorities; an empty index list only advances the
    /// beta schedule.
    UpdatePriority {
        /// Local slot indices.
        ixs: Vec<usize>,

        /// New raw priorities, one per index.
        priorities: Vec<f32>,

        /// Where to send the result.
        reply: Sender<Result<(), KiokuError>>,
    },

    /// Stop accepting appends until `Resume`. First phase of a
    /// coordinated clear.
    Pause(Sender<()>),

    /// Reset the local store. Second phase of a coordinated clear.
    Clear(Sender<()>),

    /// Accept appends again. Last phase of a coordinated clear.
    Resume(Sender<()>),

    /// Shut the worker down.
    Stop,
}

/// A shard's answer to [`ShardRequest::Stat`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatReply {
    /// Identifier of the shard.
    pub shard: usize,

    /// Occupied slots.
    pub size: usize,

    /// Sampling weight of the shard: the occupied count for uniform
    /// stores, the weight-tree total for prioritized stores.
    pub weight: f32,
}

/// A shard's answer to [`ShardRequest::Sample`].
#[derive(Debug, Clone)]
pub struct SampleReply {
    /// Identifier of the shard.
    pub shard: usize,

    /// Local slot indices of the drawn records.
    pub indices: Vec<usize>,

    /// The drawn records.
    pub records: Vec<Transition>,

    /// Importance-sampling weights, present for prioritized stores under
    /// weighted selection.
    pub weights: Option<Vec<f32>>,
}

/// A shard's answer to [`ShardRequest::Snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotReply {
    /// Identifier of the shard.
    pub shard: usize,

    /// Local slot indices, insertion order.
    pub indices: Vec<usize>,

    /// Every occupied record, insertion order.
    pub records: Vec<Transition>,

    /// Per-record tree weights (transformed space) for prioritized
    /// stores.
    pub weights: Option<Vec<f32>>,

    /// Current importance-sampling exponent of the shard, if prioritized.
    pub beta: Option<f32>,
}
