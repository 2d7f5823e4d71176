//! Producer-side append handles.

use crate::{error::DistributedError, messages::ShardRequest};
use crossbeam_channel::Sender;
use kioku_core::Transition;

/// Appends records to one shard of a distributed buffer.
///
/// Each writer is bound to a single shard, which it alone feeds; shard
/// ownership is how the distributed buffers avoid cross-producer
/// coordination on the write path. Records are buffered locally and sent
/// as one message every `n_buffer` appends to keep channel traffic low.
///
/// Call [`flush`](ShardWriter::flush) before dropping the writer or
/// sampling what was just written; buffered records are not visible to the
/// shard until flushed.
pub struct ShardWriter {
    /// Shard this writer feeds.
    shard: usize,

    /// Request queue of the owning shard.
    sender: Sender<ShardRequest>,

    /// Number of records buffered before a send.
    n_buffer: usize,

    /// Locally buffered records.
    pending: Vec<(Transition, Option<f32>)>,
}

impl ShardWriter {
    pub(crate) fn new(shard: usize, sender: Sender<ShardRequest>, n_buffer: usize) -> Self {
        let n_buffer = n_buffer.max(1);
        Self {
            shard,
            sender,
            n_buffer,
            pending: Vec::with_capacity(n_buffer),
        }
    }

    /// Shard this writer feeds.
    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Appends a record with the default priority.
    ///
    /// # Errors
    ///
    /// Returns [`DistributedError::ShardUnreachable`] if a flush was
    /// triggered and the shard's queue is gone or full.
    pub fn append(&mut self, record: Transition) -> Result<(), DistributedError> {
        self.push(record, None)
    }

    /// Appends a record with an explicit priority.
    ///
    /// Only meaningful for prioritized shards; uniform shards reject the
    /// priority on arrival and log it.
    pub fn append_with_priority(
        &mut self,
        record: Transition,
        priority: f32,
    ) -> Result<(), DistributedError> {
        self.push(record, Some(priority))
    }

    fn push(&mut self, record: Transition, priority: Option<f32>) -> Result<(), DistributedError> {
        self.pending.push((record, priority));
        if self.pending.len() >= self.n_buffer {
            self.flush()?;
        }
        Ok(())
    }

    /// Sends all buffered records to the shard.
    ///
    /// # Errors
    ///
    /// Returns [`DistributedError::ShardUnreachable`] if the shard's queue
    /// is gone or full; the records of the failed batch are dropped.
    pub fn flush(&mut self) -> Result<(), DistributedError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut batch = Vec::with_capacity(self.n_buffer);
        std::mem::swap(&mut self.pending, &mut batch);

        self.sender
            .try_send(ShardRequest::Append(batch))
            .map_err(|_| DistributedError::ShardUnreachable { shard: self.shard })
    }
}
