//! The seam between shard workers and the stores they own.

use kioku_core::{
    Buffer, BufferConfig, KiokuError, PrioritizedBuffer, PrioritizedBufferConfig, SampleMethod,
    Transition,
};

/// A single-shard store served by one worker thread.
///
/// Implemented by [`Buffer`] (uniform sampling) and [`PrioritizedBuffer`]
/// (weighted sampling); the shard loop and the coordinator are generic
/// over this trait. All methods run on the owning worker thread, so
/// implementations need no internal synchronization.
pub trait ShardStore: Send + 'static {
    /// Configuration the store is built from.
    type Config: Clone + Send;

    /// Builds a store for one shard.
    fn build(config: &Self::Config) -> Self;

    /// Appends one record; the priority is meaningful only for
    /// prioritized stores.
    fn append(&mut self, record: Transition, priority: Option<f32>) -> Result<usize, KiokuError>;

    /// Draws `n` local slot indices, with importance-sampling weights
    /// where the store computes them.
    fn sample(
        &mut self,
        n: usize,
        method: SampleMethod,
    ) -> Result<(Vec<usize>, Option<Vec<f32>>), KiokuError>;

    /// Clones the records at the given occupied slots.
    fn records_at(&self, ixs: &[usize]) -> Vec<Transition>;

    /// Every occupied slot in insertion order, with per-slot tree weights
    /// for prioritized stores.
    fn snapshot(&self) -> (Vec<usize>, Vec<Transition>, Option<Vec<f32>>);

    /// Rewrites slot priorities. Uniform stores reject this.
    fn update_priority(&mut self, ixs: &[usize], priorities: &[f32]) -> Result<(), KiokuError>;

    /// Logically empties the store.
    fn clear(&mut self);

    /// Occupied slots.
    fn size(&self) -> usize;

    /// Weight of this shard in proportional dispatch: the occupied count
    /// for uniform stores, the weight-tree total for prioritized stores.
    fn sampling_weight(&self) -> f32;

    /// Current importance-sampling exponent, if the store anneals one.
    fn beta(&self) -> Option<f32> {
        None
    }
}

impl ShardStore for Buffer {
    type Config = BufferConfig;

    fn build(config: &Self::Config) -> Self {
        Buffer::build(config)
    }

    fn append(&mut self, record: Transition, priority: Option<f32>) -> Result<usize, KiokuError> {
        if priority.is_some() {
            return Err(KiokuError::InvalidArgument(
                "uniform buffer does not accept priorities".into(),
            ));
        }
        Buffer::append(self, record)
    }

    fn sample(
        &mut self,
        n: usize,
        method: SampleMethod,
    ) -> Result<(Vec<usize>, Option<Vec<f32>>), KiokuError> {
        match method {
            SampleMethod::Uniform => Ok((self.sample_indices(n)?, None)),
            SampleMethod::All => {
                if self.is_empty() {
                    return Err(KiokuError::EmptyBuffer);
                }
                Ok((self.indices_in_order(), None))
            }
        }
    }

    fn records_at(&self, ixs: &[usize]) -> Vec<Transition> {
        Buffer::records_at(self, ixs)
    }

    fn snapshot(&self) -> (Vec<usize>, Vec<Transition>, Option<Vec<f32>>) {
        let ixs = self.indices_in_order();
        let records = Buffer::records_at(self, &ixs);
        (ixs, records, None)
    }

    fn update_priority(&mut self, _ixs: &[usize], _priorities: &[f32]) -> Result<(), KiokuError> {
        Err(KiokuError::InvalidArgument(
            "uniform buffer has no priorities to update".into(),
        ))
    }

    fn clear(&mut self) {
        Buffer::clear(self)
    }

    fn size(&self) -> usize {
        Buffer::size(self)
    }

    fn sampling_weight(&self) -> f32 {
        Buffer::size(self) as f32
    }
}

impl ShardStore for PrioritizedBuffer {
    type Config = PrioritizedBufferConfig;

    fn build(config: &Self::Config) -> Self {
        PrioritizedBuffer::build(config)
    }

    fn append(&mut self, record: Transition, priority: Option<f32>) -> Result<usize, KiokuError> {
        PrioritizedBuffer::append(self, record, priority)
    }

    fn sample(
        &mut self,
        n: usize,
        method: SampleMethod,
    ) -> Result<(Vec<usize>, Option<Vec<f32>>), KiokuError> {
        match method {
            SampleMethod::Uniform => {
                let (ixs, ws) = self.sample_indices(n)?;
                Ok((ixs, Some(ws)))
            }
            SampleMethod::All => {
                if self.is_empty() {
                    return Err(KiokuError::EmptyBuffer);
                }
                Ok((self.indices_in_order(), None))
            }
        }
    }

    fn records_at(&self, ixs: &[usize]) -> Vec<Transition> {
        PrioritizedBuffer::records_at(self, ixs)
    }

    fn snapshot(&self) -> (Vec<usize>, Vec<Transition>, Option<Vec<f32>>) {
        let ixs = self.indices_in_order();
        let records = PrioritizedBuffer::records_at(self, &ixs);
        let weights = ixs.iter().map(|&ix| self.weight(ix)).collect();
        (ixs, records, Some(weights))
    }

    fn update_priority(&mut self, ixs: &[usize], priorities: &[f32]) -> Result<(), KiokuError> {
        PrioritizedBuffer::update_priority(self, ixs, priorities)
    }

    fn clear(&mut self) {
        PrioritizedBuffer::clear(self)
    }

    fn size(&self) -> usize {
        PrioritizedBuffer::size(self)
    }

    fn sampling_weight(&self) -> f32 {
        self.total_weight()
    }

    fn beta(&self) -> Option<f32> {
        Some(PrioritizedBuffer::beta(self))
    }
}
