//! Fixed-capacity ring buffer of transition records.

use crate::{
    batch::{collate, expand_keys, SampleKey, SampleMethod, SampledBatch},
    config::BufferConfig,
    error::KiokuError,
    transition::{Schema, Transition},
};
use log::info;
use rand::{rngs::StdRng, RngCore, SeedableRng};

/// A circular store of transitions with uniform random sampling.
///
/// Slots are pre-allocated to `capacity`; once the buffer is full, each
/// append overwrites the oldest record (FIFO eviction). The field schema
/// is inferred from the first appended record and fixed thereafter.
///
/// A `Buffer` is single-writer: concurrent producers must either own
/// separate buffers (see the distributed variants) or serialize their
/// appends externally.
///
/// # Examples
///
/// ```
/// use kioku_core::{Buffer, BufferConfig, FieldValue, SampleMethod, Transition};
///
/// let mut buffer = Buffer::build(&BufferConfig::default().capacity(100));
/// buffer.append(Transition::from_slice(&[
///     ("state", FieldValue::Array1(vec![0.0, 1.0])),
///     ("reward", FieldValue::Scalar(1.0)),
/// ])).unwrap();
///
/// let batch = buffer.sample_batch(32, SampleMethod::Uniform, true, None).unwrap();
/// assert_eq!(batch.batch_size, 32);
/// ```
pub struct Buffer {
    /// Maximum number of records that can be stored.
    capacity: usize,

    /// Current insertion index.
    i: usize,

    /// Current number of stored records.
    size: usize,

    /// Pre-allocated slots.
    slots: Vec<Option<Transition>>,

    /// Field layout, fixed by the first append.
    schema: Option<Schema>,

    /// Random number generator for uniform sampling.
    rng: StdRng,
}

impl Buffer {
    /// Creates a buffer from a configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configured capacity is zero.
    pub fn build(config: &BufferConfig) -> Self {
        assert!(config.capacity > 0, "buffer capacity must be positive");
        info!("Built a replay buffer with capacity {}", config.capacity);
        Self {
            capacity: config.capacity,
            i: 0,
            size: 0,
            slots: vec![None; config.capacity],
            schema: None,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Maximum number of records that can be stored.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of stored records.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The schema established by the first append, if any.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Record stored at slot `ix`, if occupied.
    pub fn get(&self, ix: usize) -> Option<&Transition> {
        self.slots.get(ix).and_then(|s| s.as_ref())
    }

    /// Appends a record at the write cursor, evicting the oldest record
    /// once the buffer is full.
    ///
    /// Returns the slot index the record was written to.
    ///
    /// # Errors
    ///
    /// Returns [`KiokuError::InvalidArgument`] if the record does not match
    /// the schema established by the first append. A failed append leaves
    /// the buffer unchanged.
    pub fn append(&mut self, record: Transition) -> Result<usize, KiokuError> {
        match &self.schema {
            Some(schema) => schema.validate(&record)?,
            None => self.schema = Some(Schema::infer(&record)?),
        }

        let ix = self.i;
        self.slots[ix] = Some(record);
        self.i = (self.i + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        Ok(ix)
    }

    /// Occupied slot indices in insertion order, oldest first.
    pub fn indices_in_order(&self) -> Vec<usize> {
        if self.size < self.capacity {
            (0..self.size).collect()
        } else {
            (self.i..self.capacity).chain(0..self.i).collect()
        }
    }

    /// Draws `n` occupied slot indices uniformly with replacement.
    ///
    /// # Errors
    ///
    /// Returns [`KiokuError::EmptyBuffer`] if no slot is occupied.
    pub fn sample_indices(&mut self, n: usize) -> Result<Vec<usize>, KiokuError> {
        if self.size == 0 {
            return Err(KiokuError::EmptyBuffer);
        }
        Ok((0..n)
            .map(|_| (self.rng.next_u32() as usize) % self.size)
            .collect())
    }

    /// Clones the records at the given slot indices.
    ///
    /// Indices must address occupied slots; used by shard workers that ship
    /// raw records to a sampling coordinator.
    pub fn records_at(&self, ixs: &[usize]) -> Vec<Transition> {
        ixs.iter()
            .map(|&ix| {
                self.slots[ix]
                    .as_ref()
                    .expect("index addresses an occupied slot")
                    .clone()
            })
            .collect()
    }

    /// Selects `batch_size` records and extracts the requested fields.
    ///
    /// With [`SampleMethod::Uniform`], records are drawn with replacement
    /// over occupied slots. With [`SampleMethod::All`], every occupied slot
    /// is returned in insertion order and `batch_size` is ignored; the
    /// returned `batch_size` reflects the actual selection.
    ///
    /// `sample_keys` selects fields per record (`None` selects all;
    /// [`SampleKey::Wildcard`] expands to all remaining fields).
    /// `concatenate` stacks same-named fields along a new leading batch
    /// dimension.
    ///
    /// # Errors
    ///
    /// * [`KiokuError::EmptyBuffer`] if no slot is occupied.
    /// * [`KiokuError::InvalidArgument`] for unknown sample keys.
    /// * [`KiokuError::ShapeMismatch`] if concatenation meets incompatible
    ///   field shapes.
    pub fn sample_batch(
        &mut self,
        batch_size: usize,
        method: SampleMethod,
        concatenate: bool,
        sample_keys: Option<&[SampleKey]>,
    ) -> Result<SampledBatch, KiokuError> {
        if self.size == 0 {
            return Err(KiokuError::EmptyBuffer);
        }
        let schema = self.schema.as_ref().expect("non-empty buffer has a schema");
        let keys = expand_keys(schema, sample_keys)?;

        let ixs = match method {
            SampleMethod::Uniform => {
                let size = self.size;
                (0..batch_size)
                    .map(|_| (self.rng.next_u32() as usize) % size)
                    .collect::<Vec<_>>()
            }
            SampleMethod::All => self.indices_in_order(),
        };

        let records: Vec<&Transition> = ixs
            .iter()
            .map(|&ix| self.slots[ix].as_ref().expect("occupied slot"))
            .collect();
        let fields = collate(&records, &keys, concatenate)?;

        Ok(SampledBatch {
            batch_size: ixs.len(),
            fields,
            indices: Some(ixs),
            weights: None,
        })
    }

    /// Resets the occupied count and write cursor.
    ///
    /// Backing storage is retained; slots are logically emptied and the
    /// schema is kept.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.i = 0;
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchValue, FieldBatch};
    use crate::transition::FieldValue;

    fn record(x: f32) -> Transition {
        Transition::from_slice(&[
            ("state", FieldValue::Array1(vec![x, x + 1.0])),
            ("action", FieldValue::Scalar(x)),
            ("reward", FieldValue::Scalar(x * 0.5)),
            ("next_state", FieldValue::Array1(vec![x + 1.0, x + 2.0])),
            ("terminal", FieldValue::Scalar(0.0)),
        ])
    }

    fn buffer(capacity: usize) -> Buffer {
        Buffer::build(&BufferConfig::default().capacity(capacity))
    }

    #[test]
    fn test_fifo_eviction() {
        // Capacity 4, append A..E: A is evicted, [B, C, D, E] remain.
        let mut buffer = buffer(4);
        for x in 0..5 {
            buffer.append(record(x as f32)).unwrap();
        }
        assert_eq!(buffer.size(), 4);

        let batch = buffer
            .sample_batch(0, SampleMethod::All, true, Some(&[SampleKey::named("action")]))
            .unwrap();
        assert_eq!(batch.batch_size, 4);
        match batch.field("action").unwrap() {
            FieldBatch::Stacked(BatchValue::Array1(actions)) => {
                assert_eq!(actions, &vec![1.0, 2.0, 3.0, 4.0]);
            }
            other => panic!("unexpected batch: {:?}", other),
        }
    }

    #[test]
    fn test_all_returns_insertion_order_before_wrap() {
        let mut buffer = buffer(4);
        for x in 0..3 {
            buffer.append(record(x as f32)).unwrap();
        }
        let batch = buffer
            .sample_batch(10, SampleMethod::All, true, Some(&[SampleKey::named("action")]))
            .unwrap();
        assert_eq!(batch.batch_size, 3);
        match batch.field("action").unwrap() {
            FieldBatch::Stacked(BatchValue::Array1(actions)) => {
                assert_eq!(actions, &vec![0.0, 1.0, 2.0]);
            }
            other => panic!("unexpected batch: {:?}", other),
        }
    }

    #[test]
    fn test_uniform_sampling_only_occupied_slots() {
        let mut buffer = buffer(8);
        for x in 0..3 {
            buffer.append(record(x as f32)).unwrap();
        }
        let batch = buffer
            .sample_batch(100, SampleMethod::Uniform, false, None)
            .unwrap();
        assert_eq!(batch.batch_size, 100);
        assert!(batch.indices.unwrap().iter().all(|&ix| ix < 3));
    }

    #[test]
    fn test_schema_mismatch_rejected_and_state_preserved() {
        let mut buffer = buffer(4);
        buffer.append(record(0.0)).unwrap();

        let mut bad = record(1.0);
        bad.insert("state", FieldValue::Array1(vec![0.0]));
        assert!(matches!(
            buffer.append(bad),
            Err(KiokuError::InvalidArgument(_))
        ));
        assert_eq!(buffer.size(), 1);
    }

    #[test]
    fn test_sample_empty_fails() {
        let mut buffer = buffer(4);
        assert!(matches!(
            buffer.sample_batch(4, SampleMethod::Uniform, true, None),
            Err(KiokuError::EmptyBuffer)
        ));
    }

    #[test]
    fn test_zero_batch_size_yields_empty_batch() {
        let mut buffer = buffer(4);
        buffer.append(record(0.0)).unwrap();
        let batch = buffer
            .sample_batch(0, SampleMethod::Uniform, true, None)
            .unwrap();
        assert_eq!(batch.batch_size, 0);
        assert!(batch.fields.is_empty());
    }

    #[test]
    fn test_clear_then_sample_fails() {
        let mut buffer = buffer(4);
        for x in 0..4 {
            buffer.append(record(x as f32)).unwrap();
        }
        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert!(matches!(
            buffer.sample_batch(2, SampleMethod::All, true, None),
            Err(KiokuError::EmptyBuffer)
        ));
    }

    #[test]
    fn test_clear_keeps_schema_and_accepts_matching_records() {
        let mut buffer = buffer(4);
        buffer.append(record(0.0)).unwrap();
        buffer.clear();
        buffer.append(record(1.0)).unwrap();
        assert_eq!(buffer.size(), 1);
    }
}
