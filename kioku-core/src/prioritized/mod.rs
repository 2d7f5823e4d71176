//! Prioritized experience replay buffer.
//!
//! Composes the ring-store discipline of [`Buffer`](crate::Buffer) with a
//! [`WeightTree`] keyed by record priority: records are drawn with
//! probability proportional to their priority, and each sampled record
//! carries an importance-sampling weight compensating for the non-uniform
//! selection.

mod iw_scheduler;
pub use iw_scheduler::IwScheduler;

use crate::{
    batch::{collate, expand_keys, SampleKey, SampledBatch},
    config::{PrioritizedBufferConfig, WeightNormalizer},
    error::KiokuError,
    transition::{Schema, Transition},
    weight_tree::WeightTree,
};
use log::info;

/// A ring buffer with priority-weighted sampling.
///
/// Storage follows the same FIFO overwrite rule as
/// [`Buffer`](crate::Buffer); a [`WeightTree`] of the same capacity holds
/// one weight per slot. Priorities are transformed as `(p + eps)^alpha`
/// before entering the tree. Never-written slots keep weight zero and are
/// never sampled.
///
/// # Examples
///
/// ```
/// use kioku_core::{FieldValue, PrioritizedBuffer, PrioritizedBufferConfig, Transition};
///
/// let mut buffer = PrioritizedBuffer::build(&PrioritizedBufferConfig::default().capacity(100));
/// buffer.append(
///     Transition::from_slice(&[("state", FieldValue::Scalar(0.0))]),
///     Some(2.0),
/// ).unwrap();
///
/// let batch = buffer.sample_batch(16, true, None).unwrap();
/// assert!(batch.weights.is_some());
/// ```
pub struct PrioritizedBuffer {
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

    /// Per-slot sampling weights.
    tree: WeightTree,

    /// Prioritization exponent.
    alpha: f32,

    /// Priority offset.
    eps: f32,

    /// Importance-weight normalization.
    normalize: WeightNormalizer,

    /// Scheduler of the importance-sampling exponent.
    iw_scheduler: IwScheduler,

    /// Largest raw priority seen so far, used as the default priority for
    /// appends.
    max_priority: f32,

    /// Random number generator for weighted draws.
    rng: fastrand::Rng,
}

impl PrioritizedBuffer {
    /// Creates a buffer from a configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configured capacity is zero.
    pub fn build(config: &PrioritizedBufferConfig) -> Self {
        assert!(config.capacity > 0, "buffer capacity must be positive");
        info!(
            "Built a prioritized replay buffer with capacity {}, alpha {}",
            config.capacity, config.per.alpha
        );
        let per = &config.per;
        Self {
            capacity: config.capacity,
            i: 0,
            size: 0,
            slots: vec![None; config.capacity],
            schema: None,
            tree: WeightTree::new(config.capacity).expect("capacity is positive"),
            alpha: per.alpha,
            eps: per.eps,
            normalize: per.normalize,
            iw_scheduler: IwScheduler::new(per.beta_0, per.beta_final, per.n_opts_final),
            max_priority: 0f32,
            rng: fastrand::Rng::with_seed(config.seed),
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

    /// Sum of all slot weights in transformed space.
    pub fn total_weight(&self) -> f32 {
        self.tree.total_weight()
    }

    /// Current importance-sampling exponent.
    pub fn beta(&self) -> f32 {
        self.iw_scheduler.beta()
    }

    /// Record stored at slot `ix`, if occupied.
    pub fn get(&self, ix: usize) -> Option<&Transition> {
        self.slots.get(ix).and_then(|s| s.as_ref())
    }

    /// Sampling weight of slot `ix`, in transformed space.
    pub fn weight(&self, ix: usize) -> f32 {
        self.tree.weight(ix)
    }

    /// Occupied slot indices in insertion order, oldest first.
    pub fn indices_in_order(&self) -> Vec<usize> {
        if self.size < self.capacity {
            (0..self.size).collect()
        } else {
            (self.i..self.capacity).chain(0..self.i).collect()
        }
    }

    /// Clones the records at the given slot indices.
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

    fn transform(&self, priority: f32) -> f32 {
        (priority + self.eps).powf(self.alpha)
    }

    /// Appends a record, evicting the oldest record once full.
    ///
    /// The slot's sampling weight is set from `priority` if given, else
    /// from the largest priority seen so far (1.0 while nothing has been
    /// seen). The default keeps fresh records likely to be drawn at least
    /// once; it is a heuristic, tunable by passing explicit priorities.
    ///
    /// Returns the slot index the record was written to.
    ///
    /// # Errors
    ///
    /// Returns [`KiokuError::InvalidArgument`] on a schema mismatch or a
    /// negative priority. A failed append leaves the buffer unchanged.
    pub fn append(
        &mut self,
        record: Transition,
        priority: Option<f32>,
    ) -> Result<usize, KiokuError> {
        if let Some(p) = priority {
            if !p.is_finite() || p < 0f32 {
                return Err(KiokuError::InvalidArgument(format!(
                    "priority must be finite and non-negative, got {}",
                    p
                )));
            }
        }
        match &self.schema {
            Some(schema) => schema.validate(&record)?,
            None => self.schema = Some(Schema::infer(&record)?),
        }

        let raw = priority.unwrap_or(if self.max_priority > 0f32 {
            self.max_priority
        } else {
            1f32
        });

        let ix = self.i;
        self.slots[ix] = Some(record);
        self.tree.update(ix, self.transform(raw))?;
        self.max_priority = self.max_priority.max(raw);
        self.i = (self.i + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        Ok(ix)
    }

    /// Draws `n` slot indices by priority, with their importance-sampling
    /// weights.
    ///
    /// The weight of sample `i` is `(N * P(i))^-beta`, where `N` is the
    /// occupied count and `P(i)` the leaf weight over the total; weights
    /// are normalized by the batch maximum or the whole-buffer maximum per
    /// the configured [`WeightNormalizer`].
    ///
    /// # Errors
    ///
    /// * [`KiokuError::EmptyBuffer`] if no slot is occupied.
    /// * [`KiokuError::EmptyTree`] if all occupied slots have zero weight.
    pub fn sample_indices(&self, n: usize) -> Result<(Vec<usize>, Vec<f32>), KiokuError> {
        if self.size == 0 {
            return Err(KiokuError::EmptyBuffer);
        }
        let total = self.tree.total_weight();
        if total <= 0f32 || !total.is_finite() {
            return Err(KiokuError::EmptyTree);
        }
        let ixs: Vec<usize> = (0..n)
            .map(|_| self.tree.get(total * self.rng.f32()))
            .collect();

        let beta = self.iw_scheduler.beta();
        let n_occupied = self.size as f32;
        let ws: Vec<f32> = ixs
            .iter()
            .map(|&ix| (n_occupied * self.tree.weight(ix) / total).powf(-beta))
            .collect();

        let w_max = match self.normalize {
            WeightNormalizer::Batch => ws.iter().fold(f32::MIN, |m, &v| v.max(m)),
            WeightNormalizer::All => {
                (n_occupied * self.tree.min_weight(self.size) / total).powf(-beta)
            }
        };
        let ws = ws.iter().map(|w| w / w_max).collect();
        Ok((ixs, ws))
    }

    /// Selects `batch_size` records by priority and extracts the requested
    /// fields.
    ///
    /// Field selection and concatenation follow
    /// [`Buffer::sample_batch`](crate::Buffer::sample_batch); the returned
    /// batch carries the sampled slot indices and importance-sampling
    /// weights, which the learner feeds back through
    /// [`update_priority`](Self::update_priority).
    ///
    /// # Errors
    ///
    /// As [`sample_indices`](Self::sample_indices), plus
    /// [`KiokuError::InvalidArgument`] for unknown sample keys and
    /// [`KiokuError::ShapeMismatch`] on incompatible concatenation.
    pub fn sample_batch(
        &mut self,
        batch_size: usize,
        concatenate: bool,
        sample_keys: Option<&[SampleKey]>,
    ) -> Result<SampledBatch, KiokuError> {
        let (ixs, ws) = self.sample_indices(batch_size)?;
        let schema = self.schema.as_ref().expect("non-empty buffer has a schema");
        let keys = expand_keys(schema, sample_keys)?;

        let records: Vec<&Transition> = ixs
            .iter()
            .map(|&ix| self.slots[ix].as_ref().expect("occupied slot"))
            .collect();
        let fields = collate(&records, &keys, concatenate)?;

        Ok(SampledBatch {
            batch_size: ixs.len(),
            fields,
            indices: Some(ixs),
            weights: Some(ws),
        })
    }

    /// Rewrites the weights of the given slots from new priorities and
    /// advances the beta schedule by one step.
    ///
    /// Called by the learner after computing new priorities from the
    /// training loss, typically `|TD error|`.
    ///
    /// # Errors
    ///
    /// Returns [`KiokuError::InvalidArgument`] if the slices differ in
    /// length, an index addresses a slot that was never written, or a
    /// priority is negative. Validation happens before any weight is
    /// touched.
    pub fn update_priority(
        &mut self,
        ixs: &[usize],
        priorities: &[f32],
    ) -> Result<(), KiokuError> {
        if ixs.len() != priorities.len() {
            return Err(KiokuError::InvalidArgument(format!(
                "{} indices but {} priorities",
                ixs.len(),
                priorities.len()
            )));
        }
        for &ix in ixs {
            if ix >= self.size {
                return Err(KiokuError::InvalidArgument(format!(
                    "slot {} is not occupied (size {})",
                    ix, self.size
                )));
            }
        }
        for &p in priorities {
            if !p.is_finite() || p < 0f32 {
                return Err(KiokuError::InvalidArgument(format!(
                    "priority must be finite and non-negative, got {}",
                    p
                )));
            }
        }

        for (&ix, &p) in ixs.iter().zip(priorities.iter()) {
            self.tree.update(ix, self.transform(p))?;
            self.max_priority = self.max_priority.max(p);
        }
        self.iw_scheduler.advance();
        Ok(())
    }

    /// Resets the occupied count, write cursor, slot weights and the
    /// default-priority baseline.
    ///
    /// Backing storage is retained and the schema is kept.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.tree = WeightTree::new(self.capacity).expect("capacity is positive");
        self.i = 0;
        self.size = 0;
        self.max_priority = 0f32;
    }
}
