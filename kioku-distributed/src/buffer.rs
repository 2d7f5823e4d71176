//! Distributed replay buffers.
//!
//! A distributed buffer presents one logical buffer backed by N
//! independent shard workers. Writes stay local to the producer's shard;
//! global sampling is coordinated by querying shard stats and either
//! dispatching proportional sub-samples or mirroring full shard contents,
//! per the configured [`SampleStrategy`].

use crate::{
    config::{
        DistributedBufferConfig, DistributedPrioritizedBufferConfig, FailurePolicy, SampleStrategy,
    },
    error::DistributedError,
    messages::{SampleReply, ShardRequest, SnapshotReply, StatReply},
    shard::{spawn, ShardHandle},
    store::ShardStore,
    writer::ShardWriter,
};
use crossbeam_channel::{bounded, Receiver};
use kioku_core::{
    collate, expand_keys, Buffer, BufferConfig, FieldBatch, KiokuError, PrioritizedBuffer,
    PrioritizedBufferConfig, SampleKey, SampleMethod, Schema, Transition, WeightTree,
};
use log::warn;
use std::{marker::PhantomData, time::Duration};

/// Provenance of one sample drawn from a distributed buffer.
///
/// Carried in every [`DistributedBatch`] so that priority updates can be
/// routed to the shard owning each sampled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSource {
    /// Shard the record was drawn from.
    pub shard: usize,

    /// Slot index within that shard.
    pub index: usize,
}

/// Result of sampling a distributed buffer.
#[derive(Debug, Clone)]
pub struct DistributedBatch {
    /// Number of records actually selected.
    pub batch_size: usize,

    /// Extracted field batches, in key order.
    pub fields: Vec<(String, FieldBatch)>,

    /// Provenance of each sample, in batch order.
    pub sources: Vec<SampleSource>,

    /// Importance-sampling weights, present for prioritized sampling.
    pub weights: Option<Vec<f32>>,

    /// Shards that completed every request made to them.
    pub shards_consulted: usize,

    /// Shards the operation was addressed to.
    pub shards_total: usize,
}

impl DistributedBatch {
    /// Whether some shards were skipped while assembling this batch.
    pub fn is_degraded(&self) -> bool {
        self.shards_consulted < self.shards_total
    }

    /// Gets the batch of field `k`, if selected.
    pub fn field(&self, k: &str) -> Option<&FieldBatch> {
        self.fields
            .iter()
            .find(|(name, _)| name == k)
            .map(|(_, b)| b)
    }
}

/// Splits `n` draws over shards proportionally to their weights, by
/// largest-remainder apportionment. Zero-weight shards get nothing.
fn apportion(weights: &[f32], n: usize) -> Vec<usize> {
    let total: f32 = weights.iter().sum();
    debug_assert!(total > 0f32);

    let quotas: Vec<f32> = weights.iter().map(|w| w / total * n as f32).collect();
    let mut counts: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
    let mut assigned: usize = counts.iter().sum();

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = quotas[a] - quotas[a].floor();
        let fb = quotas[b] - quotas[b].floor();
        fb.partial_cmp(&fa).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut k = 0;
    while assigned < n {
        let ix = order[k % order.len()];
        if weights[ix] > 0f32 {
            counts[ix] += 1;
            assigned += 1;
        }
        k += 1;
    }
    counts
}

/// One logical buffer backed by independent shard workers.
///
/// Use the [`DistributedBuffer`] and [`DistributedPrioritizedBuffer`]
/// aliases; the `Impl` type carries the coordination logic shared by
/// both. Producers append through per-shard [`ShardWriter`]s; consumers
/// sample and clear through this coordinator.
pub struct DistributedBufferImpl<S: ShardStore> {
    /// Shard workers, indexed by shard id.
    shards: Vec<ShardHandle>,

    /// Reply deadline of every coordinator request.
    timeout: Duration,

    /// Writer batching size handed to [`ShardWriter`]s.
    n_buffer: usize,

    /// How global samples are assembled.
    strategy: SampleStrategy,

    /// How unresponsive shards are handled.
    failure_policy: FailurePolicy,

    phantom: PhantomData<S>,
}

/// Distributed buffer with uniform sampling.
pub type DistributedBuffer = DistributedBufferImpl<Buffer>;

/// Distributed buffer with priority-weighted sampling.
pub type DistributedPrioritizedBuffer = DistributedBufferImpl<PrioritizedBuffer>;

impl DistributedBufferImpl<Buffer> {
    /// Spawns `n_shards` uniform shard workers.
    pub fn build(config: &DistributedBufferConfig) -> Self {
        let stores = (0..config.n_shards)
            .map(|k| {
                Buffer::build(
                    &BufferConfig::default()
                        .capacity(config.shard_capacity)
                        .seed(config.seed + k as u64),
                )
            })
            .collect();
        Self::from_stores(stores, config)
    }
}

impl DistributedBufferImpl<PrioritizedBuffer> {
    /// Spawns `n_shards` prioritized shard workers.
    pub fn build(config: &DistributedPrioritizedBufferConfig) -> Self {
        let dist = &config.dist;
        let stores = (0..dist.n_shards)
            .map(|k| {
                PrioritizedBuffer::build(
                    &PrioritizedBufferConfig::default()
                        .capacity(dist.shard_capacity)
                        .seed(dist.seed + k as u64)
                        .per(config.per.clone()),
                )
            })
            .collect();
        Self::from_stores(stores, dist)
    }

    /// Rewrites the priorities of previously sampled records.
    ///
    /// Each update is routed to the shard named by its [`SampleSource`];
    /// shards that contributed no samples still receive an empty update so
    /// that every beta schedule advances in lockstep.
    ///
    /// # Errors
    ///
    /// * [`DistributedError::Core`] on length mismatch, an unknown shard
    ///   id, or a shard-side validation error.
    /// * [`DistributedError::PartialFailure`] if a shard misses the
    ///   deadline and the policy is [`FailurePolicy::Fail`]; under
    ///   [`FailurePolicy::Skip`] the miss is logged and the remaining
    ///   shards are still updated.
    pub fn update_priority(
        &self,
        sources: &[SampleSource],
        priorities: &[f32],
    ) -> Result<(), DistributedError> {
        if sources.len() != priorities.len() {
            return Err(KiokuError::InvalidArgument(format!(
                "{} sources but {} priorities",
                sources.len(),
                priorities.len()
            ))
            .into());
        }

        let total = self.shards.len();
        let mut grouped: Vec<(Vec<usize>, Vec<f32>)> = vec![(vec![], vec![]); total];
        for (source, &p) in sources.iter().zip(priorities.iter()) {
            let group = grouped.get_mut(source.shard).ok_or_else(|| {
                KiokuError::InvalidArgument(format!("unknown shard {}", source.shard))
            })?;
            group.0.push(source.index);
            group.1.push(p);
        }

        let mut pending = Vec::with_capacity(total);
        let mut failed = 0;
        for (shard, (ixs, ps)) in self.shards.iter().zip(grouped.into_iter()) {
            let (tx, rx) = bounded(1);
            let req = ShardRequest::UpdatePriority {
                ixs,
                priorities: ps,
                reply: tx,
            };
            if shard.sender.try_send(req).is_err() {
                warn!("Shard {} unreachable during priority update", shard.id);
                failed += 1;
                continue;
            }
            pending.push((shard.id, rx));
        }

        for (id, rx) in pending {
            match rx.recv_timeout(self.timeout) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!("Shard {} missed the priority-update deadline", id);
                    failed += 1;
                }
            }
        }

        if failed > 0 && self.failure_policy == FailurePolicy::Fail {
            return Err(DistributedError::PartialFailure {
                consulted: total - failed,
                total,
            });
        }
        Ok(())
    }
}

impl<S: ShardStore> DistributedBufferImpl<S> {
    /// Spawns one worker per caller-built store.
    ///
    /// [`DistributedBuffer::build`] and [`DistributedPrioritizedBuffer::build`]
    /// cover the common cases; this constructor takes custom
    /// [`ShardStore`] implementations.
    ///
    /// # Panics
    ///
    /// Panics if `stores` is empty.
    pub fn from_stores(stores: Vec<S>, config: &DistributedBufferConfig) -> Self {
        assert!(!stores.is_empty(), "at least one shard is required");
        let shards = stores
            .into_iter()
            .enumerate()
            .map(|(id, store)| spawn(id, store, config.channel_bound))
            .collect();
        Self {
            shards,
            timeout: Duration::from_millis(config.timeout_ms),
            n_buffer: config.n_buffer,
            strategy: config.strategy,
            failure_policy: config.failure_policy,
            phantom: PhantomData,
        }
    }

    /// Number of shard workers.
    pub fn n_shards(&self) -> usize {
        self.shards.len()
    }

    /// Creates a writer bound to shard `shard`.
    ///
    /// # Errors
    ///
    /// Returns [`DistributedError::Core`] if `shard` is out of range.
    pub fn writer(&self, shard: usize) -> Result<ShardWriter, DistributedError> {
        let handle = self
            .shards
            .get(shard)
            .ok_or_else(|| KiokuError::InvalidArgument(format!("unknown shard {}", shard)))?;
        Ok(ShardWriter::new(shard, handle.sender.clone(), self.n_buffer))
    }

    /// Queries every shard's stat, applying the failure policy.
    ///
    /// Returns the replies of responsive shards and the number of shards
    /// that failed.
    fn stats(&self) -> Result<(Vec<StatReply>, usize), DistributedError> {
        let total = self.shards.len();
        let mut pending = Vec::with_capacity(total);
        let mut failed = 0;

        for shard in &self.shards {
            let (tx, rx) = bounded(1);
            if shard.sender.try_send(ShardRequest::Stat(tx)).is_err() {
                warn!("Shard {} unreachable during stat query", shard.id);
                failed += 1;
                continue;
            }
            pending.push((shard.id, rx));
        }

        let mut replies = Vec::with_capacity(pending.len());
        for (id, rx) in pending {
            match rx.recv_timeout(self.timeout) {
                Ok(stat) => replies.push(stat),
                Err(_) => {
                    warn!("Shard {} missed the stat deadline", id);
                    failed += 1;
                }
            }
        }

        if failed > 0 && self.failure_policy == FailurePolicy::Fail {
            return Err(DistributedError::PartialFailure {
                consulted: total - failed,
                total,
            });
        }
        Ok((replies, failed))
    }

    /// Total number of records over all responsive shards.
    ///
    /// Under [`FailurePolicy::Skip`] a shard that misses the stat deadline
    /// is left out of the sum, so the count may run low while a shard is
    /// unreachable; each miss is logged.
    ///
    /// # Errors
    ///
    /// Returns [`DistributedError::PartialFailure`] on any miss under
    /// [`FailurePolicy::Fail`].
    pub fn len(&self) -> Result<usize, DistributedError> {
        let (stats, _) = self.stats()?;
        Ok(stats.iter().map(|s| s.size).sum())
    }

    /// Draws a batch from the global pool of records across all shards.
    ///
    /// The batch is assembled per the configured [`SampleStrategy`];
    /// [`SampleMethod::All`] collects every record of every responsive
    /// shard in shard order. Each returned sample carries its
    /// [`SampleSource`]; priority updates are routed through it.
    ///
    /// Skipped shards never silently shrink the result: the batch reports
    /// `shards_consulted` against `shards_total`, and
    /// [`is_degraded`](DistributedBatch::is_degraded) flags partial
    /// coverage.
    ///
    /// # Errors
    ///
    /// * [`KiokuError::EmptyBuffer`] (wrapped) if the responsive shards
    ///   hold no records.
    /// * [`DistributedError::PartialFailure`] if any shard fails and the
    ///   policy is [`FailurePolicy::Fail`], or if every shard fails.
    /// * [`DistributedError::Core`] for key or shape errors.
    pub fn sample_batch(
        &self,
        batch_size: usize,
        method: SampleMethod,
        concatenate: bool,
        sample_keys: Option<&[SampleKey]>,
    ) -> Result<DistributedBatch, DistributedError> {
        match self.strategy {
            SampleStrategy::ProportionalDispatch => {
                self.sample_proportional(batch_size, method, concatenate, sample_keys)
            }
            SampleStrategy::FullMirror => {
                self.sample_mirror(batch_size, method, concatenate, sample_keys)
            }
        }
    }

    fn sample_proportional(
        &self,
        batch_size: usize,
        method: SampleMethod,
        concatenate: bool,
        sample_keys: Option<&[SampleKey]>,
    ) -> Result<DistributedBatch, DistributedError> {
        let total = self.shards.len();
        let (stats, stat_failed) = self.stats()?;
        if stats.is_empty() {
            return Err(DistributedError::PartialFailure { consulted: 0, total });
        }

        let pool_weight: f32 = stats.iter().map(|s| s.weight).sum();
        if pool_weight <= 0f32 {
            return Err(KiokuError::EmptyBuffer.into());
        }

        // Dispatch plan: proportional counts for uniform draws, every
        // occupied shard for full collection.
        let plan: Vec<(usize, usize)> = match method {
            SampleMethod::Uniform => {
                let weights: Vec<f32> = stats.iter().map(|s| s.weight).collect();
                apportion(&weights, batch_size)
                    .into_iter()
                    .zip(stats.iter())
                    .filter(|(n, _)| *n > 0)
                    .map(|(n, s)| (s.shard, n))
                    .collect()
            }
            SampleMethod::All => stats
                .iter()
                .filter(|s| s.size > 0)
                .map(|s| (s.shard, 0))
                .collect(),
        };

        let mut pending = Vec::with_capacity(plan.len());
        let mut sample_failed = 0;
        for (shard_id, n) in plan {
            let (tx, rx) = bounded(1);
            let req = ShardRequest::Sample {
                n,
                method,
                reply: tx,
            };
            if self.shards[shard_id].sender.try_send(req).is_err() {
                warn!("Shard {} unreachable during sample dispatch", shard_id);
                sample_failed += 1;
                continue;
            }
            pending.push((shard_id, rx));
        }

        let mut contributions: Vec<SampleReply> = Vec::with_capacity(pending.len());
        for (id, rx) in pending {
            match rx.recv_timeout(self.timeout) {
                Ok(Ok(reply)) => contributions.push(reply),
                Ok(Err(e)) => {
                    // The shard's stat went stale, e.g. a concurrent clear.
                    warn!("Shard {} could not serve its sub-sample: {}", id, e);
                    sample_failed += 1;
                }
                Err(_) => {
                    warn!("Shard {} missed the sample deadline", id);
                    sample_failed += 1;
                }
            }
        }

        let failed = stat_failed + sample_failed;
        if failed > 0 && self.failure_policy == FailurePolicy::Fail {
            return Err(DistributedError::PartialFailure {
                consulted: total - failed,
                total,
            });
        }
        if contributions.is_empty() && batch_size > 0 {
            return Err(DistributedError::PartialFailure {
                consulted: total - failed,
                total,
            });
        }

        let mut records: Vec<Transition> = Vec::new();
        let mut sources: Vec<SampleSource> = Vec::new();
        let mut weights: Vec<f32> = Vec::new();
        let mut any_weights = false;
        for reply in contributions {
            for (&index, record) in reply.indices.iter().zip(reply.records.into_iter()) {
                records.push(record);
                sources.push(SampleSource {
                    shard: reply.shard,
                    index,
                });
            }
            if let Some(ws) = reply.weights {
                any_weights = true;
                weights.extend(ws);
            }
        }

        // Each shard normalized its own sub-batch; renormalize globally
        // so the batch maximum is 1 again.
        let weights = if any_weights {
            let w_max = weights.iter().fold(f32::MIN, |m, &v| v.max(m));
            Some(weights.iter().map(|w| w / w_max).collect())
        } else {
            None
        };

        let fields = self.collate_records(&records, sample_keys, concatenate)?;
        Ok(DistributedBatch {
            batch_size: records.len(),
            fields,
            sources,
            weights,
            shards_consulted: total - failed,
            shards_total: total,
        })
    }

    fn sample_mirror(
        &self,
        batch_size: usize,
        method: SampleMethod,
        concatenate: bool,
        sample_keys: Option<&[SampleKey]>,
    ) -> Result<DistributedBatch, DistributedError> {
        let total = self.shards.len();
        let mut pending = Vec::with_capacity(total);
        let mut failed = 0;

        for shard in &self.shards {
            let (tx, rx) = bounded(1);
            if shard.sender.try_send(ShardRequest::Snapshot(tx)).is_err() {
                warn!("Shard {} unreachable during snapshot", shard.id);
                failed += 1;
                continue;
            }
            pending.push((shard.id, rx));
        }

        let mut snapshots: Vec<SnapshotReply> = Vec::with_capacity(pending.len());
        for (id, rx) in pending {
            match rx.recv_timeout(self.timeout) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(_) => {
                    warn!("Shard {} missed the snapshot deadline", id);
                    failed += 1;
                }
            }
        }

        if failed > 0 && self.failure_policy == FailurePolicy::Fail {
            return Err(DistributedError::PartialFailure {
                consulted: total - failed,
                total,
            });
        }
        if snapshots.is_empty() {
            return Err(DistributedError::PartialFailure {
                consulted: total - failed,
                total,
            });
        }

        // Merged pool, insertion order per shard.
        let mut pool: Vec<(SampleSource, Transition)> = Vec::new();
        let mut pool_weights: Vec<f32> = Vec::new();
        let mut prioritized = false;
        let mut beta = 1f32;
        for snapshot in snapshots {
            if let Some(b) = snapshot.beta {
                beta = b;
            }
            if let Some(ws) = &snapshot.weights {
                prioritized = true;
                pool_weights.extend(ws.iter().copied());
            }
            for (&index, record) in snapshot.indices.iter().zip(snapshot.records.into_iter()) {
                pool.push((
                    SampleSource {
                        shard: snapshot.shard,
                        index,
                    },
                    record,
                ));
            }
        }
        if pool.is_empty() {
            return Err(KiokuError::EmptyBuffer.into());
        }

        let (picks, weights) = match method {
            SampleMethod::All => ((0..pool.len()).collect::<Vec<_>>(), None),
            SampleMethod::Uniform if prioritized => {
                // Weighted draw over the merged pool; importance weights
                // are exact here since the whole pool is visible.
                let mut tree = WeightTree::new(pool.len())?;
                for (k, &w) in pool_weights.iter().enumerate() {
                    tree.update(k, w)?;
                }
                let picks = tree.sample(batch_size)?;
                let pool_total = tree.total_weight();
                let n = pool.len() as f32;
                let ws: Vec<f32> = picks
                    .iter()
                    .map(|&k| (n * pool_weights[k] / pool_total).powf(-beta))
                    .collect();
                let w_max = ws.iter().fold(f32::MIN, |m, &v| v.max(m));
                (picks, Some(ws.iter().map(|w| w / w_max).collect()))
            }
            SampleMethod::Uniform => {
                let picks = (0..batch_size)
                    .map(|_| fastrand::usize(..pool.len()))
                    .collect();
                (picks, None)
            }
        };

        let records: Vec<Transition> = picks.iter().map(|&k| pool[k].1.clone()).collect();
        let sources: Vec<SampleSource> = picks.iter().map(|&k| pool[k].0).collect();

        let fields = self.collate_records(&records, sample_keys, concatenate)?;
        Ok(DistributedBatch {
            batch_size: records.len(),
            fields,
            sources,
            weights,
            shards_consulted: total - failed,
            shards_total: total,
        })
    }

    fn collate_records(
        &self,
        records: &[Transition],
        sample_keys: Option<&[SampleKey]>,
        concatenate: bool,
    ) -> Result<Vec<(String, FieldBatch)>, KiokuError> {
        if records.is_empty() {
            return Ok(vec![]);
        }
        let schema = Schema::infer(&records[0])?;
        let keys = expand_keys(&schema, sample_keys)?;
        let refs: Vec<&Transition> = records.iter().collect();
        collate(&refs, &keys, concatenate)
    }

    /// Broadcasts one control request to all shards and collects acks.
    ///
    /// Returns the number of shards that failed to ack in time.
    fn broadcast_ack<F>(&self, make_req: F) -> usize
    where
        F: Fn(crossbeam_channel::Sender<()>) -> ShardRequest,
    {
        let mut pending: Vec<(usize, Receiver<()>)> = Vec::with_capacity(self.shards.len());
        let mut failed = 0;
        for shard in &self.shards {
            let (tx, rx) = bounded(1);
            if shard.sender.try_send(make_req(tx)).is_err() {
                failed += 1;
                continue;
            }
            pending.push((shard.id, rx));
        }
        for (id, rx) in pending {
            if rx.recv_timeout(self.timeout).is_err() {
                warn!("Shard {} missed a control deadline", id);
                failed += 1;
            }
        }
        failed
    }

    /// Resets all shards behind a barrier.
    ///
    /// Runs the two-phase protocol: pause appends on every shard, clear
    /// every shard, resume. A paused shard drops incoming appends, so no
    /// write can land between the pause and the clear, and per-shard
    /// request serialization keeps samples from interleaving with either
    /// phase.
    ///
    /// # Errors
    ///
    /// Returns [`DistributedError::PartialFailure`] if any shard misses
    /// an ack, regardless of the failure policy. Shards that did pause are
    /// resumed before the error returns.
    pub fn clear(&self) -> Result<(), DistributedError> {
        let total = self.shards.len();

        let failed = self.broadcast_ack(ShardRequest::Pause);
        if failed > 0 {
            self.broadcast_ack(ShardRequest::Resume);
            return Err(DistributedError::PartialFailure {
                consulted: total - failed,
                total,
            });
        }

        let failed = self.broadcast_ack(ShardRequest::Clear);
        if failed > 0 {
            self.broadcast_ack(ShardRequest::Resume);
            return Err(DistributedError::PartialFailure {
                consulted: total - failed,
                total,
            });
        }

        let failed = self.broadcast_ack(ShardRequest::Resume);
        if failed > 0 {
            return Err(DistributedError::PartialFailure {
                consulted: total - failed,
                total,
            });
        }
        Ok(())
    }

    /// Stops all shard workers and waits for them to finish.
    pub fn stop_and_join(self) {
        for shard in &self.shards {
            let _ = shard.sender.try_send(ShardRequest::Stop);
        }
        for shard in self.shards {
            let _ = shard.thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::apportion;

    #[test]
    fn test_apportion_proportional() {
        assert_eq!(apportion(&[1.0, 1.0], 4), vec![2, 2]);
        assert_eq!(apportion(&[3.0, 1.0], 4), vec![3, 1]);
    }

    #[test]
    fn test_apportion_empty_shard_gets_nothing() {
        // One shard holds everything: it serves the whole batch.
        assert_eq!(apportion(&[2.0, 0.0], 4), vec![4, 0]);
        assert_eq!(apportion(&[0.0, 0.0, 5.0], 7), vec![0, 0, 7]);
    }

    #[test]
    fn test_apportion_remainder_by_largest_fraction() {
        // Quotas 2.5 / 1.67 / 0.83: floors give 2/1/0, remainder goes to
        // the largest fractional parts first.
        let counts = apportion(&[3.0, 2.0, 1.0], 5);
        assert_eq!(counts.iter().sum::<usize>(), 5);
        assert_eq!(counts, vec![2, 2, 1]);
    }

    #[test]
    fn test_apportion_total_preserved() {
        for n in 0..50 {
            let counts = apportion(&[0.3, 2.2, 0.0, 7.5], n);
            assert_eq!(counts.iter().sum::<usize>(), n);
            assert_eq!(counts[2], 0);
        }
    }
}
