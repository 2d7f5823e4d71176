use kioku_core::{
    BatchValue, Buffer, BufferConfig, FieldBatch, FieldValue, KiokuError, PerConfig, SampleMethod,
    Transition,
};
use kioku_distributed::{
    DistributedBuffer, DistributedBufferConfig, DistributedBufferImpl, DistributedError,
    DistributedPrioritizedBuffer, DistributedPrioritizedBufferConfig, SampleSource, SampleStrategy,
    ShardStore,
};
use std::time::Duration;
use test_log::test;

fn record(v: f32) -> Transition {
    Transition::from_slice(&[
        ("obs", FieldValue::Array1(vec![v, v + 0.5])),
        ("action", FieldValue::Scalar(v)),
    ])
}

fn uniform_config() -> DistributedBufferConfig {
    DistributedBufferConfig::default()
        .n_shards(2)
        .shard_capacity(8)
        .timeout_ms(5000)
}

fn prioritized_config() -> DistributedPrioritizedBufferConfig {
    DistributedPrioritizedBufferConfig::default()
        .dist(uniform_config())
        .per(PerConfig::default().alpha(1.0).eps(0.0))
}

fn fill(buffer: &DistributedBuffer, shard: usize, values: &[f32]) {
    let mut writer = buffer.writer(shard).unwrap();
    for &v in values {
        writer.append(record(v)).unwrap();
    }
    writer.flush().unwrap();
}

#[test]
fn test_sampling_skips_empty_shards() {
    // One shard holds everything, the other is empty. The whole batch
    // comes from the occupied shard and the result is not degraded.
    let buffer = DistributedBuffer::build(&uniform_config().shard_capacity(2));
    fill(&buffer, 0, &[1.0, 2.0]);

    let batch = buffer
        .sample_batch(4, SampleMethod::Uniform, true, None)
        .unwrap();
    assert_eq!(batch.batch_size, 4);
    assert!(!batch.is_degraded());
    assert!(batch.sources.iter().all(|s| s.shard == 0));

    buffer.stop_and_join();
}

#[test]
fn test_all_collects_every_shard() {
    let buffer = DistributedBuffer::build(&uniform_config());
    fill(&buffer, 0, &[1.0, 2.0, 3.0]);
    fill(&buffer, 1, &[4.0, 5.0]);

    assert_eq!(buffer.len().unwrap(), 5);

    let batch = buffer
        .sample_batch(0, SampleMethod::All, true, None)
        .unwrap();
    assert_eq!(batch.batch_size, 5);
    assert_eq!(batch.sources.iter().filter(|s| s.shard == 0).count(), 3);
    assert_eq!(batch.sources.iter().filter(|s| s.shard == 1).count(), 2);

    // Within a shard, full collection preserves insertion order.
    match batch.field("action").unwrap() {
        FieldBatch::Stacked(BatchValue::Array1(data)) => {
            let shard0: Vec<f32> = batch
                .sources
                .iter()
                .zip(data.iter())
                .filter(|(s, _)| s.shard == 0)
                .map(|(_, &v)| v)
                .collect();
            assert_eq!(shard0, vec![1.0, 2.0, 3.0]);
        }
        other => panic!("unexpected batch: {:?}", other),
    }

    buffer.stop_and_join();
}

#[test]
fn test_empty_buffer_sampling_fails() {
    let buffer = DistributedBuffer::build(&uniform_config());
    let res = buffer.sample_batch(4, SampleMethod::Uniform, true, None);
    assert!(matches!(
        res,
        Err(DistributedError::Core(KiokuError::EmptyBuffer))
    ));
    buffer.stop_and_join();
}

#[test]
fn test_clear_then_sample_fails() {
    let buffer = DistributedBuffer::build(&uniform_config());
    fill(&buffer, 0, &[1.0, 2.0]);
    fill(&buffer, 1, &[3.0]);
    assert_eq!(buffer.len().unwrap(), 3);

    buffer.clear().unwrap();
    assert_eq!(buffer.len().unwrap(), 0);

    let res = buffer.sample_batch(2, SampleMethod::Uniform, true, None);
    assert!(matches!(
        res,
        Err(DistributedError::Core(KiokuError::EmptyBuffer))
    ));
    buffer.stop_and_join();
}

#[test]
fn test_writes_invisible_until_flushed() {
    let mut config = uniform_config();
    config.n_buffer = 16;
    let buffer = DistributedBuffer::build(&config);

    let mut writer = buffer.writer(0).unwrap();
    for k in 0..4 {
        writer.append(record(k as f32)).unwrap();
    }
    assert_eq!(buffer.len().unwrap(), 0);

    writer.flush().unwrap();
    assert_eq!(buffer.len().unwrap(), 4);

    buffer.stop_and_join();
}

#[test]
fn test_full_mirror_collects_whole_pool() {
    let buffer = DistributedBuffer::build(
        &uniform_config().strategy(SampleStrategy::FullMirror),
    );
    fill(&buffer, 0, &[1.0, 2.0]);
    fill(&buffer, 1, &[3.0, 4.0, 5.0]);

    let batch = buffer
        .sample_batch(0, SampleMethod::All, true, None)
        .unwrap();
    assert_eq!(batch.batch_size, 5);

    let batch = buffer
        .sample_batch(8, SampleMethod::Uniform, true, None)
        .unwrap();
    assert_eq!(batch.batch_size, 8);
    assert!(batch.weights.is_none());

    buffer.stop_and_join();
}

#[test]
fn test_prioritized_weights_normalized() {
    let buffer = DistributedPrioritizedBuffer::build(&prioritized_config());
    for shard in 0..2 {
        let mut writer = buffer.writer(shard).unwrap();
        for k in 0..4 {
            writer
                .append_with_priority(record(k as f32), 1.0 + k as f32)
                .unwrap();
        }
        writer.flush().unwrap();
    }

    let batch = buffer
        .sample_batch(16, SampleMethod::Uniform, true, None)
        .unwrap();
    assert_eq!(batch.batch_size, 16);

    let weights = batch.weights.as_ref().unwrap();
    assert_eq!(weights.len(), 16);
    let w_max = weights.iter().fold(f32::MIN, |m, &v| v.max(m));
    assert!((w_max - 1.0).abs() < 1e-6);
    assert!(weights.iter().all(|&w| w > 0.0 && w <= 1.0 + 1e-6));

    buffer.stop_and_join();
}

#[test]
fn test_priority_updates_route_by_provenance() {
    let buffer = DistributedPrioritizedBuffer::build(&prioritized_config());
    for shard in 0..2 {
        let mut writer = buffer.writer(shard).unwrap();
        for k in 0..4 {
            writer.append_with_priority(record(k as f32), 1.0).unwrap();
        }
        writer.flush().unwrap();
    }

    let batch = buffer
        .sample_batch(8, SampleMethod::Uniform, true, None)
        .unwrap();
    let priorities = vec![2.0; batch.sources.len()];
    buffer
        .update_priority(&batch.sources, &priorities)
        .unwrap();

    // Concentrate nearly all weight on one record of shard 1 and check
    // sampling follows it.
    let hot = SampleSource { shard: 1, index: 2 };
    buffer.update_priority(&[hot], &[10_000.0]).unwrap();

    let batch = buffer
        .sample_batch(200, SampleMethod::Uniform, true, None)
        .unwrap();
    let hits = batch.sources.iter().filter(|&&s| s == hot).count();
    assert!(hits > 180, "hot record sampled {} times of 200", hits);

    buffer.stop_and_join();
}

#[test]
fn test_priority_update_rejects_bad_input() {
    let buffer = DistributedPrioritizedBuffer::build(&prioritized_config());
    let mut writer = buffer.writer(0).unwrap();
    writer.append(record(1.0)).unwrap();
    writer.flush().unwrap();

    // Length mismatch.
    let res = buffer.update_priority(&[SampleSource { shard: 0, index: 0 }], &[1.0, 2.0]);
    assert!(matches!(res, Err(DistributedError::Core(_))));

    // Unknown shard.
    let res = buffer.update_priority(&[SampleSource { shard: 9, index: 0 }], &[1.0]);
    assert!(matches!(res, Err(DistributedError::Core(_))));

    // Out-of-range slot on an existing shard.
    let res = buffer.update_priority(&[SampleSource { shard: 0, index: 7 }], &[1.0]);
    assert!(matches!(res, Err(DistributedError::Core(_))));

    buffer.stop_and_join();
}

#[test]
fn test_uniform_writer_rejects_priorities_on_arrival() {
    // Priorities sent to a uniform shard are rejected by the worker and
    // logged, never stored.
    let buffer = DistributedBuffer::build(&uniform_config());
    let mut writer = buffer.writer(0).unwrap();
    writer.append_with_priority(record(1.0), 3.0).unwrap();
    writer.flush().unwrap();

    assert_eq!(buffer.len().unwrap(), 0);
    buffer.stop_and_join();
}

/// A store that stalls stat queries, standing in for a shard behind a dead
/// or congested link.
struct StallingStore {
    inner: Buffer,
    stall: Duration,
}

impl ShardStore for StallingStore {
    type Config = BufferConfig;

    fn build(config: &Self::Config) -> Self {
        Self {
            inner: Buffer::build(config),
            stall: Duration::from_secs(0),
        }
    }

    fn append(
        &mut self,
        record: Transition,
        priority: Option<f32>,
    ) -> Result<usize, KiokuError> {
        ShardStore::append(&mut self.inner, record, priority)
    }

    fn sample(
        &mut self,
        n: usize,
        method: SampleMethod,
    ) -> Result<(Vec<usize>, Option<Vec<f32>>), KiokuError> {
        ShardStore::sample(&mut self.inner, n, method)
    }

    fn records_at(&self, ixs: &[usize]) -> Vec<Transition> {
        ShardStore::records_at(&self.inner, ixs)
    }

    fn snapshot(&self) -> (Vec<usize>, Vec<Transition>, Option<Vec<f32>>) {
        ShardStore::snapshot(&self.inner)
    }

    fn update_priority(&mut self, ixs: &[usize], priorities: &[f32]) -> Result<(), KiokuError> {
        ShardStore::update_priority(&mut self.inner, ixs, priorities)
    }

    fn clear(&mut self) {
        ShardStore::clear(&mut self.inner)
    }

    fn size(&self) -> usize {
        ShardStore::size(&self.inner)
    }

    fn sampling_weight(&self) -> f32 {
        std::thread::sleep(self.stall);
        ShardStore::sampling_weight(&self.inner)
    }
}

#[test]
fn test_unresponsive_shard_degrades_batch() {
    // Shard 1 misses the stat deadline; under the default Skip policy the
    // batch comes from shard 0 and is flagged degraded.
    let config = uniform_config().timeout_ms(100);
    let stores = vec![
        StallingStore {
            inner: Buffer::build(&BufferConfig::default().capacity(8)),
            stall: Duration::from_secs(0),
        },
        StallingStore {
            inner: Buffer::build(&BufferConfig::default().capacity(8)),
            stall: Duration::from_millis(500),
        },
    ];
    let buffer = DistributedBufferImpl::from_stores(stores, &config);

    let mut writer = buffer.writer(0).unwrap();
    for k in 0..4 {
        writer.append(record(k as f32)).unwrap();
    }
    writer.flush().unwrap();

    let batch = buffer
        .sample_batch(4, SampleMethod::Uniform, true, None)
        .unwrap();
    assert_eq!(batch.batch_size, 4);
    assert!(batch.is_degraded());
    assert_eq!(batch.shards_consulted, 1);
    assert_eq!(batch.shards_total, 2);
    assert!(batch.sources.iter().all(|s| s.shard == 0));

    buffer.stop_and_join();
}

#[test]
fn test_sample_keys_select_fields() {
    use kioku_core::SampleKey;

    let buffer = DistributedBuffer::build(&uniform_config());
    fill(&buffer, 0, &[1.0, 2.0]);

    let keys = vec![SampleKey::named("action")];
    let batch = buffer
        .sample_batch(2, SampleMethod::Uniform, true, Some(&keys))
        .unwrap();
    assert_eq!(batch.fields.len(), 1);
    assert!(batch.field("action").is_some());
    assert!(batch.field("obs").is_none());

    buffer.stop_and_join();
}
