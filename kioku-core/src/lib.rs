#![warn(missing_docs)]
//! Experience replay buffers for reinforcement learning.
//!
//! This crate provides the single-process storage and sampling primitives:
//!
//! * [`Transition`]: a field-keyed record of one agent-environment step,
//!   schema-checked against the first record appended to a buffer.
//! * [`WeightTree`]: a binary sum tree with O(log n) weight updates and
//!   weighted random sampling.
//! * [`Buffer`]: a fixed-capacity ring store with uniform sampling and
//!   FIFO eviction.
//! * [`PrioritizedBuffer`]: priority-weighted sampling with
//!   importance-sampling weights and an annealed exponent.
//!
//! The distributed, sharded variants live in the `kioku-distributed`
//! crate. Learners interact with buffers through `append`,
//! `sample_batch`, `update_priority` and `clear`; everything about losses,
//! gradients and optimizers is out of scope here.

mod batch;
mod buffer;
mod config;
mod error;
mod prioritized;
mod transition;
mod weight_tree;

pub use batch::{
    collate, expand_keys, BatchValue, FieldBatch, SampleKey, SampleMethod, SampledBatch,
};
pub use buffer::Buffer;
pub use config::{BufferConfig, PerConfig, PrioritizedBufferConfig, WeightNormalizer};
pub use error::KiokuError;
pub use prioritized::{IwScheduler, PrioritizedBuffer};
pub use transition::{FieldKind, FieldValue, Schema, Transition};
pub use weight_tree::WeightTree;
