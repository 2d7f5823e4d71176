//! Shard worker threads.
//!
//! Each shard owns a private store and serves requests from a single
//! channel, one at a time. That per-shard serialization is the mutual
//! exclusion boundary of the whole subsystem: a clear can never interleave
//! with a sample on the same shard, and samples always observe a
//! consistent (slot array, weight tree) snapshot.

use crate::{
    messages::{SampleReply, ShardRequest, SnapshotReply, StatReply},
    store::ShardStore,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};
use std::thread::JoinHandle;

/// Coordinator-side handle of one shard worker.
pub(crate) struct ShardHandle {
    /// Identifier of the shard.
    pub id: usize,

    /// Request queue of the worker.
    pub sender: Sender<ShardRequest>,

    /// Worker thread, joined on shutdown.
    pub thread: JoinHandle<()>,
}

/// Spawns a worker thread owning `store`.
pub(crate) fn spawn<S: ShardStore>(id: usize, store: S, channel_bound: usize) -> ShardHandle {
    let (sender, receiver) = bounded(channel_bound);
    let thread = std::thread::spawn(move || run_loop(id, store, receiver));
    ShardHandle { id, sender, thread }
}

/// Request loop of one shard worker.
fn run_loop<S: ShardStore>(id: usize, mut store: S, receiver: Receiver<ShardRequest>) {
    let mut paused = false;
    info!("Started shard {}", id);

    loop {
        let req = match receiver.recv() {
            Ok(req) => req,
            // All senders are gone; the coordinator was dropped.
            Err(_) => break,
        };

        match req {
            ShardRequest::Append(items) => {
                if paused {
                    warn!("Shard {} dropped {} appends while paused", id, items.len());
                    continue;
                }
                for (record, priority) in items {
                    if let Err(e) = store.append(record, priority) {
                        warn!("Shard {} rejected an append: {}", id, e);
                    }
                }
            }
            ShardRequest::Stat(reply) => {
                let _ = reply.send(StatReply {
                    shard: id,
                    size: store.size(),
                    weight: store.sampling_weight(),
                });
            }
            ShardRequest::Sample { n, method, reply } => {
                let res = store.sample(n, method).map(|(indices, weights)| SampleReply {
                    shard: id,
                    records: store.records_at(&indices),
                    indices,
                    weights,
                });
                let _ = reply.send(res);
            }
            ShardRequest::Snapshot(reply) => {
                let (indices, records, weights) = store.snapshot();
                let _ = reply.send(SnapshotReply {
                    shard: id,
                    indices,
                    records,
                    weights,
                    beta: store.beta(),
                });
            }
            ShardRequest::UpdatePriority {
                ixs,
                priorities,
                reply,
            } => {
                let _ = reply.send(store.update_priority(&ixs, &priorities));
            }
            ShardRequest::Pause(reply) => {
                paused = true;
                let _ = reply.send(());
            }
            ShardRequest::Clear(reply) => {
                store.clear();
                let _ = reply.send(());
            }
            ShardRequest::Resume(reply) => {
                paused = false;
                let _ = reply.send(());
            }
            ShardRequest::Stop => break,
        }
    }
    info!("Stopped shard {}", id);
}
