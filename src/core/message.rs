//! Per-destination message buffering with one-superstep delivery delay.
//!
//! The router keeps two queue generations. Compute calls only ever append
//! to `outbound` and only ever consume from `inbound`; the barrier promotes
//! one to the other. A message can therefore never be observed in the
//! superstep it was sent in.

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

use super::vertex::{Data, VertexId};

pub struct MessageRouter<I: VertexId, M: Data> {
    inbound: DashMap<I, Vec<M>, FxBuildHasher>,
    outbound: DashMap<I, Vec<M>, FxBuildHasher>,
}

impl<I: VertexId, M: Data> Default for MessageRouter<I, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: VertexId, M: Data> MessageRouter<I, M> {
    pub fn new() -> Self {
        Self {
            inbound: DashMap::with_hasher(FxBuildHasher::default()),
            outbound: DashMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Buffers `payload` for delivery to `destination` next superstep.
    /// Callable concurrently from compute threads.
    pub fn send(&self, destination: I, payload: M) {
        self.outbound.entry(destination).or_default().push(payload);
    }

    /// Removes and returns the messages delivered to `destination` this
    /// superstep. Each destination's queue is consumed at most once.
    pub fn take(&self, destination: &I) -> Option<Vec<M>> {
        self.inbound.remove(destination).map(|(_, msgs)| msgs)
    }

    /// Ids with messages pending delivery this superstep.
    pub fn inbound_destinations(&self) -> Vec<I> {
        self.inbound.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of messages waiting in the inbound generation.
    pub fn pending_count(&self) -> usize {
        self.inbound.iter().map(|entry| entry.value().len()).sum()
    }

    /// Drops whatever is left in the inbound generation; after a full
    /// superstep pass these address vertices no partition holds. Returns the
    /// dropped message count.
    pub(crate) fn drain_undeliverable(&self) -> usize {
        let dropped = self.pending_count();
        self.inbound.clear();
        dropped
    }

    /// The barrier: outbound queues of superstep S become the inbound queues
    /// of S+1; the new outbound generation starts empty.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.inbound, &mut self.outbound);
        self.outbound.clear();
    }
}
