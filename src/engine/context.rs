//! The capability surface a vertex compute call runs against.

use crate::core::agg::{AggValue, AggregatorPartials, AggregatorSet};
use crate::core::errors::ComputeError;
use crate::core::message::MessageRouter;
use crate::core::vertex::{Data, Edge, VertexId, VertexRecord};

/// The inbound messages for one compute invocation. Consumed once, not
/// restartable; ordering within the batch carries no meaning.
pub struct Messages<M> {
    inner: std::vec::IntoIter<M>,
}

impl<M> Messages<M> {
    pub(crate) fn new(messages: Vec<M>) -> Self {
        Self {
            inner: messages.into_iter(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

impl<M> Iterator for Messages<M> {
    type Item = M;

    fn next(&mut self) -> Option<M> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<M> ExactSizeIterator for Messages<M> {}

/// Everything a user algorithm may do from inside `compute`: read and write
/// its own vertex, mutate its edges, buffer messages for the next
/// superstep, contribute to aggregators and vote to halt.
///
/// The context borrows the record exclusively, so all mutation of a vertex
/// flows through the one compute invocation it is legal in.
pub struct VertexContext<'a, I: VertexId, V: Data, E: Data, M: Data> {
    superstep: u64,
    record: &'a mut VertexRecord<I, V, E>,
    router: &'a MessageRouter<I, M>,
    aggregators: &'a AggregatorSet<I>,
    partials: &'a mut AggregatorPartials<I>,
}

impl<'a, I: VertexId, V: Data, E: Data, M: Data> VertexContext<'a, I, V, E, M> {
    pub(crate) fn new(
        superstep: u64,
        record: &'a mut VertexRecord<I, V, E>,
        router: &'a MessageRouter<I, M>,
        aggregators: &'a AggregatorSet<I>,
        partials: &'a mut AggregatorPartials<I>,
    ) -> Self {
        Self {
            superstep,
            record,
            router,
            aggregators,
            partials,
        }
    }

    /// The current superstep number, starting at 0.
    pub fn superstep(&self) -> u64 {
        self.superstep
    }

    pub fn id(&self) -> &I {
        self.record.id()
    }

    pub fn value(&self) -> &V {
        self.record.value()
    }

    pub fn value_mut(&mut self) -> &mut V {
        self.record.value_mut()
    }

    pub fn set_value(&mut self, value: V) {
        self.record.set_value(value);
    }

    pub fn edges(&self) -> &[Edge<I, E>] {
        self.record.edges()
    }

    pub fn num_edges(&self) -> usize {
        self.record.num_edges()
    }

    pub fn edge_value(&self, target: &I) -> Option<&E> {
        self.record.edge_value(target)
    }

    pub fn add_edge(&mut self, target: I, value: E) {
        self.record.add_edge(target, value);
    }

    pub fn set_edge_value(&mut self, target: &I, value: E) -> bool {
        self.record.set_edge_value(target, value)
    }

    /// Buffers a message for `destination`; it arrives next superstep.
    pub fn send_message(&mut self, destination: I, payload: M) {
        self.router.send(destination, payload);
    }

    /// Sends `payload` to the target of every outgoing edge.
    pub fn send_to_all_edges(&mut self, payload: M) {
        for edge in self.record.edges() {
            self.router.send(edge.target().clone(), payload.clone());
        }
    }

    /// Declares this vertex done absent new messages. Idempotent; a message
    /// arriving in a later superstep reactivates the vertex.
    pub fn vote_to_halt(&mut self) {
        self.record.vote_to_halt();
    }

    /// Contributes `value` to the named aggregator's partial for this
    /// superstep.
    pub fn aggregate(&mut self, name: &str, value: AggValue<I>) -> Result<(), ComputeError> {
        self.partials.aggregate(self.aggregators, name, value)
    }

    /// The named aggregator's value as merged at the last barrier. Never
    /// reflects contributions made during the current superstep.
    pub fn read_aggregate(&self, name: &str) -> Option<AggValue<I>> {
        self.aggregators.read(name)
    }
}
