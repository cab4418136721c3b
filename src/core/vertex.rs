//! The atomic unit of graph state: a vertex record with its id, value and
//! outgoing edge list.
//!
//! Records are owned exclusively by the partition store that holds them and
//! are only mutated from inside that vertex's compute invocation for the
//! current superstep. The `active` flag implements vote-to-halt: it flips
//! off when the vertex votes and back on when a message arrives for it in a
//! later superstep.

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Blanket trait for vertex ids: opaque, totally ordered, hashable values.
pub trait VertexId:
    Eq + Ord + Hash + Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> VertexId for T where
    T: Eq + Ord + Hash + Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Blanket trait for vertex values, edge values and message payloads.
pub trait Data: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Data for T where T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A directed edge to `target`. Multiple edges to the same target are
/// permitted; algorithms that need uniqueness enforce it themselves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge<I, E> {
    pub(crate) target: I,
    pub(crate) value: E,
}

impl<I, E> Edge<I, E> {
    pub fn new(target: I, value: E) -> Self {
        Self { target, value }
    }

    pub fn target(&self) -> &I {
        &self.target
    }

    pub fn value(&self) -> &E {
        &self.value
    }
}

/// One vertex's state: id, value and ordered outgoing edge list.
///
/// Constructed through [`VertexRecord::new`] with all fields supplied; a
/// fresh record is always active.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexRecord<I, V, E> {
    pub(crate) id: I,
    pub(crate) value: V,
    pub(crate) edges: Vec<Edge<I, E>>,
    pub(crate) active: bool,
}

impl<I: VertexId, V: Data, E: Data> VertexRecord<I, V, E> {
    pub fn new(id: I, value: V, edges: Vec<Edge<I, E>>) -> Self {
        Self {
            id,
            value,
            edges,
            active: true,
        }
    }

    pub fn id(&self) -> &I {
        &self.id
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn set_value(&mut self, value: V) {
        self.value = value;
    }

    pub fn edges(&self) -> &[Edge<I, E>] {
        &self.edges
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Value of the first edge to `target`, if any edge to it exists.
    pub fn edge_value(&self, target: &I) -> Option<&E> {
        self.edges
            .iter()
            .find(|e| &e.target == target)
            .map(|e| &e.value)
    }

    /// Appends a new outgoing edge.
    pub fn add_edge(&mut self, target: I, value: E) {
        self.edges.push(Edge::new(target, value));
    }

    /// Overwrites the value of the first edge to `target`. Returns `false`
    /// if no such edge exists.
    pub fn set_edge_value(&mut self, target: &I, value: E) -> bool {
        match self.edges.iter_mut().find(|e| &e.target == target) {
            Some(edge) => {
                edge.value = value;
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Declares this vertex inactive absent new messages. Idempotent.
    pub fn vote_to_halt(&mut self) {
        self.active = false;
    }

    /// Called when a message is delivered to a halted vertex.
    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn into_parts(self) -> (I, V, Vec<Edge<I, E>>) {
        (self.id, self.value, self.edges)
    }
}

#[cfg(test)]
mod vertex_tests {
    use super::*;

    fn record() -> VertexRecord<u64, i64, ()> {
        VertexRecord::new(1, 0, vec![Edge::new(2, ()), Edge::new(3, ())])
    }

    #[test]
    fn fresh_records_are_active() {
        assert!(record().is_active());
    }

    #[test]
    fn vote_to_halt_is_idempotent() {
        let mut v = record();
        v.vote_to_halt();
        let halted_once = v.clone();
        v.vote_to_halt();
        assert_eq!(v, halted_once);
        assert!(!v.is_active());
    }

    #[test]
    fn message_arrival_reactivates() {
        let mut v = record();
        v.vote_to_halt();
        v.activate();
        assert!(v.is_active());
    }

    #[test]
    fn edge_lookup_and_mutation() {
        let mut v: VertexRecord<u64, i64, f32> =
            VertexRecord::new(1, 0, vec![Edge::new(2, 1.0), Edge::new(3, 2.0)]);

        assert_eq!(v.edge_value(&2), Some(&1.0));
        assert_eq!(v.edge_value(&9), None);

        assert!(v.set_edge_value(&3, 5.0));
        assert_eq!(v.edge_value(&3), Some(&5.0));
        assert!(!v.set_edge_value(&9, 1.0));

        v.add_edge(9, 0.5);
        assert_eq!(v.num_edges(), 3);
        assert_eq!(v.edge_value(&9), Some(&0.5));
    }

    #[test]
    fn duplicate_edges_to_one_target_are_permitted() {
        let mut v = record();
        v.add_edge(2, ());
        assert_eq!(v.num_edges(), 3);
        // set_edge_value touches the first match only
        assert!(v.set_edge_value(&2, ()));
    }
}
