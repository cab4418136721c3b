//! Data structures making up one worker's share of a BSP job: vertex
//! records, the sharded stores that own them, the message router and the
//! global aggregators.

pub mod agg;
pub mod errors;
pub mod message;
pub mod partition;
pub mod store;
pub mod vertex;

pub use self::agg::{AggValue, AggregatorSet, ResetPolicy};
pub use self::errors::ComputeError;
pub use self::message::MessageRouter;
pub use self::partition::{partition_for, Partition};
pub use self::store::{IndexKind, VertexStore};
pub use self::vertex::{Data, Edge, VertexId, VertexRecord};
