//! lockstep is a partitioned, vertex-centric graph compute engine following
//! the Bulk Synchronous Parallel model: the graph is sharded across
//! partitions and computation proceeds in globally synchronized supersteps.
//! Each round every eligible vertex reads the messages sent to it in the
//! previous round, mutates its own state, buffers messages for the next
//! round and may vote to halt; the job ends when no vertex is active and no
//! message is in flight.
//!
//! ```
//! use lockstep::prelude::*;
//!
//! struct MaxValue;
//!
//! impl Computation<u64, i64, (), i64> for MaxValue {
//!     fn compute(
//!         &self,
//!         ctx: &mut VertexContext<'_, u64, i64, (), i64>,
//!         messages: Messages<i64>,
//!     ) -> Result<(), ComputeError> {
//!         let best = messages.max().unwrap_or(*ctx.value()).max(*ctx.value());
//!         if best > *ctx.value() || ctx.superstep() == 0 {
//!             ctx.set_value(best);
//!             ctx.send_to_all_edges(best);
//!         }
//!         ctx.vote_to_halt();
//!         Ok(())
//!     }
//! }
//!
//! let records = vec![
//!     (1u64, 3i64, vec![Edge::new(2, ())]),
//!     (2, 8, vec![Edge::new(1, ())]),
//! ];
//! let mut coordinator: SuperstepCoordinator<u64, i64, (), i64> =
//!     SuperstepCoordinator::with_records(JobConfig::default(), 2, records).unwrap();
//! let report = coordinator.run(&MaxValue).unwrap();
//! assert_eq!(report.halt, HaltReason::AllHalted);
//! for (_, value) in coordinator.results().unwrap() {
//!     assert_eq!(value, 8);
//! }
//! ```

pub mod algorithms;
pub mod core;
pub mod engine;
pub mod io;

pub mod prelude {
    pub use crate::core::agg::{
        AggValue, AggregatorSet, DoubleSum, IdSetUnion, LongSum, Reducer, ResetPolicy,
    };
    pub use crate::core::errors::ComputeError;
    pub use crate::core::store::IndexKind;
    pub use crate::core::vertex::{Data, Edge, VertexId, VertexRecord};
    pub use crate::engine::context::{Messages, VertexContext};
    pub use crate::engine::coordinator::{
        EngineState, HaltReason, JobConfig, RunReport, SuperstepCoordinator,
    };
    pub use crate::engine::{Computation, ComputeFn};
    pub use crate::io::{OutputSink, VecSink};
}
