//! End-to-end verification that messages arrive at the right vertex on the
//! right superstep.
//!
//! Every round each vertex stamps outgoing messages with its id and the
//! current superstep, folds the inbound message values into its own value
//! and rewrites its out-edge values. On receipt the stamps are validated:
//! a message that was not sent exactly one superstep ago, or that did not
//! come from the expected source on an id chain, means the barrier or the
//! router is broken and the whole job fails.

use serde::{Deserialize, Serialize};

use crate::core::agg::AggValue;
use crate::core::errors::ComputeError;
use crate::engine::context::{Messages, VertexContext};
use crate::engine::Computation;

/// Message stamped with enough provenance to be verified on receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifiableMessage {
    /// Superstep this message was created on.
    pub superstep: u64,
    /// Who sent this message.
    pub source: u64,
    pub value: f32,
}

/// Runs on graphs whose edges form id chains (vertex `k` points at `k+1`).
pub struct VerifyMessage {
    supersteps: u64,
}

impl VerifyMessage {
    /// Aggregator fed one id contribution per vertex per round; register it
    /// with [`LongSum`](crate::core::agg::LongSum) and
    /// [`ResetPolicy::Persistent`](crate::core::agg::ResetPolicy) to read
    /// the whole-job sum from the run report.
    pub const ID_SUM: &'static str = "id_sum";

    pub fn new(supersteps: u64) -> Self {
        Self { supersteps }
    }
}

impl Default for VerifyMessage {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Computation<u64, i64, f32, VerifiableMessage> for VerifyMessage {
    fn compute(
        &self,
        ctx: &mut VertexContext<'_, u64, i64, f32, VerifiableMessage>,
        messages: Messages<VerifiableMessage>,
    ) -> Result<(), ComputeError> {
        let superstep = ctx.superstep();
        if superstep > self.supersteps {
            ctx.vote_to_halt();
            return Ok(());
        }

        let id = *ctx.id();
        ctx.aggregate(Self::ID_SUM, AggValue::Long(id as i64))?;

        let mut message_value = 0.0f32;
        for message in messages {
            if message.superstep + 1 != superstep {
                return Err(ComputeError::ProtocolViolation {
                    superstep,
                    detail: format!(
                        "message stamped superstep {} cannot arrive here",
                        message.superstep
                    ),
                });
            }
            if id != 0 && message.source + 1 != id {
                return Err(ComputeError::ProtocolViolation {
                    superstep,
                    detail: format!("message came from {} instead of {}", message.source, id - 1),
                });
            }
            message_value += message.value;
        }

        let vertex_value = *ctx.value();
        ctx.set_value(vertex_value + message_value as i64);

        let edges: Vec<(u64, f32)> = ctx
            .edges()
            .iter()
            .map(|e| (*e.target(), *e.value()))
            .collect();
        for (target, edge_value) in edges {
            let new_edge_value = edge_value + vertex_value as f32;
            ctx.set_edge_value(&target, new_edge_value);
            ctx.send_message(
                target,
                VerifiableMessage {
                    superstep,
                    source: id,
                    value: new_edge_value,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod verify_tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::agg::{LongSum, ResetPolicy};
    use crate::core::vertex::Edge;
    use crate::engine::coordinator::{HaltReason, JobConfig, SuperstepCoordinator};

    type Coordinator = SuperstepCoordinator<u64, i64, f32, VerifiableMessage>;

    fn chain(len: u64) -> Vec<(u64, i64, Vec<Edge<u64, f32>>)> {
        (0..len)
            .map(|id| {
                let edges = if id + 1 < len {
                    vec![Edge::new(id + 1, 0.0f32)]
                } else {
                    vec![]
                };
                (id, 0i64, edges)
            })
            .collect()
    }

    fn verified_coordinator(len: u64) -> Coordinator {
        let mut coordinator =
            Coordinator::with_records(JobConfig::default(), 2, chain(len)).unwrap();
        coordinator.register_aggregator(VerifyMessage::ID_SUM, LongSum, ResetPolicy::Persistent);
        coordinator
    }

    #[test]
    fn a_correct_chain_verifies_and_sums_ids() {
        let mut coordinator = verified_coordinator(3);
        let report = coordinator.run(&VerifyMessage::new(2)).unwrap();

        // rounds 0..=2 each contribute 0+1+2; round 3 only halts
        assert_eq!(report.halt, HaltReason::AllHalted);
        assert_eq!(report.supersteps, 4);
        assert_eq!(
            report.aggregates[VerifyMessage::ID_SUM],
            AggValue::Long(9)
        );
    }

    #[test]
    fn message_values_flow_down_the_chain() {
        let records = vec![
            (0u64, 1i64, vec![Edge::new(1, 0.0f32)]),
            (1, 0, vec![]),
        ];
        let mut coordinator =
            Coordinator::with_records(JobConfig::default(), 2, records).unwrap();
        coordinator.register_aggregator(VerifyMessage::ID_SUM, LongSum, ResetPolicy::Persistent);
        coordinator.run(&VerifyMessage::new(2)).unwrap();
        let results: rustc_hash::FxHashMap<u64, i64> =
            coordinator.results().unwrap().into_iter().collect();

        // vertex 0 never receives; its edge value grows by 1 each round, so
        // vertex 1 folds in 1.0 and 2.0 before the round-3 message is cut
        // off by the halt
        assert_eq!(results[&0], 1);
        assert_eq!(results[&1], 3);
    }

    /// A computation that lies about the sending superstep trips the
    /// receiver's validation and fails the run.
    struct ForgedStamp;

    impl Computation<u64, i64, f32, VerifiableMessage> for ForgedStamp {
        fn compute(
            &self,
            ctx: &mut VertexContext<'_, u64, i64, f32, VerifiableMessage>,
            messages: Messages<VerifiableMessage>,
        ) -> Result<(), ComputeError> {
            if ctx.superstep() == 0 {
                let forged = VerifiableMessage {
                    superstep: ctx.superstep() + 5,
                    source: *ctx.id(),
                    value: 0.0,
                };
                let edges: Vec<u64> = ctx.edges().iter().map(|e| *e.target()).collect();
                for target in edges {
                    ctx.send_message(target, forged.clone());
                }
                Ok(())
            } else {
                VerifyMessage::new(6).compute(ctx, messages)
            }
        }
    }

    #[test]
    fn an_impossible_superstep_stamp_is_fatal() {
        let mut coordinator = verified_coordinator(2);
        let err = coordinator.run(&ForgedStamp).unwrap_err();
        assert!(matches!(err, ComputeError::ProtocolViolation { .. }));
    }

    /// A message from a vertex that is not the chain predecessor is just as
    /// impossible.
    struct WrongNeighbour;

    impl Computation<u64, i64, f32, VerifiableMessage> for WrongNeighbour {
        fn compute(
            &self,
            ctx: &mut VertexContext<'_, u64, i64, f32, VerifiableMessage>,
            messages: Messages<VerifiableMessage>,
        ) -> Result<(), ComputeError> {
            if ctx.superstep() == 0 && *ctx.id() == 0 {
                ctx.send_message(
                    2,
                    VerifiableMessage {
                        superstep: 0,
                        source: 0,
                        value: 0.0,
                    },
                );
                ctx.vote_to_halt();
                Ok(())
            } else {
                VerifyMessage::new(6).compute(ctx, messages)
            }
        }
    }

    #[test]
    fn an_impossible_source_is_fatal() {
        let mut coordinator = verified_coordinator(3);
        let err = coordinator.run(&WrongNeighbour).unwrap_err();
        assert!(matches!(err, ComputeError::ProtocolViolation { .. }));
    }
}
