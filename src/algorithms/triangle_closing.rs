//! Triangle closing on simple directed graphs.
//!
//! Superstep 0: every vertex sends its neighbour list to all of its
//! neighbours. Superstep 1: a vertex keeps every id mentioned by more than
//! one neighbour that is neither itself nor already an edge target, i.e.
//! the vertices it should connect with to close triangles. The result lands
//! in the vertex value, sorted by id ascending so equal mention counts rank
//! deterministically.

use rustc_hash::FxHashMap;

use crate::core::errors::ComputeError;
use crate::core::vertex::{Data, VertexId};
use crate::engine::context::{Messages, VertexContext};
use crate::engine::Computation;

pub struct TriangleClosing;

impl<I, E> Computation<I, Vec<I>, E, I> for TriangleClosing
where
    I: VertexId,
    E: Data,
{
    fn compute(
        &self,
        ctx: &mut VertexContext<'_, I, Vec<I>, E, I>,
        messages: Messages<I>,
    ) -> Result<(), ComputeError> {
        if ctx.superstep() == 0 {
            let neighbours: Vec<I> = ctx.edges().iter().map(|e| e.target().clone()).collect();
            for neighbour in neighbours {
                ctx.send_to_all_edges(neighbour);
            }
        } else {
            let mut mentions: FxHashMap<I, usize> = FxHashMap::default();
            for id in messages {
                *mentions.entry(id).or_insert(0) += 1;
            }
            let mut closing: Vec<I> = mentions
                .into_iter()
                .filter(|(id, count)| {
                    *count > 1 && id != ctx.id() && ctx.edge_value(id).is_none()
                })
                .map(|(id, _)| id)
                .collect();
            closing.sort();
            ctx.set_value(closing);
        }
        ctx.vote_to_halt();
        Ok(())
    }
}

#[cfg(test)]
mod triangle_tests {
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashMap;

    use super::*;
    use crate::core::vertex::Edge;
    use crate::engine::coordinator::{HaltReason, JobConfig, SuperstepCoordinator};
    use crate::io::adjacency_list;

    const TOY_GRAPH: &str = "1 4 2 3\n2 1 4 5\n3 4 1\n4 3 2 1 5\n5 2 4\n";

    fn toy_records() -> Vec<(u64, Vec<u64>, Vec<Edge<u64, ()>>)> {
        adjacency_list(TOY_GRAPH)
            .unwrap()
            .into_iter()
            .map(|(id, edges)| (id, Vec::new(), edges))
            .collect()
    }

    fn run_toy_graph(config: JobConfig) -> FxHashMap<u64, Vec<u64>> {
        let mut coordinator: SuperstepCoordinator<u64, Vec<u64>, (), u64> =
            SuperstepCoordinator::with_records(config, 3, toy_records()).unwrap();
        let report = coordinator.run(&TriangleClosing).unwrap();

        assert_eq!(report.halt, HaltReason::AllHalted);
        assert_eq!(report.supersteps, 2);
        coordinator.results().unwrap().into_iter().collect()
    }

    #[test]
    fn closes_triangles_on_the_toy_graph() {
        let results = run_toy_graph(JobConfig::default());

        // 5 is the only neighbour-of-neighbour vertex 1 is not already
        // connected to
        assert_eq!(results[&1], vec![5]);
        assert_eq!(results[&2], vec![3]);
        assert_eq!(results[&3], vec![2]);
        assert_eq!(results[&4], Vec::<u64>::new());
        assert_eq!(results[&5], vec![1]);
    }

    #[test]
    fn out_of_core_run_matches_the_resident_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = JobConfig {
            out_of_core: true,
            spill_dir: Some(dir.path().to_path_buf()),
            ..JobConfig::default()
        };
        assert_eq!(run_toy_graph(config), run_toy_graph(JobConfig::default()));
    }

    /// The superstep-1 inclusion rule on a hand-fed inbox: 4 arrives three
    /// times, 7 twice but is already an edge target, everything else once.
    #[test]
    fn superstep_one_keeps_repeat_mentions_only() {
        let records = vec![
            (1u64, Vec::new(), vec![Edge::new(5, ()), Edge::new(7, ())]),
            (9, Vec::new(), vec![Edge::new(1, ())]),
        ];
        let mut coordinator: SuperstepCoordinator<u64, Vec<u64>, (), u64> =
            SuperstepCoordinator::with_records(JobConfig::default(), 2, records).unwrap();

        struct FeedInbox;

        impl Computation<u64, Vec<u64>, (), u64> for FeedInbox {
            fn compute(
                &self,
                ctx: &mut VertexContext<'_, u64, Vec<u64>, (), u64>,
                messages: Messages<u64>,
            ) -> Result<(), ComputeError> {
                if ctx.superstep() == 0 && *ctx.id() == 9 {
                    for msg in [7u64, 3, 4, 7, 4, 2, 4] {
                        ctx.send_message(1, msg);
                    }
                    ctx.vote_to_halt();
                    return Ok(());
                }
                TriangleClosing.compute(ctx, messages)
            }
        }

        coordinator.run(&FeedInbox).unwrap();
        let results: FxHashMap<u64, Vec<u64>> =
            coordinator.results().unwrap().into_iter().collect();
        assert_eq!(format!("{:?}", results[&1]), "[4]");
    }

    #[test]
    fn superstep_zero_broadcasts_the_neighbour_list() {
        let records = vec![
            (1u64, Vec::new(), vec![Edge::new(2, ()), Edge::new(3, ())]),
            (2, Vec::new(), vec![]),
            (3, Vec::new(), vec![]),
        ];
        let mut coordinator: SuperstepCoordinator<u64, Vec<u64>, (), u64> =
            SuperstepCoordinator::with_records(JobConfig::default(), 2, records).unwrap();

        struct RecordInbox;

        impl Computation<u64, Vec<u64>, (), u64> for RecordInbox {
            fn compute(
                &self,
                ctx: &mut VertexContext<'_, u64, Vec<u64>, (), u64>,
                messages: Messages<u64>,
            ) -> Result<(), ComputeError> {
                if ctx.superstep() == 0 {
                    return TriangleClosing.compute(ctx, messages);
                }
                let mut inbox: Vec<u64> = messages.collect();
                inbox.sort();
                ctx.set_value(inbox);
                ctx.vote_to_halt();
                Ok(())
            }
        }

        coordinator.run(&RecordInbox).unwrap();
        let results: FxHashMap<u64, Vec<u64>> =
            coordinator.results().unwrap().into_iter().collect();

        // both neighbours got vertex 1's full neighbour list
        assert_eq!(results[&2], vec![2, 3]);
        assert_eq!(results[&3], vec![2, 3]);
    }
}
