//! Drives partitions through globally synchronized supersteps.
//!
//! The coordinator owns every partition, the message router and the
//! aggregator set. Each round it invokes compute for every vertex that is
//! active or has pending messages, then applies the barrier: aggregator
//! partials merge, undeliverable messages drain, the message buffers swap
//! generations and the halt condition is evaluated. Superstep S+1 never
//! starts before every compute call of S and its barrier have finished.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use super::context::{Messages, VertexContext};
use super::{custom_pool, Computation, POOL};
use crate::core::agg::{AggValue, AggregatorPartials, AggregatorSet, Reducer, ResetPolicy};
use crate::core::errors::ComputeError;
use crate::core::message::MessageRouter;
use crate::core::partition::{partition_for, Partition};
use crate::core::store::IndexKind;
use crate::core::vertex::{Data, Edge, VertexId, VertexRecord};
use crate::io::OutputSink;

/// Vertices handed to one worker task at a time.
const CHUNK_SIZE: usize = 16_000;

/// Configuration surface consumed by the core.
#[derive(Clone, Debug)]
pub struct JobConfig {
    /// Selects the id-ordered index and partition paging; partitions are
    /// processed one resident shard at a time.
    pub out_of_core: bool,
    /// Hard ceiling on rounds; `None` runs until global halt.
    pub max_supersteps: Option<u64>,
    /// Worker threads for this run; `None` uses the shared pool.
    pub num_threads: Option<usize>,
    /// Where paged-out shards live; defaults to a per-process directory
    /// under the system temp dir.
    pub spill_dir: Option<PathBuf>,
    /// Extra local attempts for transient paging I/O failures before they
    /// escalate fatally.
    pub spill_retries: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            out_of_core: false,
            max_supersteps: None,
            num_threads: None,
            spill_dir: None,
            spill_retries: 3,
        }
    }
}

/// `Init → Running → Barrier → (Running | Halted)`; advanced only by the
/// coordinator, `Halted` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Init,
    Running,
    Barrier,
    Halted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HaltReason {
    /// Every vertex voted to halt and no message is in flight.
    AllHalted,
    /// The configured superstep ceiling was reached.
    MaxSupersteps,
    /// The external abort flag was raised; observed between supersteps.
    Aborted,
}

/// Global per-round bookkeeping, advanced only at the barrier.
#[derive(Clone, Copy, Debug, Default)]
pub struct SuperstepState {
    pub number: u64,
    pub total_active: u64,
}

/// What a finished job hands back to its caller: the explicit run context
/// replacing any notion of process-wide result state.
#[derive(Debug)]
pub struct RunReport<I> {
    pub supersteps: u64,
    pub halt: HaltReason,
    pub total_active: u64,
    pub aggregates: FxHashMap<String, AggValue<I>>,
}

struct PassOutcome<I: VertexId> {
    partials: AggregatorPartials<I>,
    active: u64,
}

impl<I: VertexId> PassOutcome<I> {
    fn new() -> Self {
        Self {
            partials: AggregatorPartials::new(),
            active: 0,
        }
    }

    fn merge(&mut self, other: Self, defs: &AggregatorSet<I>) -> Result<(), ComputeError> {
        self.partials.merge(other.partials, defs)?;
        self.active += other.active;
        Ok(())
    }
}

pub struct SuperstepCoordinator<I: VertexId, V: Data, E: Data, M: Data> {
    config: JobConfig,
    partitions: Vec<Partition<I, V, E>>,
    router: MessageRouter<I, M>,
    aggregators: AggregatorSet<I>,
    state: EngineState,
    superstep: SuperstepState,
    spill_dir: PathBuf,
    abort: Arc<AtomicBool>,
}

impl<I: VertexId, V: Data, E: Data, M: Data> SuperstepCoordinator<I, V, E, M> {
    pub fn new(config: JobConfig, num_partitions: usize) -> Self {
        assert!(num_partitions > 0, "a job needs at least one partition");
        let kind = if config.out_of_core {
            IndexKind::Ordered
        } else {
            IndexKind::Hash
        };
        let spill_dir = config.spill_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("lockstep-{}", std::process::id()))
        });
        let partitions = (0..num_partitions)
            .map(|id| Partition::new(id, kind))
            .collect();
        Self {
            config,
            partitions,
            router: MessageRouter::new(),
            aggregators: AggregatorSet::new(),
            state: EngineState::Init,
            superstep: SuperstepState::default(),
            spill_dir,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds a coordinator and loads the input records in one go.
    pub fn with_records<R>(
        config: JobConfig,
        num_partitions: usize,
        records: R,
    ) -> Result<Self, ComputeError>
    where
        R: IntoIterator<Item = (I, V, Vec<Edge<I, E>>)>,
    {
        let mut coordinator = Self::new(config, num_partitions);
        coordinator.load(records)?;
        Ok(coordinator)
    }

    /// Loads `(id, value, edges)` tuples from the input collaborator,
    /// assigning each to its partition by the fixed partitioning function.
    /// A duplicate id across the input is corruption.
    pub fn load<R>(&mut self, records: R) -> Result<(), ComputeError>
    where
        R: IntoIterator<Item = (I, V, Vec<Edge<I, E>>)>,
    {
        let n = self.partitions.len();
        for (id, value, edges) in records {
            let record = VertexRecord::new(id, value, edges);
            let p = partition_for(record.id(), n);
            if let Some(prev) = self.partitions[p].store().put(record) {
                return Err(ComputeError::DuplicateVertex {
                    id: format!("{:?}", prev.id()),
                });
            }
        }
        Ok(())
    }

    pub fn register_aggregator<R: Reducer<I> + 'static>(
        &mut self,
        name: impl Into<String>,
        reducer: R,
        policy: ResetPolicy,
    ) {
        self.aggregators.register(name, reducer, policy);
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn superstep(&self) -> SuperstepState {
        self.superstep
    }

    pub fn partitions(&self) -> &[Partition<I, V, E>] {
        &self.partitions
    }

    pub fn vertex_count(&self) -> usize {
        self.partitions.iter().map(|p| p.store().vertex_count()).sum()
    }

    /// Raising this flag halts the job at the next barrier; compute calls
    /// in flight for the current superstep run to completion.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Runs supersteps until global halt, the superstep ceiling or an
    /// abort. Any fatal error from a partition fails the whole job.
    pub fn run<C>(&mut self, algo: &C) -> Result<RunReport<I>, ComputeError>
    where
        C: Computation<I, V, E, M>,
    {
        debug_assert!(self.state == EngineState::Init, "run() is single-shot");
        tracing::info!(
            partitions = self.partitions.len(),
            vertices = self.vertex_count(),
            out_of_core = self.config.out_of_core,
            "starting BSP run"
        );
        let pool = match self.config.num_threads {
            Some(n) => custom_pool(n),
            None => POOL.clone(),
        };
        let result = pool.install(|| self.run_loop(algo));
        if let Err(err) = &result {
            tracing::error!(superstep = self.superstep.number, error = %err, "job failed");
        }
        result
    }

    fn run_loop<C>(&mut self, algo: &C) -> Result<RunReport<I>, ComputeError>
    where
        C: Computation<I, V, E, M>,
    {
        loop {
            self.state = EngineState::Running;
            let PassOutcome { partials, active } = self.run_superstep(algo)?;

            self.state = EngineState::Barrier;
            let dropped = self.router.drain_undeliverable();
            if dropped > 0 {
                tracing::debug!(dropped, "dropped messages addressed to absent vertices");
            }
            self.aggregators.barrier_merge(partials)?;
            self.router.swap();
            let pending = self.router.pending_count();

            self.superstep.number += 1;
            self.superstep.total_active = active;
            tracing::debug!(
                superstep = self.superstep.number,
                active,
                pending,
                "barrier complete"
            );

            let halt = if active == 0 && pending == 0 {
                Some(HaltReason::AllHalted)
            } else if self.abort.load(Ordering::Relaxed) {
                Some(HaltReason::Aborted)
            } else if self
                .config
                .max_supersteps
                .is_some_and(|max| self.superstep.number >= max)
            {
                Some(HaltReason::MaxSupersteps)
            } else {
                None
            };

            if let Some(halt) = halt {
                self.state = EngineState::Halted;
                tracing::info!(supersteps = self.superstep.number, ?halt, "job halted");
                return Ok(RunReport {
                    supersteps: self.superstep.number,
                    halt,
                    total_active: active,
                    aggregates: self.aggregators.finals(),
                });
            }
        }
    }

    fn run_superstep<C>(&mut self, algo: &C) -> Result<PassOutcome<I>, ComputeError>
    where
        C: Computation<I, V, E, M>,
    {
        let n = self.partitions.len();
        let mut inbound_by_partition: Vec<Vec<I>> = (0..n).map(|_| Vec::new()).collect();
        for id in self.router.inbound_destinations() {
            inbound_by_partition[partition_for(&id, n)].push(id);
        }

        let ss = self.superstep.number;
        let router = &self.router;
        let aggregators = &self.aggregators;

        if self.config.out_of_core {
            // one resident shard at a time; vertex parallelism stays inside
            // the partition pass
            let retries = self.config.spill_retries;
            let spill_dir = self.spill_dir.clone();
            let mut outcome = PassOutcome::new();
            for (partition, ids) in self.partitions.iter_mut().zip(inbound_by_partition) {
                partition.page_in(retries)?;
                let pass = run_partition_pass(partition, ids, router, aggregators, ss, algo)?;
                outcome.merge(pass, aggregators)?;
                partition.page_out(&spill_dir, retries)?;
            }
            Ok(outcome)
        } else {
            let work: Vec<_> = self.partitions.iter().zip(inbound_by_partition).collect();
            work.into_par_iter()
                .map(|(partition, ids)| {
                    run_partition_pass(partition, ids, router, aggregators, ss, algo)
                })
                .try_reduce(PassOutcome::new, |mut merged, pass| {
                    merged.merge(pass, aggregators)?;
                    Ok(merged)
                })
        }
    }

    /// Final `(id, value)` pairs for the output collaborator. Only
    /// available once the job has halted.
    pub fn results(&mut self) -> Result<Vec<(I, V)>, ComputeError> {
        if self.state != EngineState::Halted {
            return Err(ComputeError::NotHalted);
        }
        let retries = self.config.spill_retries;
        let mut out = Vec::with_capacity(self.vertex_count());
        for partition in &mut self.partitions {
            partition.page_in(retries)?;
            out.extend(partition.store().iterate().map(|record| {
                let (id, value, _) = record.into_parts();
                (id, value)
            }));
        }
        Ok(out)
    }

    /// Streams final values into an output sink after `Halted`.
    pub fn write_results<S: OutputSink<I, V>>(&mut self, sink: &mut S) -> Result<(), ComputeError> {
        for (id, value) in self.results()? {
            sink.write_vertex(&id, &value)?;
        }
        Ok(())
    }
}

/// One partition's share of a superstep: invoke compute for every vertex
/// that is active or has a pending message, in unspecified order, chunked
/// across the worker pool.
fn run_partition_pass<I, V, E, M, C>(
    partition: &Partition<I, V, E>,
    inbound_ids: Vec<I>,
    router: &MessageRouter<I, M>,
    aggregators: &AggregatorSet<I>,
    superstep: u64,
    algo: &C,
) -> Result<PassOutcome<I>, ComputeError>
where
    I: VertexId,
    V: Data,
    E: Data,
    M: Data,
    C: Computation<I, V, E, M>,
{
    let store = partition.store();
    let mut eligible: Vec<_> = store
        .snapshot()
        .into_iter()
        .filter(|slot| slot.read().is_active())
        .collect();
    for id in inbound_ids {
        // halted vertices with mail become eligible again; active ones are
        // already in the list
        if let Some(slot) = store.slot(&id) {
            if !slot.read().is_active() {
                eligible.push(slot);
            }
        }
    }

    eligible
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| -> Result<PassOutcome<I>, ComputeError> {
            let mut outcome = PassOutcome::new();
            for slot in chunk {
                let mut record = slot.write();
                let inbound = router.take(record.id());
                if inbound.is_some() {
                    record.activate();
                }
                let messages = Messages::new(inbound.unwrap_or_default());
                let mut ctx = VertexContext::new(
                    superstep,
                    &mut record,
                    router,
                    aggregators,
                    &mut outcome.partials,
                );
                algo.compute(&mut ctx, messages)?;
                if record.is_active() {
                    outcome.active += 1;
                }
            }
            Ok(outcome)
        })
        .try_reduce(PassOutcome::new, |mut merged, pass| {
            merged.merge(pass, aggregators)?;
            Ok(merged)
        })
}
