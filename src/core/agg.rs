//! Global reductions computed once per superstep from per-partition
//! partials.
//!
//! Every compute thread folds its contributions into an
//! [`AggregatorPartials`]; partials merge pairwise during the parallel
//! reduction and once more into the shared global set at the barrier. The
//! merged value becomes visible to compute calls in the next superstep only,
//! never mid-round.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::errors::ComputeError;
use super::vertex::VertexId;

/// A value carried by a named aggregator.
#[derive(Clone, Debug, PartialEq)]
pub enum AggValue<I> {
    Long(i64),
    Double(f64),
    IdSet(BTreeSet<I>),
}

impl<I> AggValue<I> {
    pub fn kind(&self) -> &'static str {
        match self {
            AggValue::Long(_) => "long",
            AggValue::Double(_) => "double",
            AggValue::IdSet(_) => "id-set",
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            AggValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            AggValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_id_set(&self) -> Option<&BTreeSet<I>> {
        match self {
            AggValue::IdSet(s) => Some(s),
            _ => None,
        }
    }
}

/// A combine rejected a value whose shape does not match the accumulator.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("expected a {expected} value, got {got}")]
pub struct ReduceError {
    pub expected: &'static str,
    pub got: &'static str,
}

/// An associative, commutative binary reduction with an identity element.
pub trait Reducer<I: VertexId>: Send + Sync {
    fn identity(&self) -> AggValue<I>;

    fn combine(&self, into: &mut AggValue<I>, value: AggValue<I>) -> Result<(), ReduceError>;
}

fn mismatch<I>(into: &AggValue<I>, got: &AggValue<I>) -> ReduceError {
    ReduceError {
        expected: into.kind(),
        got: got.kind(),
    }
}

/// Sums signed integers.
pub struct LongSum;

impl<I: VertexId> Reducer<I> for LongSum {
    fn identity(&self) -> AggValue<I> {
        AggValue::Long(0)
    }

    fn combine(&self, into: &mut AggValue<I>, value: AggValue<I>) -> Result<(), ReduceError> {
        match (into, value) {
            (AggValue::Long(a), AggValue::Long(b)) => {
                *a += b;
                Ok(())
            }
            (into, value) => Err(mismatch(into, &value)),
        }
    }
}

/// Sums floats.
pub struct DoubleSum;

impl<I: VertexId> Reducer<I> for DoubleSum {
    fn identity(&self) -> AggValue<I> {
        AggValue::Double(0.0)
    }

    fn combine(&self, into: &mut AggValue<I>, value: AggValue<I>) -> Result<(), ReduceError> {
        match (into, value) {
            (AggValue::Double(a), AggValue::Double(b)) => {
                *a += b;
                Ok(())
            }
            (into, value) => Err(mismatch(into, &value)),
        }
    }
}

/// Unions vertex id sets; the accumulation primitive behind
/// rank-by-frequency style algorithms.
pub struct IdSetUnion;

impl<I: VertexId> Reducer<I> for IdSetUnion {
    fn identity(&self) -> AggValue<I> {
        AggValue::IdSet(BTreeSet::new())
    }

    fn combine(&self, into: &mut AggValue<I>, value: AggValue<I>) -> Result<(), ReduceError> {
        match (into, value) {
            (AggValue::IdSet(a), AggValue::IdSet(b)) => {
                a.extend(b);
                Ok(())
            }
            (into, value) => Err(mismatch(into, &value)),
        }
    }
}

/// Whether a value survives the barrier or is rebuilt from scratch every
/// superstep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetPolicy {
    /// The barrier replaces the global value with the round's merged
    /// partials (identity when nothing was aggregated).
    EachSuperstep,
    /// The barrier folds the round's partials into the running value; the
    /// value accumulates for the whole job.
    Persistent,
}

struct AggregatorDef<I: VertexId> {
    reducer: Arc<dyn Reducer<I>>,
    policy: ResetPolicy,
}

/// Name-keyed aggregator registry plus the global value set written only at
/// the barrier and read-only during the surrounding superstep.
pub struct AggregatorSet<I: VertexId> {
    defs: FxHashMap<String, AggregatorDef<I>>,
    global: RwLock<FxHashMap<String, AggValue<I>>>,
}

impl<I: VertexId> Default for AggregatorSet<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: VertexId> AggregatorSet<I> {
    pub fn new() -> Self {
        Self {
            defs: FxHashMap::default(),
            global: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn register<R: Reducer<I> + 'static>(
        &mut self,
        name: impl Into<String>,
        reducer: R,
        policy: ResetPolicy,
    ) {
        self.defs.insert(
            name.into(),
            AggregatorDef {
                reducer: Arc::new(reducer),
                policy,
            },
        );
    }

    /// Last barrier's merged value for `name`, if any round has produced
    /// one.
    pub fn read(&self, name: &str) -> Option<AggValue<I>> {
        self.global.read().get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    fn def(&self, name: &str) -> Result<&AggregatorDef<I>, ComputeError> {
        self.defs
            .get(name)
            .ok_or_else(|| ComputeError::UnknownAggregator { name: name.into() })
    }

    fn combine_named(
        &self,
        name: &str,
        into: &mut AggValue<I>,
        value: AggValue<I>,
    ) -> Result<(), ComputeError> {
        self.def(name)?
            .reducer
            .combine(into, value)
            .map_err(|source| ComputeError::Aggregator {
                name: name.into(),
                source,
            })
    }

    /// The barrier's merge step: folds one round's merged partials into the
    /// global set according to each aggregator's policy.
    pub fn barrier_merge(&self, mut partials: AggregatorPartials<I>) -> Result<(), ComputeError> {
        let mut global = self.global.write();
        for (name, def) in &self.defs {
            let partial = partials.values.remove(name);
            match def.policy {
                ResetPolicy::EachSuperstep => {
                    let merged = partial.unwrap_or_else(|| def.reducer.identity());
                    global.insert(name.clone(), merged);
                }
                ResetPolicy::Persistent => {
                    if let Some(partial) = partial {
                        let running = global
                            .entry(name.clone())
                            .or_insert_with(|| def.reducer.identity());
                        def.reducer.combine(running, partial).map_err(|source| {
                            ComputeError::Aggregator {
                                name: name.clone(),
                                source,
                            }
                        })?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Snapshot of every global value, for the final run report.
    pub fn finals(&self) -> FxHashMap<String, AggValue<I>> {
        self.global.read().clone()
    }
}

/// One reduction branch's partial contributions for the current superstep.
pub struct AggregatorPartials<I: VertexId> {
    values: FxHashMap<String, AggValue<I>>,
}

impl<I: VertexId> Default for AggregatorPartials<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: VertexId> AggregatorPartials<I> {
    pub fn new() -> Self {
        Self {
            values: FxHashMap::default(),
        }
    }

    /// Combines `value` into this partial with the reducer registered for
    /// `name`.
    pub fn aggregate(
        &mut self,
        defs: &AggregatorSet<I>,
        name: &str,
        value: AggValue<I>,
    ) -> Result<(), ComputeError> {
        let slot = match self.values.entry(name.to_owned()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(defs.def(name)?.reducer.identity())
            }
        };
        defs.combine_named(name, slot, value)
    }

    /// Pairwise merge of two partials during the parallel reduction.
    pub fn merge(
        &mut self,
        other: AggregatorPartials<I>,
        defs: &AggregatorSet<I>,
    ) -> Result<(), ComputeError> {
        for (name, value) in other.values {
            match self.values.entry(name) {
                std::collections::hash_map::Entry::Occupied(mut e) => {
                    let name = e.key().clone();
                    defs.combine_named(&name, e.get_mut(), value)?;
                }
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(value);
                }
            }
        }
        Ok(())
    }
}
