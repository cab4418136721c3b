//! Superstep execution: the thread pool, the user compute contract and the
//! coordinator that drives partitions through globally synchronized rounds.

use std::sync::Arc;

use once_cell::sync::Lazy;
use rayon::{ThreadPool, ThreadPoolBuilder};

pub mod context;
pub mod coordinator;

use self::context::{Messages, VertexContext};
use crate::core::errors::ComputeError;
use crate::core::vertex::{Data, VertexId};

pub static POOL: Lazy<Arc<ThreadPool>> = Lazy::new(|| {
    let num_threads = std::env::var("LOCKSTEP_MAX_THREADS")
        .map(|s| {
            s.parse::<usize>()
                .expect("LOCKSTEP_MAX_THREADS must be a number")
        })
        .unwrap_or_else(|_| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .expect("failed to build the worker thread pool");

    Arc::new(pool)
});

pub fn custom_pool(n_threads: usize) -> Arc<ThreadPool> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build()
        .expect("failed to build the worker thread pool");

    Arc::new(pool)
}

/// A user algorithm: one compute function invoked for every eligible vertex
/// each superstep, against the capability surface of [`VertexContext`].
///
/// Returning an error is fatal to the whole job; vote-to-halt on the
/// context is how a vertex stops participating.
pub trait Computation<I, V, E, M>: Send + Sync
where
    I: VertexId,
    V: Data,
    E: Data,
    M: Data,
{
    fn compute(
        &self,
        ctx: &mut VertexContext<'_, I, V, E, M>,
        messages: Messages<M>,
    ) -> Result<(), ComputeError>;
}

/// Adapts a closure into a [`Computation`], for tests and one-off steps.
pub struct ComputeFn<F> {
    f: F,
}

impl<F> ComputeFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<I, V, E, M, F> Computation<I, V, E, M> for ComputeFn<F>
where
    I: VertexId,
    V: Data,
    E: Data,
    M: Data,
    F: for<'a, 'b> Fn(
            &'b mut VertexContext<'a, I, V, E, M>,
            Messages<M>,
        ) -> Result<(), ComputeError>
        + Send
        + Sync,
{
    fn compute(
        &self,
        ctx: &mut VertexContext<'_, I, V, E, M>,
        messages: Messages<M>,
    ) -> Result<(), ComputeError> {
        (self.f)(ctx, messages)
    }
}
