//! Partitions: disjoint, addressable shards of the overall vertex set.
//!
//! A fixed hash of the vertex id assigns every id to exactly one partition
//! for the lifetime of a job. The partition is also the unit of paging when
//! a graph is too large to keep resident: a shard pages out to its spill
//! file after its superstep pass and faults back in before the next one,
//! blocking only the thread that drives it.

use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rustc_hash::FxHasher;

use super::errors::ComputeError;
use super::store::{IndexKind, VertexStore};
use super::vertex::{Data, VertexId};

/// The fixed partitioning function: every id belongs to exactly one of
/// `n_partitions` for as long as the job runs.
pub fn partition_for<I: Hash>(id: &I, n_partitions: usize) -> usize {
    debug_assert!(n_partitions > 0);
    let mut hasher = FxHasher::default();
    id.hash(&mut hasher);
    (hasher.finish() % n_partitions as u64) as usize
}

pub struct Partition<I: VertexId, V: Data, E: Data> {
    id: usize,
    store: VertexStore<I, V, E>,
    spill_path: Option<PathBuf>,
    paged_out: bool,
}

impl<I: VertexId, V: Data, E: Data> Partition<I, V, E> {
    pub fn new(id: usize, kind: IndexKind) -> Self {
        Self {
            id,
            store: VertexStore::new(kind),
            spill_path: None,
            paged_out: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn store(&self) -> &VertexStore<I, V, E> {
        &self.store
    }

    pub fn is_paged_out(&self) -> bool {
        self.paged_out
    }

    /// Serializes the shard to its spill file and drops it from memory.
    /// Transient I/O failures retry locally up to `retries` extra attempts
    /// before escalating fatally.
    pub fn page_out(&mut self, spill_dir: &Path, retries: usize) -> Result<(), ComputeError> {
        if self.paged_out {
            return Ok(());
        }
        let path = self
            .spill_path
            .get_or_insert_with(|| spill_dir.join(format!("partition-{:05}.shard", self.id)))
            .clone();

        let mut attempt = 0;
        loop {
            match self.try_page_out(spill_dir, &path) {
                Ok(()) => {
                    self.store.clear();
                    self.paged_out = true;
                    return Ok(());
                }
                Err(ComputeError::Io(err)) if attempt < retries => {
                    attempt += 1;
                    tracing::warn!(
                        partition = self.id,
                        attempt,
                        error = %err,
                        "page-out failed, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_page_out(&self, spill_dir: &Path, path: &Path) -> Result<(), ComputeError> {
        std::fs::create_dir_all(spill_dir)?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.store.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Restores a paged-out shard from its spill file. Corruption (a
    /// duplicate id in the stream) fails immediately; only I/O failures are
    /// retried.
    pub fn page_in(&mut self, retries: usize) -> Result<(), ComputeError> {
        if !self.paged_out {
            return Ok(());
        }
        let path = self
            .spill_path
            .clone()
            .expect("paged-out partition always has a spill path");

        let mut attempt = 0;
        loop {
            match Self::try_page_in(self.store.kind(), &path) {
                Ok(store) => {
                    self.store = store;
                    self.paged_out = false;
                    return Ok(());
                }
                Err(ComputeError::Io(err)) if attempt < retries => {
                    attempt += 1;
                    tracing::warn!(
                        partition = self.id,
                        attempt,
                        error = %err,
                        "page-in failed, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_page_in(kind: IndexKind, path: &Path) -> Result<VertexStore<I, V, E>, ComputeError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        VertexStore::read_from(kind, &mut reader)
    }
}
