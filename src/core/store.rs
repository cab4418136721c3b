//! A concurrent vertex map holding one shard of the graph.
//!
//! Two interchangeable backing indexes, picked by configuration rather than
//! at runtime: an unordered hash index for shards that stay resident and
//! only ever see random point lookups, and an id-ordered index for shards
//! that may be paged to secondary storage, where sequential iteration over
//! contiguous id ranges is what keeps the disk happy.
//!
//! Both indexes map ids to `Arc<RwLock<VertexRecord>>` slots: compute
//! threads lock the one record they are working on, so mutating different
//! keys of the same store never contends. The structure lock of the ordered
//! index is only held for lookups and topology changes.

use std::collections::btree_map::Entry as BTreeEntry;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::errors::ComputeError;
use super::vertex::{Data, VertexId, VertexRecord};

pub(crate) type Slot<I, V, E> = Arc<RwLock<VertexRecord<I, V, E>>>;

/// Index strategy for a [`VertexStore`]; a configuration decision, made once
/// when the partition is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// Unordered concurrent hash index; whole shard resident, point lookups.
    Hash,
    /// Id-ordered index; enables sequential paging of contiguous id ranges.
    Ordered,
}

#[derive(Debug)]
enum Index<I: VertexId, V: Data, E: Data> {
    Hash(DashMap<I, Slot<I, V, E>, FxBuildHasher>),
    Ordered(RwLock<BTreeMap<I, Slot<I, V, E>>>),
}

/// One shard's vertex map. Exactly one record per id.
#[derive(Debug)]
pub struct VertexStore<I: VertexId, V: Data, E: Data> {
    index: Index<I, V, E>,
}

impl<I: VertexId, V: Data, E: Data> VertexStore<I, V, E> {
    pub fn new(kind: IndexKind) -> Self {
        let index = match kind {
            IndexKind::Hash => Index::Hash(DashMap::with_hasher(FxBuildHasher::default())),
            IndexKind::Ordered => Index::Ordered(RwLock::new(BTreeMap::new())),
        };
        Self { index }
    }

    pub fn kind(&self) -> IndexKind {
        match &self.index {
            Index::Hash(_) => IndexKind::Hash,
            Index::Ordered(_) => IndexKind::Ordered,
        }
    }

    /// Returns a copy of the record for `id`. Never allocates a placeholder
    /// on a miss.
    pub fn get(&self, id: &I) -> Option<VertexRecord<I, V, E>> {
        self.slot(id).map(|slot| slot.read().clone())
    }

    pub(crate) fn slot(&self, id: &I) -> Option<Slot<I, V, E>> {
        match &self.index {
            Index::Hash(map) => map.get(id).map(|entry| entry.value().clone()),
            Index::Ordered(map) => map.read().get(id).cloned(),
        }
    }

    pub fn contains(&self, id: &I) -> bool {
        match &self.index {
            Index::Hash(map) => map.contains_key(id),
            Index::Ordered(map) => map.read().contains_key(id),
        }
    }

    /// Inserts or replaces by id, returning the previous record if one was
    /// there.
    pub fn put(&self, record: VertexRecord<I, V, E>) -> Option<VertexRecord<I, V, E>> {
        match &self.index {
            Index::Hash(map) => match map.entry(record.id.clone()) {
                Entry::Occupied(occupied) => {
                    let mut guard = occupied.get().write();
                    Some(std::mem::replace(&mut *guard, record))
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::new(RwLock::new(record)));
                    None
                }
            },
            Index::Ordered(map) => match map.write().entry(record.id.clone()) {
                BTreeEntry::Occupied(occupied) => {
                    let mut guard = occupied.get().write();
                    Some(std::mem::replace(&mut *guard, record))
                }
                BTreeEntry::Vacant(vacant) => {
                    vacant.insert(Arc::new(RwLock::new(record)));
                    None
                }
            },
        }
    }

    pub fn remove(&self, id: &I) -> Option<VertexRecord<I, V, E>> {
        let slot = match &self.index {
            Index::Hash(map) => map.remove(id).map(|(_, slot)| slot),
            Index::Ordered(map) => map.write().remove(id),
        };
        slot.map(unwrap_slot)
    }

    /// Stable snapshot of the slots at the time of the call. Safe to keep
    /// while other threads mutate records; used by iteration, serialization
    /// and the superstep pass. Ordered stores yield id-ascending order.
    pub(crate) fn snapshot(&self) -> Vec<Slot<I, V, E>> {
        match &self.index {
            Index::Hash(map) => map.iter().map(|entry| entry.value().clone()).collect(),
            Index::Ordered(map) => map.read().values().cloned().collect(),
        }
    }

    /// Iterates copies of every record in the store.
    pub fn iterate(&self) -> impl Iterator<Item = VertexRecord<I, V, E>> {
        self.snapshot().into_iter().map(|slot| slot.read().clone())
    }

    /// Folds another shard into this one, last writer wins. An id collision
    /// is logged as a correctness error: during restore it means the
    /// persisted state was corrupt.
    pub fn merge(&self, other: VertexStore<I, V, E>) {
        for record in other.iterate() {
            if let Some(prev) = self.put(record) {
                tracing::error!(id = ?prev.id, "id collision while merging partition stores");
            }
        }
    }

    pub fn vertex_count(&self) -> usize {
        match &self.index {
            Index::Hash(map) => map.len(),
            Index::Ordered(map) => map.read().len(),
        }
    }

    pub fn edge_count(&self) -> usize {
        self.snapshot()
            .into_iter()
            .map(|slot| slot.read().num_edges())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0
    }

    pub(crate) fn clear(&self) {
        match &self.index {
            Index::Hash(map) => map.clear(),
            Index::Ordered(map) => map.write().clear(),
        }
    }

    /// Writes the shard as a 4-byte big-endian vertex count followed by each
    /// record's id, value and edge list as length-prefixed blobs plus one
    /// active-flag byte.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ComputeError> {
        let slots = self.snapshot();
        let count = u32::try_from(slots.len()).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "shard exceeds the u32 vertex count of the wire format",
            )
        })?;
        w.write_u32::<BigEndian>(count)?;
        for slot in slots {
            let record = slot.read();
            write_blob(w, &record.id)?;
            write_blob(w, &record.value)?;
            write_blob(w, &record.edges)?;
            w.write_u8(record.active as u8)?;
        }
        Ok(())
    }

    /// Reads a shard previously written by [`VertexStore::write_to`]. Two
    /// records with the same id in one stream is data corruption and fails
    /// fatally.
    pub fn read_from<R: Read>(kind: IndexKind, r: &mut R) -> Result<Self, ComputeError> {
        let store = Self::new(kind);
        let count = r.read_u32::<BigEndian>()?;
        for _ in 0..count {
            let id: I = read_blob(r)?;
            let value: V = read_blob(r)?;
            let edges = read_blob(r)?;
            let active = r.read_u8()? != 0;

            let mut record = VertexRecord::new(id, value, edges);
            if !active {
                record.vote_to_halt();
            }
            if let Some(prev) = store.put(record) {
                return Err(ComputeError::DuplicateVertex {
                    id: format!("{:?}", prev.id),
                });
            }
        }
        Ok(store)
    }
}

fn unwrap_slot<I: VertexId, V: Data, E: Data>(slot: Slot<I, V, E>) -> VertexRecord<I, V, E> {
    match Arc::try_unwrap(slot) {
        Ok(lock) => lock.into_inner(),
        Err(shared) => shared.read().clone(),
    }
}

fn write_blob<W: Write, T: Serialize>(w: &mut W, value: &T) -> Result<(), ComputeError> {
    let bytes = bincode::serialize(value)?;
    let len = u32::try_from(bytes.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "record field exceeds u32 length")
    })?;
    w.write_u32::<BigEndian>(len)?;
    w.write_all(&bytes)?;
    Ok(())
}

fn read_blob<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T, ComputeError> {
    let len = r.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

#[cfg(test)]
mod store_tests {
    use itertools::Itertools;
    use quickcheck_macros::quickcheck;
    use rustc_hash::FxHashSet;

    use super::*;
    use crate::core::vertex::Edge;

    type Store = VertexStore<u64, i64, ()>;

    fn record(id: u64, value: i64, targets: &[u64]) -> VertexRecord<u64, i64, ()> {
        let edges = targets.iter().map(|t| Edge::new(*t, ())).collect();
        VertexRecord::new(id, value, edges)
    }

    fn both_kinds() -> [Store; 2] {
        [Store::new(IndexKind::Hash), Store::new(IndexKind::Ordered)]
    }

    #[test]
    fn put_returns_previous_record() {
        for store in both_kinds() {
            assert!(store.put(record(1, 10, &[2])).is_none());
            let prev = store.put(record(1, 20, &[3])).unwrap();
            assert_eq!(*prev.value(), 10);
            assert_eq!(*store.get(&1).unwrap().value(), 20);
        }
    }

    #[test]
    fn get_does_not_allocate_on_miss() {
        for store in both_kinds() {
            assert!(store.get(&42).is_none());
            assert_eq!(store.vertex_count(), 0);
        }
    }

    #[test]
    fn remove_returns_the_record() {
        for store in both_kinds() {
            store.put(record(1, 10, &[]));
            let removed = store.remove(&1).unwrap();
            assert_eq!(*removed.id(), 1);
            assert!(store.get(&1).is_none());
            assert!(store.remove(&1).is_none());
        }
    }

    #[test]
    fn iterate_never_yields_duplicate_ids() {
        for store in both_kinds() {
            for id in 0..100u64 {
                store.put(record(id, 0, &[id + 1]));
            }
            // overwrite half of them
            for id in 0..50u64 {
                store.put(record(id, 1, &[]));
            }
            let ids: Vec<u64> = store.iterate().map(|r| *r.id()).collect();
            let unique: FxHashSet<u64> = ids.iter().copied().collect();
            assert_eq!(ids.len(), unique.len());
            assert_eq!(ids.len(), 100);
        }
    }

    #[test]
    fn ordered_store_iterates_in_id_order() {
        let store = Store::new(IndexKind::Ordered);
        for id in [5u64, 1, 9, 3] {
            store.put(record(id, 0, &[]));
        }
        let ids: Vec<u64> = store.iterate().map(|r| *r.id()).collect();
        assert_eq!(ids, vec![1, 3, 5, 9]);
    }

    #[test]
    fn counts() {
        for store in both_kinds() {
            store.put(record(1, 0, &[2, 3]));
            store.put(record(2, 0, &[1]));
            assert_eq!(store.vertex_count(), 2);
            assert_eq!(store.edge_count(), 3);
        }
    }

    #[test]
    fn merge_is_last_writer_wins() {
        let left = Store::new(IndexKind::Hash);
        left.put(record(1, 10, &[]));
        left.put(record(2, 20, &[]));

        let right = Store::new(IndexKind::Ordered);
        right.put(record(2, 99, &[5]));
        right.put(record(3, 30, &[]));

        left.merge(right);
        assert_eq!(left.vertex_count(), 3);
        assert_eq!(*left.get(&2).unwrap().value(), 99);
        assert_eq!(left.get(&2).unwrap().num_edges(), 1);
    }

    #[test]
    fn round_trip_preserves_records_and_halt_state() {
        for (kind, reload_kind) in [
            (IndexKind::Hash, IndexKind::Ordered),
            (IndexKind::Ordered, IndexKind::Hash),
        ] {
            let store: VertexStore<u64, i64, f32> = VertexStore::new(kind);
            store.put(VertexRecord::new(1, 10, vec![Edge::new(2, 0.5)]));
            store.put(VertexRecord::new(2, -3, vec![Edge::new(1, 1.5), Edge::new(3, 2.5)]));
            let mut halted = VertexRecord::new(3, 7, vec![]);
            halted.vote_to_halt();
            store.put(halted);

            let mut bytes = Vec::new();
            store.write_to(&mut bytes).unwrap();
            let reloaded: VertexStore<u64, i64, f32> =
                VertexStore::read_from(reload_kind, &mut bytes.as_slice()).unwrap();

            let original: Vec<_> = store.iterate().sorted_by_key(|r| *r.id()).collect();
            let restored: Vec<_> = reloaded.iterate().sorted_by_key(|r| *r.id()).collect();
            assert_eq!(original, restored);
            assert!(!reloaded.get(&3).unwrap().is_active());
        }
    }

    #[test]
    fn duplicate_id_in_stream_is_fatal() {
        let store = Store::new(IndexKind::Hash);
        store.put(record(7, 1, &[8]));
        let mut bytes = Vec::new();
        store.write_to(&mut bytes).unwrap();

        // splice the single record in twice under a count of 2
        let record_bytes = &bytes[4..];
        let mut corrupt = Vec::new();
        corrupt.extend_from_slice(&2u32.to_be_bytes());
        corrupt.extend_from_slice(record_bytes);
        corrupt.extend_from_slice(record_bytes);

        let err = Store::read_from(IndexKind::Hash, &mut corrupt.as_slice()).unwrap_err();
        assert!(matches!(err, ComputeError::DuplicateVertex { .. }));
    }

    #[test]
    fn truncated_stream_is_an_io_error() {
        let store = Store::new(IndexKind::Hash);
        store.put(record(7, 1, &[8]));
        let mut bytes = Vec::new();
        store.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);

        let err = Store::read_from(IndexKind::Hash, &mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ComputeError::Io(_)));
    }

    #[quickcheck]
    fn round_trip_any_shard(entries: Vec<(u64, i64)>) -> bool {
        let store = Store::new(IndexKind::Hash);
        for (id, value) in entries.iter().unique_by(|(id, _)| *id) {
            store.put(record(*id, *value, &[id.wrapping_add(1)]));
        }
        let mut bytes = Vec::new();
        store.write_to(&mut bytes).unwrap();
        let reloaded = Store::read_from(IndexKind::Ordered, &mut bytes.as_slice()).unwrap();

        let original: Vec<_> = store.iterate().sorted_by_key(|r| *r.id()).collect();
        let restored: Vec<_> = reloaded.iterate().sorted_by_key(|r| *r.id()).collect();
        original == restored
    }
}
