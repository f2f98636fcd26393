//! Distributed registry of boxes owned by arbitrary ranks.
//!
//! Entries are added locally, then [`BoxManager::assemble`] makes every entry
//! that intersects one of the registered gather regions visible on this rank.
//! Assembly never talks to all ranks: local entries are published to the
//! ranks of the [`AssumedPartition`] regions they touch, and gather regions are
//! sent to the same rendezvous ranks, which answer with what was published to
//! them. The number of peers contacted per rank depends on the geometry of
//! the local boxes, not on the total number of ranks.
//!
//! After assembly the manager is read-only. Queries go through per-axis
//! breakpoint tables: each axis is cut at every entry's `imin` and `imax + 1`,
//! and every cell of the resulting grid lists the entries covering it.

use std::sync::Arc;

use log::debug;

use super::assumed_partition::AssumedPartition;
use super::boxes::{BoxArray, GridBox};
use super::index::{Index, MAX_DIM};
use crate::error::MgError;
use crate::parallel::{Comm, Message};

const TAG_PUBLISH: i32 = 101;
const TAG_QUERY: i32 = 102;
const TAG_REPLY: i32 = 103;

/// A box owned by rank `proc`, keyed by `(proc, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxManEntry {
    bx: GridBox,
    proc: usize,
    id: usize,
    num_ghost: [i32; 2 * MAX_DIM],
    position: usize,
}

impl BoxManEntry {
    pub fn grid_box(&self) -> &GridBox {
        &self.bx
    }

    pub fn imin(&self) -> Index {
        self.bx.imin()
    }

    pub fn imax(&self) -> Index {
        self.bx.imax()
    }

    pub fn proc(&self) -> usize {
        self.proc
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn num_ghost(&self) -> [i32; 2 * MAX_DIM] {
        self.num_ghost
    }

    /// Slot of this entry in the manager (entries are ordered by `(proc, id)`
    /// once assembled).
    pub fn position(&self) -> usize {
        self.position
    }

    fn key(&self) -> (usize, usize) {
        (self.proc, self.id)
    }
}

/// Peers contacted during the last assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub publish_contacts: usize,
    pub query_contacts: usize,
    pub replies_sent: usize,
}

pub struct BoxManager<C: Comm> {
    comm: C,
    ndim: usize,
    info_size: usize,
    bounding_box: GridBox,
    entries: Vec<BoxManEntry>,
    infos: Vec<u8>,
    num_ghost: [i32; 2 * MAX_DIM],
    gather_regions: BoxArray,
    all_global_known: bool,
    assumed_partition: Option<Arc<AssumedPartition>>,
    is_assembled: bool,
    indexes: [Vec<i32>; MAX_DIM],
    cell_ptr: Vec<usize>,
    cell_entries: Vec<usize>,
    stats: AssemblyStats,
}

impl<C: Comm> BoxManager<C> {
    /// `info_size` is the fixed byte size of every entry's payload (0 for none).
    pub fn new(max_entries: usize, info_size: usize, ndim: usize, bounding_box: GridBox, comm: C) -> Result<Self, MgError> {
        if ndim == 0 || ndim > MAX_DIM {
            return Err(MgError::InvalidDimension(ndim));
        }
        if bounding_box.ndim() != ndim {
            return Err(MgError::DimensionMismatch { expected: ndim, found: bounding_box.ndim() });
        }
        Ok(BoxManager {
            comm,
            ndim,
            info_size,
            bounding_box,
            entries: Vec::with_capacity(max_entries),
            infos: Vec::with_capacity(max_entries * info_size),
            num_ghost: [0; 2 * MAX_DIM],
            gather_regions: BoxArray::new(),
            all_global_known: false,
            assumed_partition: None,
            is_assembled: false,
            indexes: Default::default(),
            cell_ptr: Vec::new(),
            cell_entries: Vec::new(),
            stats: AssemblyStats::default(),
        })
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn info_size(&self) -> usize {
        self.info_size
    }

    pub fn bounding_box(&self) -> &GridBox {
        &self.bounding_box
    }

    pub fn is_assembled(&self) -> bool {
        self.is_assembled
    }

    pub fn stats(&self) -> AssemblyStats {
        self.stats
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    fn ensure_open(&self) -> Result<(), MgError> {
        if self.is_assembled {
            Err(MgError::AlreadyAssembled("box manager"))
        } else {
            Ok(())
        }
    }

    fn ensure_assembled(&self) -> Result<(), MgError> {
        if self.is_assembled {
            Ok(())
        } else {
            Err(MgError::NotAssembled("box manager"))
        }
    }

    /// Ghost widths recorded on entries added from now on.
    pub fn set_num_ghost(&mut self, num_ghost: [i32; 2 * MAX_DIM]) {
        self.num_ghost = num_ghost;
    }

    /// Declare that every rank has added every entry, which skips the
    /// gathering exchange.
    pub fn set_all_global_known(&mut self, known: bool) {
        self.all_global_known = known;
    }

    pub fn set_assumed_partition(&mut self, ap: Arc<AssumedPartition>) {
        self.assumed_partition = Some(ap);
    }

    pub fn assumed_partition(&self) -> Option<&Arc<AssumedPartition>> {
        self.assumed_partition.as_ref()
    }

    pub fn add_entry(&mut self, imin: Index, imax: Index, proc: usize, id: usize, info: &[u8]) -> Result<(), MgError> {
        self.ensure_open()?;
        if info.len() != self.info_size {
            return Err(MgError::InfoSize { expected: self.info_size, found: info.len() });
        }
        let bx = GridBox::new(imin, imax, self.ndim)?;
        let position = self.entries.len();
        self.entries.push(BoxManEntry { bx, proc, id, num_ghost: self.num_ghost, position });
        self.infos.extend_from_slice(info);
        Ok(())
    }

    /// Remove entries by position before assembly.
    pub fn delete_multiple_entries(&mut self, positions: &[usize]) -> Result<(), MgError> {
        self.ensure_open()?;
        let mut kept = Vec::with_capacity(self.entries.len());
        let mut kept_infos = Vec::with_capacity(self.infos.len());
        for (k, e) in self.entries.iter().enumerate() {
            if positions.contains(&k) {
                continue;
            }
            let mut e = e.clone();
            e.position = kept.len();
            kept_infos.extend_from_slice(&self.infos[k * self.info_size..(k + 1) * self.info_size]);
            kept.push(e);
        }
        self.entries = kept;
        self.infos = kept_infos;
        Ok(())
    }

    /// Request that entries intersecting `[imin, imax]` be gathered at assembly.
    pub fn gather_entries(&mut self, imin: Index, imax: Index) -> Result<(), MgError> {
        self.ensure_open()?;
        self.gather_regions.append(GridBox::new(imin, imax, self.ndim)?);
        Ok(())
    }

    /// Collective. A second call without intervening changes does nothing.
    pub fn assemble(&mut self) -> Result<(), MgError> {
        if self.is_assembled {
            return Ok(());
        }
        let needs_exchange = !self.all_global_known && self.comm.size() > 1 && !self.bounding_box.is_empty();
        if needs_exchange {
            self.gather_remote()?;
        }
        self.sort_and_dedupe();
        self.build_index_table();
        self.gather_regions = BoxArray::new();
        self.is_assembled = true;
        debug!(
            "rank {}: box manager assembled with {} entries ({} publish peers, {} query peers)",
            self.comm.rank(),
            self.entries.len(),
            self.stats.publish_contacts,
            self.stats.query_contacts
        );
        Ok(())
    }

    fn gather_remote(&mut self) -> Result<(), MgError> {
        let rank = self.comm.rank();
        let nprocs = self.comm.size();
        let ap = match &self.assumed_partition {
            Some(ap) => ap.clone(),
            None => {
                let ap = Arc::new(AssumedPartition::new(self.bounding_box, nprocs)?);
                self.assumed_partition = Some(ap.clone());
                ap
            }
        };

        // Publish local entries to their rendezvous ranks.
        let mut outgoing: Vec<Vec<i64>> = vec![Vec::new(); nprocs];
        for e in self.entries.iter().filter(|e| e.proc == rank && !e.bx.is_empty()) {
            for r in ap.ranks_for_box(&e.bx) {
                self.encode_entry(e, &mut outgoing[r]);
            }
        }
        let outgoing = into_messages(outgoing);
        self.stats.publish_contacts = outgoing.len();
        let published = self.comm.sparse_exchange(TAG_PUBLISH, outgoing)?;
        let mut directory = Vec::new();
        for m in &published {
            directory.extend(self.decode_entries(&m.data)?);
        }

        // Ask the rendezvous ranks for entries touching the gather regions.
        let mut queries: Vec<Vec<i64>> = vec![Vec::new(); nprocs];
        for region in self.gather_regions.iter().filter(|b| !b.is_empty()) {
            for r in ap.ranks_for_box(region) {
                queries[r].extend(region.imin().0.iter().chain(region.imax().0.iter()).map(|&v| v as i64));
            }
        }
        let queries = into_messages(queries);
        self.stats.query_contacts = queries.len();
        let received = self.comm.sparse_exchange(TAG_QUERY, queries)?;

        let mut replies = Vec::with_capacity(received.len());
        for q in &received {
            let mut hits: Vec<usize> = Vec::new();
            for chunk in q.data.chunks_exact(2 * MAX_DIM) {
                let qmin = Index([chunk[0] as i32, chunk[1] as i32, chunk[2] as i32]);
                let qmax = Index([chunk[3] as i32, chunk[4] as i32, chunk[5] as i32]);
                let region = GridBox::new(qmin, qmax, self.ndim)?;
                hits.extend(
                    directory
                        .iter()
                        .enumerate()
                        .filter(|(_, (e, _))| e.bx.overlaps(&region))
                        .map(|(k, _)| k),
                );
            }
            hits.sort_unstable();
            hits.dedup();
            let mut data = Vec::new();
            for k in hits {
                let (e, info) = &directory[k];
                self.encode_with_info(e, info, &mut data);
            }
            replies.push(Message { peer: q.peer, data });
        }
        self.stats.replies_sent = replies.len();
        let answers = self.comm.sparse_exchange(TAG_REPLY, replies)?;
        for m in &answers {
            for (mut e, info) in self.decode_entries(&m.data)? {
                if e.proc == rank {
                    continue;
                }
                e.position = self.entries.len();
                self.entries.push(e);
                self.infos.extend_from_slice(&info);
            }
        }
        Ok(())
    }

    fn record_len(&self) -> usize {
        2 + 2 * MAX_DIM + 2 * MAX_DIM + self.info_size.div_ceil(8)
    }

    fn encode_entry(&self, e: &BoxManEntry, out: &mut Vec<i64>) {
        let info = &self.infos[e.position * self.info_size..(e.position + 1) * self.info_size];
        self.encode_with_info(e, info, out);
    }

    fn encode_with_info(&self, e: &BoxManEntry, info: &[u8], out: &mut Vec<i64>) {
        out.push(e.proc as i64);
        out.push(e.id as i64);
        out.extend(e.bx.imin().0.iter().map(|&v| v as i64));
        out.extend(e.bx.imax().0.iter().map(|&v| v as i64));
        out.extend(e.num_ghost.iter().map(|&v| v as i64));
        for chunk in info.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            out.push(i64::from_le_bytes(word));
        }
    }

    fn decode_entries(&self, data: &[i64]) -> Result<Vec<(BoxManEntry, Vec<u8>)>, MgError> {
        let len = self.record_len();
        if data.len() % len != 0 {
            return Err(MgError::Transport(format!(
                "box manager record stream of {} words is not a multiple of {len}",
                data.len()
            )));
        }
        let mut out = Vec::with_capacity(data.len() / len);
        for rec in data.chunks_exact(len) {
            let imin = Index([rec[2] as i32, rec[3] as i32, rec[4] as i32]);
            let imax = Index([rec[5] as i32, rec[6] as i32, rec[7] as i32]);
            let mut num_ghost = [0i32; 2 * MAX_DIM];
            for (g, v) in num_ghost.iter_mut().zip(&rec[8..14]) {
                *g = *v as i32;
            }
            let mut info: Vec<u8> = rec[14..].iter().flat_map(|w| w.to_le_bytes()).collect();
            info.truncate(self.info_size);
            let entry = BoxManEntry {
                bx: GridBox::new(imin, imax, self.ndim)?,
                proc: rec[0] as usize,
                id: rec[1] as usize,
                num_ghost,
                position: 0,
            };
            out.push((entry, info));
        }
        Ok(out)
    }

    /// Order entries by `(proc, id)`; of duplicate keys the last added wins.
    fn sort_and_dedupe(&mut self) {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&k| self.entries[k].key());
        let mut kept: Vec<BoxManEntry> = Vec::with_capacity(order.len());
        let mut kept_infos = Vec::with_capacity(self.infos.len());
        for (n, &k) in order.iter().enumerate() {
            let is_last_of_key = order.get(n + 1).is_none_or(|&next| self.entries[next].key() != self.entries[k].key());
            if !is_last_of_key {
                continue;
            }
            let mut e = self.entries[k].clone();
            e.position = kept.len();
            kept_infos.extend_from_slice(&self.infos[k * self.info_size..(k + 1) * self.info_size]);
            kept.push(e);
        }
        self.entries = kept;
        self.infos = kept_infos;
    }

    fn build_index_table(&mut self) {
        let ndim = self.ndim;
        let live: Vec<&BoxManEntry> = self.entries.iter().filter(|e| !e.bx.is_empty()).collect();
        let mut indexes: [Vec<i32>; MAX_DIM] = Default::default();
        for (d, axis) in indexes.iter_mut().enumerate().take(ndim) {
            for e in &live {
                axis.push(e.bx.imin()[d]);
                axis.push(e.bx.imax()[d] + 1);
            }
            axis.sort_unstable();
            axis.dedup();
        }
        let ncells = cell_counts(&indexes, ndim);
        let total: usize = if live.is_empty() { 0 } else { ncells.iter().product() };

        // Two passes over each entry's cell block: count, then fill.
        let mut cell_ptr = vec![0usize; total + 1];
        let mut spans = Vec::with_capacity(live.len());
        for e in &live {
            let mut span = [(0usize, 1usize); MAX_DIM];
            for d in 0..ndim {
                let lo = indexes[d].partition_point(|&x| x < e.bx.imin()[d]);
                let hi = indexes[d].partition_point(|&x| x < e.bx.imax()[d] + 1);
                span[d] = (lo, hi);
            }
            for_each_cell(&span, &ncells, |c| cell_ptr[c + 1] += 1);
            spans.push(span);
        }
        for c in 0..total {
            cell_ptr[c + 1] += cell_ptr[c];
        }
        let mut fill = cell_ptr.clone();
        let mut cell_entries = vec![0usize; cell_ptr[total]];
        for (e, span) in live.iter().zip(&spans) {
            for_each_cell(span, &ncells, |c| {
                cell_entries[fill[c]] = e.position;
                fill[c] += 1;
            });
        }
        self.indexes = indexes;
        self.cell_ptr = cell_ptr;
        self.cell_entries = cell_entries;
    }

    /// Entries overlapping `[imin, imax]`, ordered by `(proc, id)`.
    pub fn intersect(&self, imin: Index, imax: Index) -> Result<Vec<&BoxManEntry>, MgError> {
        self.ensure_assembled()?;
        let query = GridBox::new(imin, imax, self.ndim)?;
        if query.is_empty() || self.cell_entries.is_empty() {
            return Ok(Vec::new());
        }
        let ncells = cell_counts(&self.indexes, self.ndim);
        let mut span = [(0usize, 1usize); MAX_DIM];
        for d in 0..self.ndim {
            let axis = &self.indexes[d];
            // Cell c covers [axis[c], axis[c + 1]).
            let first = axis.partition_point(|&x| x <= query.imin()[d]);
            let last = axis.partition_point(|&x| x <= query.imax()[d]);
            let lo = first.saturating_sub(1);
            let hi = last.min(ncells[d]);
            if hi == 0 || lo >= ncells[d] || lo >= hi {
                return Ok(Vec::new());
            }
            span[d] = (lo, hi);
        }
        let mut hits = Vec::new();
        for_each_cell(&span, &ncells, |c| {
            hits.extend_from_slice(&self.cell_entries[self.cell_ptr[c]..self.cell_ptr[c + 1]]);
        });
        hits.sort_unstable();
        hits.dedup();
        Ok(hits.into_iter().map(|p| &self.entries[p]).collect())
    }

    pub fn intersect_box(&self, query: &GridBox) -> Result<Vec<&BoxManEntry>, MgError> {
        self.intersect(query.imin(), query.imax())
    }

    pub fn get_entry(&self, proc: usize, id: usize) -> Result<&BoxManEntry, MgError> {
        self.ensure_assembled()?;
        self.entries
            .binary_search_by_key(&(proc, id), BoxManEntry::key)
            .map(|k| &self.entries[k])
            .map_err(|_| MgError::EntryNotFound { proc, id })
    }

    /// Payload bytes of an entry of this manager.
    pub fn entry_info(&self, entry: &BoxManEntry) -> &[u8] {
        &self.infos[entry.position * self.info_size..(entry.position + 1) * self.info_size]
    }

    pub fn get_all_entries(&self) -> Result<&[BoxManEntry], MgError> {
        self.ensure_assembled()?;
        Ok(&self.entries)
    }

    pub fn get_local_entries(&self) -> Result<Vec<&BoxManEntry>, MgError> {
        self.ensure_assembled()?;
        let rank = self.comm.rank();
        Ok(self.entries.iter().filter(|e| e.proc == rank).collect())
    }

    pub fn get_all_entries_boxes(&self) -> Result<BoxArray, MgError> {
        self.ensure_assembled()?;
        Ok(BoxArray::from(self.entries.iter().map(|e| e.bx).collect::<Vec<_>>()))
    }
}

fn into_messages(per_rank: Vec<Vec<i64>>) -> Vec<Message<i64>> {
    per_rank
        .into_iter()
        .enumerate()
        .filter(|(_, data)| !data.is_empty())
        .map(|(peer, data)| Message { peer, data })
        .collect()
}

fn cell_counts(indexes: &[Vec<i32>; MAX_DIM], ndim: usize) -> [usize; MAX_DIM] {
    let mut n = [1usize; MAX_DIM];
    for d in 0..ndim {
        n[d] = indexes[d].len().saturating_sub(1);
    }
    n
}

/// Visit every x-fastest cell number in the product of half-open spans.
fn for_each_cell(span: &[(usize, usize); MAX_DIM], ncells: &[usize; MAX_DIM], mut f: impl FnMut(usize)) {
    for k in span[2].0..span[2].1 {
        for j in span[1].0..span[1].1 {
            for i in span[0].0..span[0].1 {
                f(i + ncells[0] * (j + ncells[1] * k));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ThreadComm;

    fn idx(v: &[i32]) -> Index {
        Index::from_slice(v)
    }

    fn serial_manager(info_size: usize) -> BoxManager<ThreadComm> {
        let bbox = GridBox::from_bounds(&[0, 0], &[15, 15]).unwrap();
        BoxManager::new(8, info_size, 2, bbox, ThreadComm::serial()).unwrap()
    }

    #[test]
    fn queries_fail_before_assembly() {
        let mut bm = serial_manager(0);
        bm.add_entry(idx(&[0, 0]), idx(&[3, 3]), 0, 0, &[]).unwrap();
        assert!(matches!(bm.intersect(idx(&[0, 0]), idx(&[1, 1])), Err(MgError::NotAssembled(_))));
        assert!(matches!(bm.get_entry(0, 0), Err(MgError::NotAssembled(_))));
        bm.assemble().unwrap();
        assert!(matches!(bm.add_entry(idx(&[0, 0]), idx(&[1, 1]), 0, 1, &[]), Err(MgError::AlreadyAssembled(_))));
        // idempotent
        bm.assemble().unwrap();
        assert_eq!(bm.num_entries(), 1);
    }

    #[test]
    fn info_size_is_enforced() {
        let mut bm = serial_manager(4);
        assert!(matches!(
            bm.add_entry(idx(&[0, 0]), idx(&[1, 1]), 0, 0, &[1, 2]),
            Err(MgError::InfoSize { expected: 4, found: 2 })
        ));
        bm.add_entry(idx(&[0, 0]), idx(&[1, 1]), 0, 0, &[1, 2, 3, 4]).unwrap();
        bm.assemble().unwrap();
        let e = bm.get_entry(0, 0).unwrap();
        assert_eq!(bm.entry_info(e), &[1, 2, 3, 4]);
    }

    #[test]
    fn intersect_and_lookup() {
        let mut bm = serial_manager(0);
        let boxes = [([0, 0], [7, 7]), ([8, 0], [15, 7]), ([0, 8], [15, 15]), ([4, 4], [9, 9])];
        for (k, (lo, hi)) in boxes.iter().enumerate() {
            bm.add_entry(idx(lo), idx(hi), k % 2, k, &[]).unwrap();
        }
        bm.assemble().unwrap();
        for (k, (lo, hi)) in boxes.iter().enumerate() {
            let found = bm.intersect(idx(lo), idx(hi)).unwrap();
            assert!(found.iter().any(|e| e.id() == k));
            let e = bm.get_entry(k % 2, k).unwrap();
            assert_eq!(e.grid_box(), &GridBox::from_bounds(lo, hi).unwrap());
        }
        let hits: Vec<usize> = bm.intersect(idx(&[7, 7]), idx(&[8, 8])).unwrap().iter().map(|e| e.id()).collect();
        // Sorted by (proc, id): proc 0 has ids 0 and 2, proc 1 has 1 and 3.
        assert_eq!(hits, vec![0, 2, 1, 3]);
        assert!(bm.intersect(idx(&[20, 20]), idx(&[30, 30])).unwrap().is_empty());
        assert!(matches!(bm.get_entry(5, 5), Err(MgError::EntryNotFound { proc: 5, id: 5 })));
    }

    #[test]
    fn duplicate_keys_keep_last() {
        let mut bm = serial_manager(1);
        bm.add_entry(idx(&[0, 0]), idx(&[1, 1]), 0, 3, &[1]).unwrap();
        bm.add_entry(idx(&[2, 2]), idx(&[3, 3]), 0, 3, &[2]).unwrap();
        bm.assemble().unwrap();
        assert_eq!(bm.num_entries(), 1);
        let e = bm.get_entry(0, 3).unwrap();
        assert_eq!(e.imin(), idx(&[2, 2]));
        assert_eq!(bm.entry_info(e), &[2]);
        assert!(bm.intersect(idx(&[0, 0]), idx(&[1, 1])).unwrap().is_empty());
    }

    #[test]
    fn bulk_delete_before_assembly() {
        let mut bm = serial_manager(0);
        for k in 0..3 {
            bm.add_entry(idx(&[k, 0]), idx(&[k, 0]), 0, k as usize, &[]).unwrap();
        }
        bm.delete_multiple_entries(&[1]).unwrap();
        bm.assemble().unwrap();
        let ids: Vec<usize> = bm.get_all_entries().unwrap().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn two_rank_gather() {
        let out = ThreadComm::run(2, |comm| {
            let rank = comm.rank() as i32;
            let bbox = GridBox::from_bounds(&[0, 0], &[15, 3]).unwrap();
            let mut bm = BoxManager::new(1, 2, 2, bbox, comm.clone()).unwrap();
            let lo = [8 * rank, 0];
            let hi = [8 * rank + 7, 3];
            bm.add_entry(idx(&lo), idx(&hi), rank as usize, 0, &[rank as u8, 9]).unwrap();
            let region = GridBox::from_bounds(&lo, &hi).unwrap().grow_by_value(1);
            bm.gather_entries(region.imin(), region.imax()).unwrap();
            bm.assemble().unwrap();
            let other = 1 - rank as usize;
            let e = bm.get_entry(other, 0).unwrap().clone();
            (e.proc(), bm.entry_info(&e).to_vec(), bm.num_entries())
        });
        assert_eq!(out[0], (1, vec![1, 9], 2));
        assert_eq!(out[1], (0, vec![0, 9], 2));
    }
}
