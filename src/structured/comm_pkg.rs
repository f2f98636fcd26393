//! Compiled, rank-local communication plans.
//!
//! A [`CommPkg`] turns the symbolic regions of a [`CommInfo`] into strided
//! traversals of concrete data arrays. Data arrays hold one block per box of
//! a [`DataSpace`]; inside a block the values of a point are `volume` apart
//! (value-major) and points are ordered x-fastest.
//!
//! For every peer there is one [`CommType`], so one message per peer and
//! exchange. Regions addressed to this rank itself are moved into
//! `copy_from_type` / `copy_to_type` and never touch the transport.

use std::collections::BTreeMap;

use log::debug;
use num_traits::NumAssign;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::boxes::{BoxArray, GridBox};
use super::comm_info::{CommInfo, CommRegion, Transform};
use super::index::{Index, MAX_DIM};
use crate::error::MgError;
use crate::parallel::{Comm, Payload};

/// Values that can be exchanged and accumulated.
pub trait CommValue: Payload + NumAssign {}
impl<T: Payload + NumAssign> CommValue for T {}

/// Layout of a data array: one ghost-padded box per local box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpace {
    boxes: BoxArray,
    starts: Vec<usize>,
    num_values: usize,
    len: usize,
}

impl DataSpace {
    pub fn new(boxes: BoxArray, num_values: usize) -> Self {
        let mut starts = Vec::with_capacity(boxes.len());
        let mut len = 0;
        for b in boxes.iter() {
            starts.push(len);
            len += b.volume() * num_values;
        }
        DataSpace { boxes, starts, num_values, len }
    }

    pub fn boxes(&self) -> &BoxArray {
        &self.boxes
    }

    pub fn data_box(&self, i: usize) -> Option<&GridBox> {
        self.boxes.get(i)
    }

    /// Offset of box `i`'s block in the data array.
    pub fn start(&self, i: usize) -> usize {
        self.starts[i]
    }

    pub fn num_values(&self) -> usize {
        self.num_values
    }

    /// Required length of a data array with this layout.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Strided traversal of one region in one data array.
///
/// The `dim` leading entries of `length_array` / `stride_array` are used;
/// axes of length one are dropped and contiguous axes merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommEntry {
    pub offset: usize,
    pub dim: usize,
    pub length_array: [usize; MAX_DIM],
    pub stride_array: [isize; MAX_DIM],
    /// Offset of each transferred value relative to value 0, in transfer order.
    pub imap: Vec<usize>,
}

impl CommEntry {
    fn build(
        region: &GridBox,
        data_box: &GridBox,
        start: usize,
        stride: &Index,
        transform: &Transform,
        order: &[i32],
    ) -> Result<Self, MgError> {
        let ndim = region.ndim();
        if region.is_empty() {
            return Err(MgError::Unsupported("empty communication region"));
        }
        if !data_box.contains_box(region) {
            return Err(MgError::Unsupported("communication region outside its data box"));
        }
        let mut seen = [false; MAX_DIM];
        for &a in &transform.coords[..ndim] {
            if a >= ndim || seen[a] {
                return Err(MgError::Unsupported("transform coords are not a permutation"));
            }
            seen[a] = true;
        }

        let mut axis_stride = [0isize; MAX_DIM];
        let mut acc = 1isize;
        for (d, s) in axis_stride.iter_mut().enumerate().take(ndim) {
            *s = acc;
            acc *= data_box.size_d(d) as isize;
        }

        let mut first = region.imin();
        let mut raw = Vec::with_capacity(ndim);
        for t in 0..ndim {
            let a = transform.coords[t];
            let step = stride[a].max(1) as usize;
            let n = (region.size_d(a) - 1) / step + 1;
            let dir = if transform.dirs[t] < 0 { -1 } else { 1 };
            if dir < 0 {
                first[a] = region.imin()[a] + ((n - 1) * step) as i32;
            }
            raw.push((n, dir * step as isize * axis_stride[a]));
        }

        let mut merged: Vec<(usize, isize)> = Vec::with_capacity(ndim);
        for (n, s) in raw.into_iter().filter(|&(n, _)| n > 1) {
            match merged.last_mut() {
                Some(last) if last.1 * last.0 as isize == s => last.0 *= n,
                _ => merged.push((n, s)),
            }
        }
        let mut length_array = [1usize; MAX_DIM];
        let mut stride_array = [0isize; MAX_DIM];
        for (t, (n, s)) in merged.iter().enumerate() {
            length_array[t] = *n;
            stride_array[t] = *s;
        }
        let vol = data_box.volume();
        Ok(CommEntry {
            offset: start + data_box.index_rank(&first),
            dim: merged.len(),
            length_array,
            stride_array,
            imap: order.iter().filter(|&&v| v >= 0).map(|&v| v as usize * vol).collect(),
        })
    }

    /// Points traversed per value.
    pub fn volume(&self) -> usize {
        self.length_array.iter().product()
    }

    /// Buffer slots used by this entry.
    pub fn len(&self) -> usize {
        self.volume() * self.imap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest data index touched, plus one.
    fn extent(&self) -> usize {
        let Some(&max_map) = self.imap.iter().max() else {
            return 0;
        };
        let mut hi = self.offset as isize + max_map as isize;
        for t in 0..MAX_DIM {
            if self.stride_array[t] > 0 {
                hi += self.stride_array[t] * (self.length_array[t] as isize - 1);
            }
        }
        hi as usize + 1
    }

    fn for_each_offset(&self, mut f: impl FnMut(usize)) {
        let [n0, n1, n2] = self.length_array;
        let [s0, s1, s2] = self.stride_array;
        for &m in &self.imap {
            let base = self.offset as isize + m as isize;
            for k in 0..n2 as isize {
                for j in 0..n1 as isize {
                    let row = base + j * s1 + k * s2;
                    for i in 0..n0 as isize {
                        f((row + i * s0) as usize);
                    }
                }
            }
        }
    }

    fn pack<T: Copy>(&self, src: &[T], out: &mut [T]) {
        let mut n = 0;
        self.for_each_offset(|o| {
            out[n] = src[o];
            n += 1;
        });
    }

    fn unpack<T: CommValue>(&self, buf: &[T], dst: &mut [T], action: CommAction) {
        let mut n = 0;
        self.for_each_offset(|o| {
            match action {
                CommAction::Set => dst[o] = buf[n],
                CommAction::Add => dst[o] += buf[n],
            }
            n += 1;
        });
    }
}

/// How received values are combined with the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommAction {
    /// Overwrite.
    Set,
    /// Accumulate.
    Add,
}

/// Entries addressing one data array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommBlock {
    pub block: usize,
    pub entries: Vec<CommEntry>,
}

impl CommBlock {
    pub fn bufsize(&self) -> usize {
        self.entries.iter().map(CommEntry::len).sum()
    }
}

/// Everything exchanged with one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommType {
    pub proc: usize,
    pub blocks: Vec<CommBlock>,
}

impl CommType {
    fn new(proc: usize) -> Self {
        CommType { proc, blocks: Vec::new() }
    }

    pub fn bufsize(&self) -> usize {
        self.blocks.iter().map(CommBlock::bufsize).sum()
    }

    pub fn num_entries(&self) -> usize {
        self.blocks.iter().map(|b| b.entries.len()).sum()
    }

    /// Gather every entry into one buffer, in block then entry order.
    pub fn pack<T: Payload>(&self, data: &[&[T]]) -> Result<Vec<T>, MgError> {
        let mut buf = vec![T::default(); self.bufsize()];
        {
            let mut jobs: Vec<(&CommEntry, &[T], &mut [T])> = Vec::new();
            let mut rest: &mut [T] = &mut buf;
            for block in &self.blocks {
                let src: &[T] = data
                    .get(block.block)
                    .ok_or(MgError::DimensionMismatch { expected: block.block + 1, found: data.len() })?;
                for e in &block.entries {
                    let (head, tail) = std::mem::take(&mut rest).split_at_mut(e.len());
                    jobs.push((e, src, head));
                    rest = tail;
                }
            }
            #[cfg(feature = "rayon")]
            jobs.into_par_iter().for_each(|(e, src, out)| e.pack(src, out));
            #[cfg(not(feature = "rayon"))]
            jobs.into_iter().for_each(|(e, src, out)| e.pack(src, out));
        }
        Ok(buf)
    }

    /// Scatter a buffer produced by the matching peer's `pack`.
    pub fn unpack<T: CommValue>(&self, buf: &[T], data: &mut [&mut [T]], action: CommAction) -> Result<(), MgError> {
        if buf.len() != self.bufsize() {
            return Err(MgError::Transport(format!(
                "buffer from rank {} holds {} values, expected {}",
                self.proc,
                buf.len(),
                self.bufsize()
            )));
        }
        let mut pos = 0;
        for block in &self.blocks {
            let ndata = data.len();
            let dst = data
                .get_mut(block.block)
                .ok_or(MgError::DimensionMismatch { expected: block.block + 1, found: ndata })?;
            for e in &block.entries {
                let n = e.len();
                e.unpack(&buf[pos..pos + n], dst, action);
                pos += n;
            }
        }
        Ok(())
    }

    fn extents(&self, nblocks: usize) -> Vec<usize> {
        let mut ext = vec![0; nblocks];
        for b in &self.blocks {
            for e in &b.entries {
                ext[b.block] = ext[b.block].max(e.extent());
            }
        }
        ext
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommPkg {
    ndim: usize,
    num_values: usize,
    num_blocks: usize,
    send_types: Vec<CommType>,
    recv_types: Vec<CommType>,
    copy_from_type: CommType,
    copy_to_type: CommType,
    send_lens: Vec<usize>,
    recv_lens: Vec<usize>,
}

impl CommPkg {
    /// Compile `info` against concrete layouts.
    ///
    /// `orders[i]` lists the values of local box `i` in transfer order;
    /// negative entries are skipped. Both sides must transfer the same number
    /// of values per point. With `reverse` the exchange runs from the
    /// receive regions back to the send regions: the handle then packs arrays
    /// laid out like `recv_space` and unpacks into arrays laid out like
    /// `send_space`.
    pub fn new<C: Comm>(
        info: &CommInfo,
        send_space: &DataSpace,
        recv_space: &DataSpace,
        orders: Option<&[Vec<i32>]>,
        reverse: bool,
        comm: &C,
    ) -> Result<Self, MgError> {
        if send_space.num_values() != recv_space.num_values() {
            return Err(MgError::DimensionMismatch {
                expected: send_space.num_values(),
                found: recv_space.num_values(),
            });
        }
        let num_values = send_space.num_values();
        let default_order: Vec<i32> = (0..num_values as i32).collect();
        let order_for = |b: usize| orders.and_then(|o| o.get(b)).map_or(default_order.as_slice(), Vec::as_slice);

        let entries = |regions: &[CommRegion], space: &DataSpace, stride: &Index| -> Result<Vec<(usize, CommEntry)>, MgError> {
            regions
                .iter()
                .map(|r| -> Result<(usize, CommEntry), MgError> {
                    let data_box = space
                        .data_box(r.local_box)
                        .ok_or(MgError::DimensionMismatch { expected: r.local_box + 1, found: space.boxes().len() })?;
                    let transform = match r.transform {
                        Some(t) => *info
                            .transforms()
                            .get(t)
                            .ok_or(MgError::Unsupported("send region refers to a missing transform"))?,
                        None => Transform::IDENTITY,
                    };
                    let e = CommEntry::build(&r.region, data_box, space.start(r.local_box), stride, &transform, order_for(r.local_box))?;
                    Ok((r.proc, e))
                })
                .collect()
        };
        let send_side = entries(info.sends(), send_space, &info.send_stride())?;
        let recv_side = entries(info.recvs(), recv_space, &info.recv_stride())?;
        let (out_side, in_side, out_len, in_len) = if reverse {
            (recv_side, send_side, recv_space.len(), send_space.len())
        } else {
            (send_side, recv_side, send_space.len(), recv_space.len())
        };

        let rank = comm.rank();
        let (send_types, copy_from_type) = group_by_proc(out_side, rank);
        let (recv_types, copy_to_type) = group_by_proc(in_side, rank);
        if copy_from_type.bufsize() != copy_to_type.bufsize() {
            return Err(MgError::DimensionMismatch {
                expected: copy_from_type.bufsize(),
                found: copy_to_type.bufsize(),
            });
        }
        let pkg = CommPkg {
            ndim: info.ndim(),
            num_values,
            num_blocks: 1,
            send_types,
            recv_types,
            copy_from_type,
            copy_to_type,
            send_lens: vec![out_len],
            recv_lens: vec![in_len],
        };
        debug!(
            "rank {rank}: comm pkg with {} send peers ({} values), {} recv peers ({} values), {} local copies",
            pkg.send_types.len(),
            pkg.send_bufsize(),
            pkg.recv_types.len(),
            pkg.recv_bufsize(),
            pkg.copy_from_type.num_entries()
        );
        Ok(pkg)
    }

    /// One package exchanging all of `pkgs` at once; block `b` of the result
    /// addresses the data arrays of `pkgs[b]` (nested blocks are flattened).
    pub fn agglomerate(pkgs: &[CommPkg]) -> Result<Self, MgError> {
        let first = pkgs.first().ok_or(MgError::Unsupported("agglomerate of no packages"))?;
        let mut send: BTreeMap<usize, CommType> = BTreeMap::new();
        let mut recv: BTreeMap<usize, CommType> = BTreeMap::new();
        let mut copy_from = CommType::new(first.copy_from_type.proc);
        let mut copy_to = CommType::new(first.copy_to_type.proc);
        let mut send_lens = Vec::new();
        let mut recv_lens = Vec::new();
        let mut offset = 0;
        for p in pkgs {
            let shifted = |t: &CommType| -> Vec<CommBlock> {
                t.blocks
                    .iter()
                    .map(|b| CommBlock { block: b.block + offset, entries: b.entries.clone() })
                    .collect()
            };
            for t in &p.send_types {
                send.entry(t.proc).or_insert_with(|| CommType::new(t.proc)).blocks.extend(shifted(t));
            }
            for t in &p.recv_types {
                recv.entry(t.proc).or_insert_with(|| CommType::new(t.proc)).blocks.extend(shifted(t));
            }
            copy_from.blocks.extend(shifted(&p.copy_from_type));
            copy_to.blocks.extend(shifted(&p.copy_to_type));
            send_lens.extend_from_slice(&p.send_lens);
            recv_lens.extend_from_slice(&p.recv_lens);
            offset += p.num_blocks;
        }
        Ok(CommPkg {
            ndim: first.ndim,
            num_values: first.num_values,
            num_blocks: offset,
            send_types: send.into_values().collect(),
            recv_types: recv.into_values().collect(),
            copy_from_type: copy_from,
            copy_to_type: copy_to,
            send_lens,
            recv_lens,
        })
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn num_values(&self) -> usize {
        self.num_values
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Remote peers to send to, ascending.
    pub fn send_types(&self) -> &[CommType] {
        &self.send_types
    }

    /// Remote peers to receive from, ascending.
    pub fn recv_types(&self) -> &[CommType] {
        &self.recv_types
    }

    pub fn copy_from_type(&self) -> &CommType {
        &self.copy_from_type
    }

    pub fn copy_to_type(&self) -> &CommType {
        &self.copy_to_type
    }

    pub fn send_bufsize(&self) -> usize {
        self.send_types.iter().map(CommType::bufsize).sum()
    }

    pub fn recv_bufsize(&self) -> usize {
        self.recv_types.iter().map(CommType::bufsize).sum()
    }

    /// Check packed arrays against the send layouts.
    pub(crate) fn check_send_data<T>(&self, data: &[&[T]]) -> Result<(), MgError> {
        let lens: Vec<usize> = data.iter().map(|d| d.len()).collect();
        self.check_lens(&lens, &self.send_lens, self.send_types.iter().chain([&self.copy_from_type]))
    }

    /// Check unpacked arrays against the receive layouts.
    pub(crate) fn check_recv_data<T>(&self, data: &[&mut [T]]) -> Result<(), MgError> {
        let lens: Vec<usize> = data.iter().map(|d| d.len()).collect();
        self.check_lens(&lens, &self.recv_lens, self.recv_types.iter().chain([&self.copy_to_type]))
    }

    fn check_lens<'a>(&self, lens: &[usize], layout: &[usize], types: impl Iterator<Item = &'a CommType>) -> Result<(), MgError> {
        if lens.len() < self.num_blocks {
            return Err(MgError::DimensionMismatch { expected: self.num_blocks, found: lens.len() });
        }
        for (b, (&have, &want)) in lens.iter().zip(layout).enumerate() {
            if have < want {
                return Err(MgError::DimensionMismatch { expected: want, found: have });
            }
            debug_assert!(b < self.num_blocks);
        }
        // Raw packages built by hand may not carry layouts; check entry extents.
        for t in types {
            for (b, ext) in t.extents(self.num_blocks).into_iter().enumerate() {
                if lens[b] < ext {
                    return Err(MgError::DimensionMismatch { expected: ext, found: lens[b] });
                }
            }
        }
        Ok(())
    }
}

/// Split `(proc, entry)` pairs into remote types (ascending proc, entry
/// order kept) and the local type.
fn group_by_proc(entries: Vec<(usize, CommEntry)>, rank: usize) -> (Vec<CommType>, CommType) {
    let mut remote: BTreeMap<usize, Vec<CommEntry>> = BTreeMap::new();
    let mut local = Vec::new();
    for (proc, e) in entries {
        if proc == rank {
            local.push(e);
        } else {
            remote.entry(proc).or_default().push(e);
        }
    }
    let types = remote
        .into_iter()
        .map(|(proc, entries)| CommType { proc, blocks: vec![CommBlock { block: 0, entries }] })
        .collect();
    let copy = CommType { proc: rank, blocks: vec![CommBlock { block: 0, entries: local }] };
    (types, copy)
}
