//! MPI transport.
//!
//! Wraps the world communicator of an initialized MPI universe. The universe
//! is kept alive (shared) for as long as any clone of the communicator exists,
//! since dropping it finalizes MPI.
//!
//! Known-pattern exchanges are staged by [`Comm::start_exchange`] and posted
//! as non-blocking sends and receives inside one request scope by
//! [`Comm::finish_exchange`], which waits for all of them. Sparse exchanges
//! use synchronous sends, matched probes and a non-blocking barrier.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use super::{Comm, CommStats, Message, Payload, PendingExchange, RecvSpec, ReduceOp};
use crate::error::MgError;

// Sparse exchanges use their own tag range; MPI guarantees tags up to 32767.
const SPARSE_TAG_BASE: i32 = 1 << 14;
const SPARSE_TAG_LIMIT: i32 = 4096;

#[derive(Default)]
struct Counters {
    sends: AtomicUsize,
    recvs: AtomicUsize,
    reduced: AtomicUsize,
    sparse_rounds: AtomicUsize,
}

/// MPI communicator wrapper for distributed parallelism.
#[derive(Clone)]
pub struct MpiComm {
    universe: Arc<Universe>,
    rank: usize,
    size: usize,
    counters: Arc<Counters>,
}

impl MpiComm {
    /// Initializes MPI and wraps its world communicator.
    pub fn new() -> Result<Self, MgError> {
        let universe = mpi::initialize().ok_or_else(|| MgError::Transport("MPI is already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm {
            universe: Arc::new(universe),
            rank,
            size,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn world(&self) -> SimpleCommunicator {
        self.universe.world()
    }

    /// Consecutive sparse exchanges alternate between two wire tags so a
    /// rank that already passed the barrier of round `k` cannot have its
    /// round `k + 1` messages probed as part of round `k`.
    fn sparse_wire_tag(&self, tag: i32) -> Result<i32, MgError> {
        if !(0..SPARSE_TAG_LIMIT).contains(&tag) {
            return Err(MgError::InvalidArgument(format!("sparse exchange tag {tag} outside 0..{SPARSE_TAG_LIMIT}")));
        }
        let round = self.counters.sparse_rounds.fetch_add(1, Ordering::Relaxed);
        Ok(SPARSE_TAG_BASE + 2 * tag + (round % 2) as i32)
    }

    fn check_peer(&self, peer: usize) -> Result<i32, MgError> {
        if peer < self.size {
            Ok(peer as i32)
        } else {
            Err(MgError::Transport(format!("rank {peer} is outside a world of {}", self.size)))
        }
    }
}

impl Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), MgError> {
        self.world().barrier();
        Ok(())
    }

    fn all_reduce(&self, x: f64) -> Result<f64, MgError> {
        self.counters.reduced.fetch_add(1, Ordering::Relaxed);
        let mut y = x;
        self.world().all_reduce_into(&x, &mut y, SystemOperation::sum());
        Ok(y)
    }

    fn all_reduce_i64(&self, values: &mut [i64], op: ReduceOp) -> Result<(), MgError> {
        self.counters.reduced.fetch_add(values.len(), Ordering::Relaxed);
        let local = values.to_vec();
        let operation = match op {
            ReduceOp::Sum => SystemOperation::sum(),
            ReduceOp::Min => SystemOperation::min(),
            ReduceOp::Max => SystemOperation::max(),
        };
        self.world().all_reduce_into(&local[..], values, operation);
        Ok(())
    }

    fn sparse_exchange<T: Payload>(&self, tag: i32, sends: Vec<Message<T>>) -> Result<Vec<Message<T>>, MgError> {
        let world = self.world();
        let wire_tag = self.sparse_wire_tag(tag)?;
        for m in &sends {
            self.check_peer(m.peer)?;
        }

        let mut received = Vec::new();
        mpi::request::scope(|scope| {
            let mut pending: Vec<_> = sends
                .iter()
                .map(|m| {
                    world
                        .process_at_rank(m.peer as i32)
                        .immediate_synchronous_send_with_tag(scope, &m.data[..], wire_tag)
                })
                .collect();
            let mut barrier = None;
            loop {
                if let Some((msg, status)) = world.any_process().immediate_matched_probe_with_tag(wire_tag) {
                    let (data, _) = msg.matched_receive_vec::<T>();
                    received.push(Message { peer: status.source_rank() as usize, data });
                    continue;
                }
                match barrier.take() {
                    None => {
                        pending = pending.into_iter().filter_map(|req| req.test().err()).collect();
                        if pending.is_empty() {
                            barrier = Some(world.immediate_barrier());
                        }
                    }
                    Some(req) => match req.test() {
                        Ok(_) => break,
                        Err(req) => barrier = Some(req),
                    },
                }
            }
        });
        self.counters.sends.fetch_add(sends.len(), Ordering::Relaxed);
        self.counters.recvs.fetch_add(received.len(), Ordering::Relaxed);
        received.sort_by_key(|m| m.peer);
        Ok(received)
    }

    fn start_exchange<T: Payload>(
        &self,
        tag: i32,
        sends: Vec<Message<T>>,
        recvs: Vec<RecvSpec>,
    ) -> Result<PendingExchange<T>, MgError> {
        for m in &sends {
            self.check_peer(m.peer)?;
        }
        for r in &recvs {
            self.check_peer(r.peer)?;
        }
        Ok(PendingExchange { tag, sends, recvs })
    }

    fn finish_exchange<T: Payload>(&self, pending: PendingExchange<T>) -> Result<Vec<Message<T>>, MgError> {
        let world = self.world();
        let PendingExchange { tag, sends, recvs } = pending;
        let mut buffers: Vec<Vec<T>> = recvs.iter().map(|r| vec![T::default(); r.len]).collect();
        mpi::request::multiple_scope(sends.len() + recvs.len(), |scope, coll| {
            for m in &sends {
                let sreq = world
                    .process_at_rank(m.peer as i32)
                    .immediate_send_with_tag(scope, &m.data[..], tag);
                coll.add(sreq);
            }
            for (spec, buf) in recvs.iter().zip(buffers.iter_mut()) {
                let rreq = world
                    .process_at_rank(spec.peer as i32)
                    .immediate_receive_into_with_tag(scope, &mut buf[..], tag);
                coll.add(rreq);
            }
            let mut complete = vec![];
            coll.wait_all(&mut complete);
        });
        self.counters.sends.fetch_add(sends.len(), Ordering::Relaxed);
        self.counters.recvs.fetch_add(recvs.len(), Ordering::Relaxed);
        Ok(recvs
            .iter()
            .zip(buffers)
            .map(|(spec, data)| Message { peer: spec.peer, data })
            .collect())
    }

    fn stats(&self) -> CommStats {
        CommStats {
            sends: self.counters.sends.load(Ordering::Relaxed),
            recvs: self.counters.recvs.load(Ordering::Relaxed),
            reduced: self.counters.reduced.load(Ordering::Relaxed),
        }
    }
}
