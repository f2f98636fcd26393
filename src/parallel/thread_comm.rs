//! In-process transport: every rank is a thread, every endpoint owns a mailbox.
//!
//! Messages are matched by `(source, channel)` in FIFO order, exactly like
//! MPI point-to-point semantics with a fixed communicator. Collectives run on
//! their own channel: rank 0 combines contributions in rank order and sends
//! the result back, which keeps floating-point reductions deterministic.
//!
//! Sparse exchanges never reduce over the world. Each message carries a
//! match counter owned by its sender; once all of a rank's messages have been
//! taken it enters a world-wide fence without blocking, and it keeps draining
//! its mailbox until every rank has entered.
//!
//! ```
//! use structmg::parallel::{Comm, ThreadComm};
//! let sums = ThreadComm::run(3, |comm| comm.all_reduce(comm.rank() as f64).unwrap());
//! assert_eq!(sums, vec![3.0, 3.0, 3.0]);
//! ```

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::{Comm, CommStats, Message, Payload, PendingExchange, RecvSpec, ReduceOp};
use crate::error::MgError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Tag(i32),
    /// Consecutive sparse exchanges alternate lanes, so a rank that already
    /// left round `k` cannot feed round `k + 1` messages into round `k`.
    Sparse { tag: i32, odd: bool },
    Collective,
}

type Envelope = Box<dyn Any + Send>;
type Queues = HashMap<(usize, Channel), VecDeque<Envelope>>;

/// A sparse-exchange message; `unmatched` is the sender's count of messages
/// not yet taken.
struct Delivery<T> {
    data: Vec<T>,
    sender: usize,
    unmatched: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Mailbox {
    queues: Mutex<Queues>,
    arrived: Condvar,
}

/// Non-blocking barrier: `generation` advances once every rank has arrived.
#[derive(Default)]
struct FenceState {
    generation: u64,
    arrived: usize,
}

struct World {
    mailboxes: Vec<Mailbox>,
    fence: Mutex<FenceState>,
}

impl World {
    fn new(n: usize) -> Self {
        World {
            mailboxes: (0..n).map(|_| Mailbox::default()).collect(),
            fence: Mutex::new(FenceState::default()),
        }
    }
}

#[derive(Default)]
struct Counters {
    sends: AtomicUsize,
    recvs: AtomicUsize,
    reduced: AtomicUsize,
    sparse_rounds: AtomicUsize,
}

/// One endpoint of a thread-backed world.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    world: Arc<World>,
    counters: Arc<Counters>,
}

fn poisoned<T>(_: T) -> MgError {
    MgError::Transport("mailbox lock poisoned".into())
}

impl ThreadComm {
    /// `n` connected endpoints; endpoint `r` has rank `r`.
    pub fn world(n: usize) -> Vec<ThreadComm> {
        let world = Arc::new(World::new(n));
        (0..n)
            .map(|rank| ThreadComm {
                rank,
                world: world.clone(),
                counters: Arc::new(Counters::default()),
            })
            .collect()
    }

    /// A world of one rank.
    pub fn serial() -> ThreadComm {
        ThreadComm {
            rank: 0,
            world: Arc::new(World::new(1)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Run `f` on `n` ranks, one OS thread each, and collect the results in
    /// rank order. A panic on any rank is propagated.
    pub fn run<R, F>(n: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadComm) -> R + Sync,
    {
        let comms = ThreadComm::world(n);
        let f = &f;
        std::thread::scope(|s| {
            let handles: Vec<_> = comms.into_iter().map(|c| s.spawn(move || f(c))).collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }

    fn mailbox(&self, rank: usize) -> Result<&Mailbox, MgError> {
        self.world
            .mailboxes
            .get(rank)
            .ok_or_else(|| MgError::Transport(format!("rank {rank} is outside a world of {}", self.size())))
    }

    fn post(&self, dest: usize, channel: Channel, envelope: Envelope) -> Result<(), MgError> {
        let mailbox = self.mailbox(dest)?;
        let mut queues = mailbox.queues.lock().map_err(poisoned)?;
        queues.entry((self.rank, channel)).or_default().push_back(envelope);
        mailbox.arrived.notify_all();
        Ok(())
    }

    /// Wake whoever waits on `rank`'s mailbox. Taking the lock orders the
    /// wake-up after any check its owner made while holding it.
    fn wake(&self, rank: usize) -> Result<(), MgError> {
        let mailbox = self.mailbox(rank)?;
        let _queues = mailbox.queues.lock().map_err(poisoned)?;
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn wait<'a>(&self, mailbox: &'a Mailbox, guard: MutexGuard<'a, Queues>) -> Result<MutexGuard<'a, Queues>, MgError> {
        mailbox.arrived.wait(guard).map_err(poisoned)
    }

    fn take(&self, src: usize, channel: Channel) -> Result<Envelope, MgError> {
        let mailbox = self.mailbox(self.rank)?;
        let mut queues = mailbox.queues.lock().map_err(poisoned)?;
        loop {
            if let Some(envelope) = queues.get_mut(&(src, channel)).and_then(VecDeque::pop_front) {
                return Ok(envelope);
            }
            queues = self.wait(mailbox, queues)?;
        }
    }

    /// Everything queued on `channel`, lowest source first, without waiting.
    fn drain(&self, channel: Channel) -> Result<Vec<(usize, Envelope)>, MgError> {
        let mailbox = self.mailbox(self.rank)?;
        let mut queues = mailbox.queues.lock().map_err(poisoned)?;
        let mut out = Vec::new();
        for ((src, ch), q) in queues.iter_mut() {
            if *ch == channel {
                out.extend(q.drain(..).map(|e| (*src, e)));
            }
        }
        out.sort_by_key(|(src, _)| *src);
        Ok(out)
    }

    fn take_typed<T: 'static>(&self, src: usize, channel: Channel) -> Result<T, MgError> {
        let envelope = self.take(src, channel)?;
        open(envelope, src)
    }

    /// Arrive at the fence; returns the generation to wait for.
    fn enter_fence(&self) -> Result<u64, MgError> {
        let (generation, complete) = {
            let mut fence = self.world.fence.lock().map_err(poisoned)?;
            let generation = fence.generation;
            fence.arrived += 1;
            let complete = fence.arrived == self.size();
            if complete {
                fence.generation += 1;
                fence.arrived = 0;
            }
            (generation, complete)
        };
        if complete {
            for rank in 0..self.size() {
                self.wake(rank)?;
            }
        }
        Ok(generation)
    }

    fn fence_passed(&self, generation: u64) -> Result<bool, MgError> {
        Ok(self.world.fence.lock().map_err(poisoned)?.generation > generation)
    }

    fn reduce_broadcast<T, F>(&self, value: T, combine: F) -> Result<T, MgError>
    where
        T: Clone + Send + 'static,
        F: Fn(T, T) -> T,
    {
        if self.size() == 1 {
            return Ok(value);
        }
        if self.rank == 0 {
            let mut acc = value;
            for src in 1..self.size() {
                let v: T = self.take_typed(src, Channel::Collective)?;
                acc = combine(acc, v);
            }
            for dest in 1..self.size() {
                self.post(dest, Channel::Collective, Box::new(acc.clone()))?;
            }
            Ok(acc)
        } else {
            self.post(0, Channel::Collective, Box::new(value))?;
            self.take_typed(0, Channel::Collective)
        }
    }
}

fn open<T: 'static>(envelope: Envelope, src: usize) -> Result<T, MgError> {
    envelope
        .downcast::<T>()
        .map(|b| *b)
        .map_err(|_| MgError::Transport(format!("payload type mismatch from rank {src}")))
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.world.mailboxes.len()
    }

    fn barrier(&self) -> Result<(), MgError> {
        self.reduce_broadcast((), |_, _| ())
    }

    fn all_reduce(&self, x: f64) -> Result<f64, MgError> {
        self.counters.reduced.fetch_add(1, Ordering::Relaxed);
        self.reduce_broadcast(x, |a, b| a + b)
    }

    fn all_reduce_i64(&self, values: &mut [i64], op: ReduceOp) -> Result<(), MgError> {
        self.counters.reduced.fetch_add(values.len(), Ordering::Relaxed);
        let reduced = self.reduce_broadcast(values.to_vec(), |mut a, b| {
            for (x, y) in a.iter_mut().zip(b) {
                *x = op.combine(*x, y);
            }
            a
        })?;
        if reduced.len() != values.len() {
            return Err(MgError::Transport("reduction length differs between ranks".into()));
        }
        values.copy_from_slice(&reduced);
        Ok(())
    }

    fn sparse_exchange<T: Payload>(&self, tag: i32, sends: Vec<Message<T>>) -> Result<Vec<Message<T>>, MgError> {
        for m in &sends {
            if m.peer >= self.size() {
                return Err(MgError::Transport(format!("destination rank {} out of range", m.peer)));
            }
        }
        let round = self.counters.sparse_rounds.fetch_add(1, Ordering::Relaxed);
        let lane = Channel::Sparse { tag, odd: round % 2 == 1 };

        let unmatched = Arc::new(AtomicUsize::new(sends.len()));
        let nsends = sends.len();
        for m in sends {
            let delivery = Delivery { data: m.data, sender: self.rank, unmatched: Arc::clone(&unmatched) };
            self.post(m.peer, lane, Box::new(delivery))?;
        }
        self.counters.sends.fetch_add(nsends, Ordering::Relaxed);

        let mut received = Vec::new();
        let mut fence = None;
        loop {
            for (src, envelope) in self.drain(lane)? {
                let delivery: Delivery<T> = open(envelope, src)?;
                delivery.unmatched.fetch_sub(1, Ordering::AcqRel);
                self.wake(delivery.sender)?;
                received.push(Message { peer: src, data: delivery.data });
            }
            if fence.is_none() && unmatched.load(Ordering::Acquire) == 0 {
                fence = Some(self.enter_fence()?);
            }
            if let Some(generation) = fence {
                if self.fence_passed(generation)? {
                    break;
                }
            }

            let mailbox = self.mailbox(self.rank)?;
            let queues = mailbox.queues.lock().map_err(poisoned)?;
            let mail = queues.iter().any(|((_, ch), q)| *ch == lane && !q.is_empty());
            let progress = match fence {
                None => unmatched.load(Ordering::Acquire) == 0,
                Some(generation) => self.fence_passed(generation)?,
            };
            if !mail && !progress {
                drop(self.wait(mailbox, queues)?);
            }
        }
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
        for m in sends {
            self.post(m.peer, Channel::Tag(tag), Box::new(m.data))?;
            self.counters.sends.fetch_add(1, Ordering::Relaxed);
        }
        Ok(PendingExchange { tag, sends: Vec::new(), recvs })
    }

    fn finish_exchange<T: Payload>(&self, pending: PendingExchange<T>) -> Result<Vec<Message<T>>, MgError> {
        let PendingExchange { tag, sends, recvs } = pending;
        // Sends staged by another backend are delivered here.
        for m in sends {
            self.post(m.peer, Channel::Tag(tag), Box::new(m.data))?;
            self.counters.sends.fetch_add(1, Ordering::Relaxed);
        }
        let mut received = Vec::with_capacity(recvs.len());
        for spec in recvs {
            let data: Vec<T> = self.take_typed(spec.peer, Channel::Tag(tag))?;
            if data.len() != spec.len {
                return Err(MgError::Transport(format!(
                    "rank {} expected {} values from rank {}, got {}",
                    self.rank,
                    spec.len,
                    spec.peer,
                    data.len()
                )));
            }
            self.counters.recvs.fetch_add(1, Ordering::Relaxed);
            received.push(Message { peer: spec.peer, data });
        }
        Ok(received)
    }

    fn stats(&self) -> CommStats {
        CommStats {
            sends: self.counters.sends.load(Ordering::Relaxed),
            recvs: self.counters.recvs.load(Ordering::Relaxed),
            reduced: self.counters.reduced.load(Ordering::Relaxed),
        }
    }
}
