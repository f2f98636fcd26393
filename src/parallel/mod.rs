//! Rank-to-rank transport used by the structured communication layer.
//!
//! [`Comm`] is the only way data crosses a rank boundary. Two backends exist:
//! [`ThreadComm`] runs every rank as a thread inside one process (always
//! available, used by the test-suite) and [`MpiComm`] wraps an MPI world
//! communicator when the `mpi` feature is enabled. [`UniverseComm`] picks one
//! at runtime.

#[cfg(feature = "mpi")]
use mpi::datatype::Equivalence;

use crate::error::MgError;

pub mod thread_comm;
pub use thread_comm::ThreadComm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Element type that can travel in a message.
#[cfg(feature = "mpi")]
pub trait Payload: Copy + Default + Send + Sync + Equivalence + 'static {}
#[cfg(feature = "mpi")]
impl<T: Copy + Default + Send + Sync + Equivalence + 'static> Payload for T {}

/// Element type that can travel in a message.
#[cfg(not(feature = "mpi"))]
pub trait Payload: Copy + Default + Send + Sync + 'static {}
#[cfg(not(feature = "mpi"))]
impl<T: Copy + Default + Send + Sync + 'static> Payload for T {}

/// One point-to-point message; `peer` is the destination when sending and the
/// source when receiving.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub peer: usize,
    pub data: Vec<T>,
}

/// Expected incoming message of a known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvSpec {
    pub peer: usize,
    pub len: usize,
}

/// An exchange posted by [`Comm::start_exchange`] and not yet completed.
#[derive(Debug)]
pub struct PendingExchange<T> {
    pub(crate) tag: i32,
    pub(crate) sends: Vec<Message<T>>,
    pub(crate) recvs: Vec<RecvSpec>,
}

impl<T> PendingExchange<T> {
    pub fn tag(&self) -> i32 {
        self.tag
    }

    pub fn recvs(&self) -> &[RecvSpec] {
        &self.recvs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    pub(crate) fn combine(self, a: i64, b: i64) -> i64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

/// Traffic counters of one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommStats {
    /// Point-to-point messages sent (collectives excluded)
    pub sends: usize,
    /// Point-to-point messages received (collectives excluded)
    pub recvs: usize,
    /// Values this endpoint contributed to global reductions
    pub reduced: usize,
}

pub trait Comm: Clone + Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self) -> Result<(), MgError>;
    /// Global sum of one value.
    fn all_reduce(&self, x: f64) -> Result<f64, MgError>;
    /// Element-wise global reduction, in place.
    fn all_reduce_i64(&self, values: &mut [i64], op: ReduceOp) -> Result<(), MgError>;
    fn dot(&self, a: &[f64], b: &[f64]) -> Result<f64, MgError> {
        let local = a.iter().zip(b).map(|(&x, &y)| x * y).sum::<f64>();
        self.all_reduce(local)
    }
    /// Exchange where receivers do not know their sources in advance.
    ///
    /// Termination is detected without any reduction over the world: sends
    /// are synchronous, and a rank enters a non-blocking barrier once all of
    /// its sends have been matched, receiving from any source until the
    /// barrier completes. Each rank handles `O(messages)` data plus one
    /// non-blocking barrier, never a length-`P` count vector.
    /// Results are sorted by source rank, keeping arrival order for messages
    /// from the same source. Collective: every rank calls it in the same
    /// order.
    fn sparse_exchange<T: Payload>(&self, tag: i32, sends: Vec<Message<T>>) -> Result<Vec<Message<T>>, MgError>;
    /// Post an exchange whose peers and sizes are known on both sides.
    fn start_exchange<T: Payload>(
        &self,
        tag: i32,
        sends: Vec<Message<T>>,
        recvs: Vec<RecvSpec>,
    ) -> Result<PendingExchange<T>, MgError>;
    /// Block until every message of `pending` has been delivered; the
    /// received messages come back in the order of the posted receive specs.
    fn finish_exchange<T: Payload>(&self, pending: PendingExchange<T>) -> Result<Vec<Message<T>>, MgError>;
    fn stats(&self) -> CommStats;
}

/// Transport chosen at runtime.
#[derive(Clone)]
pub enum UniverseComm {
    #[cfg(feature = "mpi")]
    Mpi(MpiComm),
    Threads(ThreadComm),
}

impl UniverseComm {
    /// Single-rank communicator.
    pub fn serial() -> Self {
        UniverseComm::Threads(ThreadComm::serial())
    }
}

impl Comm for UniverseComm {
    fn rank(&self) -> usize {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.rank(),
            UniverseComm::Threads(comm) => comm.rank(),
        }
    }
    fn size(&self) -> usize {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.size(),
            UniverseComm::Threads(comm) => comm.size(),
        }
    }
    fn barrier(&self) -> Result<(), MgError> {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.barrier(),
            UniverseComm::Threads(comm) => comm.barrier(),
        }
    }
    fn all_reduce(&self, x: f64) -> Result<f64, MgError> {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.all_reduce(x),
            UniverseComm::Threads(comm) => comm.all_reduce(x),
        }
    }
    fn all_reduce_i64(&self, values: &mut [i64], op: ReduceOp) -> Result<(), MgError> {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.all_reduce_i64(values, op),
            UniverseComm::Threads(comm) => comm.all_reduce_i64(values, op),
        }
    }
    fn sparse_exchange<T: Payload>(&self, tag: i32, sends: Vec<Message<T>>) -> Result<Vec<Message<T>>, MgError> {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.sparse_exchange(tag, sends),
            UniverseComm::Threads(comm) => comm.sparse_exchange(tag, sends),
        }
    }
    fn start_exchange<T: Payload>(
        &self,
        tag: i32,
        sends: Vec<Message<T>>,
        recvs: Vec<RecvSpec>,
    ) -> Result<PendingExchange<T>, MgError> {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.start_exchange(tag, sends, recvs),
            UniverseComm::Threads(comm) => comm.start_exchange(tag, sends, recvs),
        }
    }
    fn finish_exchange<T: Payload>(&self, pending: PendingExchange<T>) -> Result<Vec<Message<T>>, MgError> {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.finish_exchange(pending),
            UniverseComm::Threads(comm) => comm.finish_exchange(pending),
        }
    }
    fn stats(&self) -> CommStats {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.stats(),
            UniverseComm::Threads(comm) => comm.stats(),
        }
    }
}

/// Size the global rayon pool used for intra-rank packing and kernels.
///
/// `None` uses one thread per logical CPU. Calling this after the pool has
/// been built is a no-op.
#[cfg(feature = "rayon")]
pub fn init_thread_pool(num_threads: Option<usize>) {
    let n = num_threads.unwrap_or_else(num_cpus::get);
    if rayon::ThreadPoolBuilder::new().num_threads(n).build_global().is_err() {
        log::debug!("rayon global pool already initialized");
    }
}
