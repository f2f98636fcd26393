//! In-flight exchanges.
//!
//! [`CommHandle::initialize`] packs every outgoing region, snapshots the
//! local copies and posts the exchange without waiting for it.
//! [`CommHandle::finalize`] waits, then writes the received values into the
//! destination arrays. Send data is only borrowed during `initialize`, so the
//! caller may keep computing on it (or on anything else) in between.
//!
//! ```
//! use structmg::parallel::ThreadComm;
//! use structmg::structured::{BoxArray, CommAction, CommHandle, CommInfo, CommPkg, DataSpace, Index, StructGrid};
//!
//! let comm = ThreadComm::serial();
//! let mut grid = StructGrid::new(comm.clone(), 1).unwrap();
//! grid.set_extents(Index::new(0, 0, 0), Index::new(3, 0, 0)).unwrap();
//! grid.set_extents(Index::new(4, 0, 0), Index::new(7, 0, 0)).unwrap();
//! grid.assemble().unwrap();
//!
//! let ghosts = [1, 1, 0, 0, 0, 0];
//! let info = CommInfo::from_num_ghost(&grid, &ghosts).unwrap();
//! let padded: Vec<_> = grid.boxes().iter().map(|b| b.grow_by_array(&ghosts)).collect();
//! let space = DataSpace::new(BoxArray::from(padded), 1);
//! let pkg = CommPkg::new(&info, &space, &space, None, false, &comm).unwrap();
//!
//! // Box 0 owns 0..=3 stored at [1..5), box 1 owns 4..=7 stored at [7..11).
//! let mut data = vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 2.0, 2.0, 2.0, 2.0, 0.0];
//! let handle = CommHandle::initialize(&pkg, &comm, &[&data[..]], CommAction::Set, 0).unwrap();
//! handle.finalize(&mut [&mut data[..]]).unwrap();
//! assert_eq!(data[5], 2.0);
//! assert_eq!(data[6], 1.0);
//! ```

use log::warn;

use super::comm_pkg::{CommAction, CommPkg, CommValue};
use crate::error::MgError;
use crate::parallel::{Comm, Message, PendingExchange, RecvSpec};

#[must_use = "an exchange must be finalized before its data can be used"]
pub struct CommHandle<'p, T: CommValue, C: Comm> {
    pkg: &'p CommPkg,
    comm: C,
    action: CommAction,
    pending: Option<PendingExchange<T>>,
    local: Vec<T>,
}

impl<'p, T: CommValue, C: Comm> CommHandle<'p, T, C> {
    /// Pack `send_data` (one array per package block) and post the exchange.
    pub fn initialize(pkg: &'p CommPkg, comm: &C, send_data: &[&[T]], action: CommAction, tag: i32) -> Result<Self, MgError> {
        pkg.check_send_data(send_data)?;
        let mut sends = Vec::with_capacity(pkg.send_types().len());
        for t in pkg.send_types() {
            sends.push(Message { peer: t.proc, data: t.pack(send_data)? });
        }
        let recvs: Vec<RecvSpec> = pkg
            .recv_types()
            .iter()
            .map(|t| RecvSpec { peer: t.proc, len: t.bufsize() })
            .collect();
        let local = pkg.copy_from_type().pack(send_data)?;
        let pending = comm.start_exchange(tag, sends, recvs)?;
        Ok(CommHandle {
            pkg,
            comm: comm.clone(),
            action,
            pending: Some(pending),
            local,
        })
    }

    pub fn action(&self) -> CommAction {
        self.action
    }

    /// Wait for completion and unpack into `recv_data` (one array per block).
    pub fn finalize(mut self, recv_data: &mut [&mut [T]]) -> Result<(), MgError> {
        let pending = self
            .pending
            .take()
            .ok_or(MgError::Unsupported("communication handle without a posted exchange"))?;
        let received = self.comm.finish_exchange(pending)?;
        self.pkg.check_recv_data(recv_data)?;
        self.pkg.copy_to_type().unpack(&self.local, recv_data, self.action)?;
        for (t, msg) in self.pkg.recv_types().iter().zip(received) {
            if msg.peer != t.proc {
                return Err(MgError::Transport(format!("expected data from rank {}, got rank {}", t.proc, msg.peer)));
            }
            t.unpack(&msg.data, recv_data, self.action)?;
        }
        Ok(())
    }
}

impl<T: CommValue, C: Comm> Drop for CommHandle<'_, T, C> {
    fn drop(&mut self) {
        if let Some(p) = &self.pending {
            warn!(
                "rank {}: communication handle dropped before finalize ({} receives pending)",
                self.comm.rank(),
                p.recvs().len()
            );
        }
    }
}
