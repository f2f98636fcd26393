//! Structured grids and the communication layer underneath them.
//!
//! Geometry ([`Index`], [`GridBox`], [`BoxArray`]) is plain data. A
//! [`BoxManager`] answers "which boxes, on which ranks, overlap this region"
//! after a scalable assembly through an [`AssumedPartition`]. From a grid and
//! a stencil, [`CommInfo`] derives the symbolic exchange, [`CommPkg`] compiles
//! it against concrete array layouts and [`CommHandle`] runs it.
//! [`ComputePkg`] splits boxes so computation can overlap the exchange.

pub mod assumed_partition;
pub mod box_manager;
pub mod boxes;
pub mod comm_handle;
pub mod comm_info;
pub mod comm_pkg;
pub mod compute_pkg;
pub mod grid;
pub mod index;
pub mod matrix;
pub mod stencil;
pub mod vector;

pub use assumed_partition::AssumedPartition;
pub use box_manager::{AssemblyStats, BoxManEntry, BoxManager};
pub use boxes::{BoxArray, BoxArrayArray, GridBox};
pub use comm_handle::CommHandle;
pub use comm_info::{CommInfo, CommRegion, Transform};
pub use comm_pkg::{CommAction, CommBlock, CommEntry, CommPkg, CommType, CommValue, DataSpace};
pub use compute_pkg::{ComputeInfo, ComputePkg};
pub use grid::{DEFAULT_MAX_DISTANCE, StructGrid};
pub use index::{Index, MAX_DIM};
pub use matrix::StructMatrix;
pub use stencil::{CommStencil, StructStencil};
pub use vector::StructVector;
