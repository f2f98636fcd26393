pub mod options;

pub use options::{GridArgs, GridOptions, MgArgs, MgOptions, SolverArgs};
