//! Command-line or API options for the multigrid solver and struct grids.
//!
//! Options are plain structs with defaults. [`SolverArgs`] is the clap
//! front end, e.g.
//! `--mg-ncycles 2 --mg-max-cycles 20 --mg-tol 1e-8 --grid-num-ghost 1,1,0,0,2,2`,
//! and converts into [`MgOptions`] and [`GridOptions`].

use clap::{Args, Parser};

use crate::error::MgError;
use crate::structured::{DEFAULT_MAX_DISTANCE, MAX_DIM};

/// Cycle and smoother parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MgOptions {
    /// Sub-cycles per level visit (1 = V-cycle, 2 = W-cycle)
    pub ncycles: usize,

    /// Upper bound on outer cycles
    pub max_cycles: usize,

    /// Relative residual reduction that stops the outer iteration
    pub tolerance: f64,

    /// Jacobi sweeps before / after the coarse correction
    pub pre_sweeps: usize,
    pub post_sweeps: usize,

    /// Jacobi damping factor ω
    pub jacobi_omega: f64,
}

impl Default for MgOptions {
    fn default() -> Self {
        MgOptions {
            ncycles: 1,
            max_cycles: 50,
            tolerance: 1e-8,
            pre_sweeps: 1,
            post_sweeps: 1,
            jacobi_omega: 2.0 / 3.0,
        }
    }
}

/// Struct grid parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GridOptions {
    /// Neighbour search distance for box manager gathering
    pub max_distance: i32,

    /// Ghost widths `[lo0, hi0, lo1, hi1, lo2, hi2]`
    pub num_ghost: [i32; 2 * MAX_DIM],
}

impl Default for GridOptions {
    fn default() -> Self {
        GridOptions {
            max_distance: DEFAULT_MAX_DISTANCE,
            num_ghost: [1; 2 * MAX_DIM],
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "structmg")]
#[command(about = "Multigrid cycle and struct grid options")]
pub struct SolverArgs {
    #[command(flatten)]
    pub mg: MgArgs,

    #[command(flatten)]
    pub grid: GridArgs,
}

#[derive(Args, Debug, Clone)]
pub struct MgArgs {
    /// Sub-cycles per level visit (1 = V-cycle, 2 = W-cycle)
    #[arg(long = "mg-ncycles", default_value_t = 1)]
    pub ncycles: usize,

    /// Upper bound on outer cycles
    #[arg(long = "mg-max-cycles", default_value_t = 50)]
    pub max_cycles: usize,

    /// Relative residual reduction that stops the outer iteration
    #[arg(long = "mg-tol", default_value_t = 1e-8)]
    pub tolerance: f64,

    #[arg(long = "mg-pre-sweeps", default_value_t = 1)]
    pub pre_sweeps: usize,

    #[arg(long = "mg-post-sweeps", default_value_t = 1)]
    pub post_sweeps: usize,

    /// Jacobi damping factor
    #[arg(long = "mg-jacobi-omega", default_value_t = 2.0 / 3.0)]
    pub jacobi_omega: f64,
}

#[derive(Args, Debug, Clone)]
pub struct GridArgs {
    /// Neighbour search distance for box manager gathering
    #[arg(long = "grid-max-distance", default_value_t = DEFAULT_MAX_DISTANCE)]
    pub max_distance: i32,

    /// One width for every side, or `lo0,hi0,lo1,hi1,lo2,hi2`
    #[arg(long = "grid-num-ghost", value_delimiter = ',', default_value = "1")]
    pub num_ghost: Vec<i32>,
}

impl SolverArgs {
    /// Like [`Parser::try_parse_from`], with clap's message carried in
    /// [`MgError::InvalidArgument`]. The first item is the program name.
    pub fn from_args<I, S>(args: I) -> Result<Self, MgError>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        SolverArgs::try_parse_from(args).map_err(|e| MgError::InvalidArgument(e.to_string()))
    }

    pub fn into_options(self) -> Result<(MgOptions, GridOptions), MgError> {
        Ok((self.mg.into(), GridOptions::try_from(self.grid)?))
    }
}

impl From<MgArgs> for MgOptions {
    fn from(a: MgArgs) -> Self {
        MgOptions {
            ncycles: a.ncycles,
            max_cycles: a.max_cycles,
            tolerance: a.tolerance,
            pre_sweeps: a.pre_sweeps,
            post_sweeps: a.post_sweeps,
            jacobi_omega: a.jacobi_omega,
        }
    }
}

impl TryFrom<GridArgs> for GridOptions {
    type Error = MgError;

    fn try_from(a: GridArgs) -> Result<Self, MgError> {
        let num_ghost = match a.num_ghost.as_slice() {
            [w] => [*w; 2 * MAX_DIM],
            w if w.len() == 2 * MAX_DIM => {
                let mut g = [0; 2 * MAX_DIM];
                g.copy_from_slice(w);
                g
            }
            w => {
                return Err(MgError::InvalidArgument(format!(
                    "--grid-num-ghost takes 1 or {} widths, got {}",
                    2 * MAX_DIM,
                    w.len()
                )));
            }
        };
        if num_ghost.iter().any(|&g| g < 0) || a.max_distance < 0 {
            return Err(MgError::InvalidArgument("grid widths must be non-negative".into()));
        }
        Ok(GridOptions { max_distance: a.max_distance, num_ghost })
    }
}
