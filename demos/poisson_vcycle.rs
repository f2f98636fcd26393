//! Solve a 1D Poisson problem with a Galerkin V-cycle hierarchy.
//!
//! ```text
//! RUST_LOG=debug cargo run --example poisson_vcycle -- --mg-ncycles 1 --mg-pre-sweeps 2 --mg-tol 1e-10
//! ```

use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;

use structmg::core::Operator;
use structmg::matrix::CsrMatrix;
use structmg::multigrid::{Hierarchy, SmootherSide};
use structmg::preconditioner::Jacobi;
use structmg::solver::LuSolver;
use structmg::{MgError, MgOptions, SolverArgs};

fn laplacian(n: usize) -> Result<CsrMatrix, MgError> {
    let mut t = Vec::with_capacity(3 * n);
    for i in 0..n {
        t.push((i, i, 2.0));
        if i > 0 {
            t.push((i, i - 1, -1.0));
        }
        if i + 1 < n {
            t.push((i, i + 1, -1.0));
        }
    }
    CsrMatrix::from_triplets(n, n, &t)
}

/// Full weighting onto `nc` points and linear interpolation back.
fn transfer(nc: usize) -> Result<(CsrMatrix, CsrMatrix), MgError> {
    let nf = 2 * nc + 1;
    let mut r = Vec::with_capacity(3 * nc);
    let mut p = Vec::with_capacity(3 * nc);
    for j in 0..nc {
        for (k, w) in [(2 * j, 0.25), (2 * j + 1, 0.5), (2 * j + 2, 0.25)] {
            r.push((j, k, w));
            p.push((k, j, 2.0 * w));
        }
    }
    Ok((CsrMatrix::from_triplets(nc, nf, &r)?, CsrMatrix::from_triplets(nf, nc, &p)?))
}

/// `R A P`, one column at a time.
fn galerkin(a: &CsrMatrix, r: &CsrMatrix, p: &CsrMatrix) -> Result<CsrMatrix, MgError> {
    let nc = p.ncols();
    let mut t = Vec::new();
    let (mut pe, mut ape, mut col) = (Vec::new(), Vec::new(), Vec::new());
    for k in 0..nc {
        let mut e = vec![0.0; nc];
        e[k] = 1.0;
        p.apply(1.0, &e, 0.0, None, &mut pe)?;
        a.apply(1.0, &pe, 0.0, None, &mut ape)?;
        r.apply(1.0, &ape, 0.0, None, &mut col)?;
        t.extend(col.iter().enumerate().filter(|(_, v)| v.abs() > 1e-14).map(|(i, &v)| (i, k, v)));
    }
    CsrMatrix::from_triplets(nc, nc, &t)
}

fn main() -> Result<(), MgError> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .ok();

    let opts = MgOptions::from(SolverArgs::parse().mg);
    #[cfg(feature = "rayon")]
    structmg::parallel::init_thread_pool(None);
    let n = 255;

    // Level sizes 255, 127, ..., 3.
    let mut sizes = vec![n];
    while *sizes.last().unwrap_or(&0) > 3 {
        let nc = (sizes[sizes.len() - 1] - 1) / 2;
        sizes.push(nc);
    }

    let mut mg = Hierarchy::<Vec<f64>>::new(sizes.len());
    let mut a = Arc::new(laplacian(n)?);
    for l in 0..sizes.len() {
        let level = mg.level_mut(l)?;
        level.set_ncycles(opts.ncycles);
        level.set_amat(Arc::clone(&a));
        if l + 1 == sizes.len() {
            level.set_coarse_solve(LuSolver::from_csr(&a)?);
            break;
        }
        level.set_smoother(SmootherSide::Pre, Jacobi::new(Arc::clone(&a), opts.jacobi_omega, opts.pre_sweeps));
        level.set_smoother(SmootherSide::Post, Jacobi::new(Arc::clone(&a), opts.jacobi_omega, opts.post_sweeps));
        let (r, p) = transfer(sizes[l + 1])?;
        let coarse = Arc::new(galerkin(&a, &r, &p)?);
        level.set_rmat(r);
        mg.level_mut(l + 1)?.set_pmat(p);
        a = coarse;
    }
    mg.setup()?;

    let h = 1.0 / (n + 1) as f64;
    let rhs = vec![h * h; n];
    let (sol, stats) = mg.solve(&rhs, vec![0.0; n], &opts)?;

    // -u'' = 1 with u(0) = u(1) = 0 has u(x) = x (1 - x) / 2.
    let err = sol
        .iter()
        .enumerate()
        .map(|(i, u)| {
            let x = (i + 1) as f64 * h;
            (u - x * (1.0 - x) / 2.0).abs()
        })
        .fold(0.0, f64::max);
    println!("levels: {:?}", sizes);
    println!(
        "cycles: {}, converged: {}, residual: {:e}, max error: {:e}",
        stats.iterations, stats.converged, stats.final_residual, err
    );
    Ok(())
}
