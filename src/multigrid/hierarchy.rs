//! The V-cycle engine: an owned sequence of levels, finest first.
//!
//! Level `i` restricts into level `i + 1` with its own `R`; level `i + 1`
//! interpolates back with its `P`. A level without `R` is the coarsest one
//! reached by a cycle.
//!
//! ```
//! use structmg::multigrid::Hierarchy;
//! use structmg::matrix::CsrMatrix;
//!
//! // One level, no smoother, no coarse solver: a cycle copies rhs into sol.
//! let mut mg = Hierarchy::<Vec<f64>>::new(1);
//! mg.level_mut(0).unwrap().set_amat(CsrMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)]).unwrap());
//! mg.setup().unwrap();
//! mg.set_rhs(vec![3.0, 4.0]).unwrap();
//! mg.set_solution(vec![0.0, 0.0]).unwrap();
//! mg.solve_one_cycle().unwrap();
//! assert_eq!(mg.level(0).unwrap().solution_vector(), Some(&vec![3.0, 4.0]));
//! ```

use log::{info, trace};

use super::level::{OneLevel, SmootherSide};
use crate::config::MgOptions;
use crate::core::traits::Vector;
use crate::error::MgError;
use crate::utils::convergence::{Convergence, SolveStats};

pub struct Hierarchy<V> {
    levels: Vec<OneLevel<V>>,
}

impl<V: Vector + 'static> Hierarchy<V> {
    /// `nlevels` empty levels numbered `0..nlevels`.
    pub fn new(nlevels: usize) -> Self {
        Hierarchy {
            levels: (0..nlevels).map(OneLevel::new).collect(),
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, i: usize) -> Result<&OneLevel<V>, MgError> {
        self.levels.get(i).ok_or(MgError::InvalidLevel(i))
    }

    pub fn level_mut(&mut self, i: usize) -> Result<&mut OneLevel<V>, MgError> {
        self.levels.get_mut(i).ok_or(MgError::InvalidLevel(i))
    }

    /// Append a configured level; its number is set to its position.
    pub fn push_level(&mut self, mut level: OneLevel<V>) {
        level.set_level_num(self.levels.len());
        self.levels.push(level);
    }

    /// Sub-cycle count for every level.
    pub fn set_ncycles(&mut self, ncycles: usize) {
        self.levels.iter_mut().for_each(|l| l.set_ncycles(ncycles));
    }

    pub fn set_rhs(&mut self, rhs: V) -> Result<(), MgError> {
        self.level_mut(0)?.set_rhs_vector(rhs);
        Ok(())
    }

    pub fn set_solution(&mut self, sol: V) -> Result<(), MgError> {
        self.level_mut(0)?.set_solution_vector(sol);
        Ok(())
    }

    /// Set up every level. A level with `R` needs a coarser level after it.
    pub fn setup(&mut self) -> Result<(), MgError> {
        if self.levels.is_empty() {
            return Err(MgError::InvalidLevel(0));
        }
        let n = self.levels.len();
        for (i, level) in self.levels.iter_mut().enumerate() {
            if level.rmat().is_some() && i + 1 == n {
                return Err(MgError::InvalidLevel(i + 1));
            }
            level.setup()?;
        }
        Ok(())
    }

    /// One cycle from the finest level, improving level 0's solution.
    pub fn solve_one_cycle(&mut self) -> Result<(), MgError> {
        if !self.levels.iter().all(OneLevel::is_setup) {
            return Err(MgError::NotAssembled("multigrid hierarchy"));
        }
        self.cycle(0)
    }

    fn cycle(&mut self, l: usize) -> Result<(), MgError> {
        let level = self.levels.get_mut(l).ok_or(MgError::InvalidLevel(l))?;
        if level.rmat().is_none() {
            trace!("level {l}: coarse solve");
            return level.coarse_solve();
        }
        let ncycles = level.ncycles();
        for _ in 0..ncycles {
            trace!("level {l}: pre-smooth");
            self.levels[l].smooth(SmootherSide::Pre)?;
            {
                let (fine, coarse) = self.pair(l)?;
                fine.compute_residual()?;
                trace!("level {l}: restrict");
                fine.restrict_into(coarse)?;
            }
            self.cycle(l + 1)?;
            {
                let (fine, coarse) = self.pair(l)?;
                trace!("level {l}: interpolate");
                fine.correct_from(coarse)?;
            }
            trace!("level {l}: post-smooth");
            self.levels[l].smooth(SmootherSide::Post)?;
        }
        Ok(())
    }

    fn pair(&mut self, l: usize) -> Result<(&mut OneLevel<V>, &mut OneLevel<V>), MgError> {
        if l + 1 >= self.levels.len() {
            return Err(MgError::InvalidLevel(l + 1));
        }
        let (head, tail) = self.levels.split_at_mut(l + 1);
        Ok((&mut head[l], &mut tail[0]))
    }

    /// Residual norm `|rhs - A sol|` on the finest level.
    pub fn residual_norm(&mut self) -> Result<f64, MgError> {
        let finest = self.level_mut(0)?;
        finest.compute_residual()?;
        finest
            .residual_vector()
            .ok_or(MgError::NotAssembled("multigrid hierarchy"))?
            .norm2()
    }

    /// Repeat cycles until `|r| / |r0| <= opts.tolerance` or
    /// `opts.max_cycles` cycles have run. Sub-cycle counts already set on the
    /// levels are kept.
    pub fn solve(&mut self, rhs: &V, sol: V, opts: &MgOptions) -> Result<(V, SolveStats<f64>), MgError> {
        self.set_rhs(rhs.clone())?;
        self.set_solution(sol)?;
        if !self.levels.iter().all(OneLevel::is_setup) {
            self.setup()?;
        }
        let conv = Convergence { tol: opts.tolerance, max_iters: opts.max_cycles };
        let r0 = self.residual_norm()?;
        let (mut stop, mut stats) = conv.check(r0, r0, 0);
        let mut k = 0;
        while !stop {
            k += 1;
            self.solve_one_cycle()?;
            let r = self.residual_norm()?;
            trace!("cycle {k}: residual {r:e}");
            (stop, stats) = conv.check(r, r0, k);
        }
        if stats.converged {
            info!("multigrid converged in {} cycles, residual {:e}", stats.iterations, stats.final_residual);
        } else {
            info!("multigrid stopped after {} cycles, residual {:e}", stats.iterations, stats.final_residual);
        }
        let sol = self
            .level_mut(0)?
            .reset_solution_vector()
            .ok_or(MgError::MissingVector { level: 0, which: "sol" })?;
        Ok((sol, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use crate::core::LevelSolver;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountCalls(Rc<Cell<usize>>);

    impl LevelSolver<Vec<f64>> for CountCalls {
        fn solve(&mut self, rhs: &Vec<f64>, sol: &mut Vec<f64>) -> Result<(), MgError> {
            self.0.set(self.0.get() + 1);
            sol.copy_from_slice(rhs);
            Ok(())
        }
    }

    fn identity(n: usize) -> CsrMatrix {
        let t: Vec<_> = (0..n).map(|i| (i, i, 1.0)).collect();
        CsrMatrix::from_triplets(n, n, &t).unwrap()
    }

    fn chain(nlevels: usize, ncycles: usize, calls: Rc<Cell<usize>>) -> Hierarchy<Vec<f64>> {
        let mut mg = Hierarchy::new(nlevels);
        for l in 0..nlevels {
            let level = mg.level_mut(l).unwrap();
            level.set_amat(identity(2));
            level.set_ncycles(ncycles);
            if l + 1 < nlevels {
                level.set_rmat(identity(2));
            }
            if l > 0 {
                level.set_pmat(identity(2));
            }
            if l + 1 == nlevels {
                level.set_coarse_solve(CountCalls(calls.clone()));
            }
        }
        mg
    }

    #[test]
    fn w_cycle_visits_the_coarsest_level_four_times() {
        let calls = Rc::new(Cell::new(0));
        let mut mg = chain(3, 2, calls.clone());
        mg.setup().unwrap();
        mg.set_rhs(vec![1.0, 1.0]).unwrap();
        mg.set_solution(vec![0.0, 0.0]).unwrap();
        mg.solve_one_cycle().unwrap();
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn cycle_before_setup_is_rejected() {
        let mut mg = chain(2, 1, Rc::new(Cell::new(0)));
        assert!(matches!(mg.solve_one_cycle(), Err(MgError::NotAssembled(_))));
        assert!(matches!(mg.level(5), Err(MgError::InvalidLevel(5))));
    }

    #[test]
    fn restriction_without_a_coarser_level() {
        let mut mg = Hierarchy::<Vec<f64>>::new(1);
        let l = mg.level_mut(0).unwrap();
        l.set_amat(identity(2));
        l.set_rmat(identity(2));
        assert!(matches!(mg.setup(), Err(MgError::InvalidLevel(1))));
    }

    #[test]
    fn missing_finest_vectors_are_reported() {
        let mut mg = chain(2, 1, Rc::new(Cell::new(0)));
        mg.setup().unwrap();
        let err = mg.solve_one_cycle().unwrap_err();
        assert!(matches!(err, MgError::MissingVector { level: 0, .. }));
    }

    #[test]
    fn outer_solve_with_exact_levels() {
        // Identity on both levels with an exact coarse solve converges in one cycle.
        let mut mg = chain(2, 1, Rc::new(Cell::new(0)));
        let opts = MgOptions { max_cycles: 5, ..MgOptions::default() };
        let (sol, stats) = mg.solve(&vec![2.0, -1.0], vec![0.0, 0.0], &opts).unwrap();
        assert_eq!(sol, vec![2.0, -1.0]);
        assert!(stats.converged);
        assert_eq!(stats.iterations, 1);
    }
}
