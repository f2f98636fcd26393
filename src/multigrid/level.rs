//! One level of a multigrid hierarchy.
//!
//! A level owns its operator `A`, its restriction `R` (to the next coarser
//! level), its interpolation `P` (from the next coarser level onto this one's
//! parent, i.e. `P` lives on the coarse side), its work vectors and its
//! smoothers. Everything is set through the setters below and checked by
//! [`OneLevel::setup`].

use std::any::Any;

use log::debug;

use crate::core::traits::{BackendKind, LevelSolver, Operator, Vector};
use crate::error::MgError;

pub type BoxedOperator<V> = Box<dyn Operator<V>>;
pub type BoxedSolver<V> = Box<dyn LevelSolver<V>>;

/// Which smoothing role a smoother is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmootherSide {
    Pre,
    Post,
    /// One object used for both roles.
    Both,
}

enum Smoothers<V> {
    Separate {
        pre: Option<BoxedSolver<V>>,
        post: Option<BoxedSolver<V>>,
    },
    Shared(BoxedSolver<V>),
}

impl<V> Smoothers<V> {
    fn set(&mut self, side: SmootherSide, s: BoxedSolver<V>) {
        let current = std::mem::replace(self, Smoothers::Separate { pre: None, post: None });
        *self = match (side, current) {
            (SmootherSide::Both, _) => Smoothers::Shared(s),
            (SmootherSide::Pre, Smoothers::Shared(old)) => Smoothers::Separate { pre: Some(s), post: Some(old) },
            (SmootherSide::Post, Smoothers::Shared(old)) => Smoothers::Separate { pre: Some(old), post: Some(s) },
            (SmootherSide::Pre, Smoothers::Separate { post, .. }) => Smoothers::Separate { pre: Some(s), post },
            (SmootherSide::Post, Smoothers::Separate { pre, .. }) => Smoothers::Separate { pre, post: Some(s) },
        };
    }

    fn get_mut(&mut self, side: SmootherSide) -> Option<&mut BoxedSolver<V>> {
        match (self, side) {
            (Smoothers::Shared(s), _) => Some(s),
            (Smoothers::Separate { pre, .. }, SmootherSide::Pre) => pre.as_mut(),
            (Smoothers::Separate { post, .. }, SmootherSide::Post) => post.as_mut(),
            (Smoothers::Separate { pre, post }, SmootherSide::Both) => pre.as_mut().or(post.as_mut()),
        }
    }

    fn has(&self, side: SmootherSide) -> bool {
        match (self, side) {
            (Smoothers::Shared(_), _) => true,
            (Smoothers::Separate { pre, .. }, SmootherSide::Pre) => pre.is_some(),
            (Smoothers::Separate { post, .. }, SmootherSide::Post) => post.is_some(),
            (Smoothers::Separate { pre, post }, SmootherSide::Both) => pre.is_some() && post.is_some(),
        }
    }
}

pub struct OneLevel<V> {
    pub(crate) level_num: usize,
    pub(crate) ncycles: usize,
    pub(crate) amat: Option<BoxedOperator<V>>,
    pub(crate) rmat: Option<BoxedOperator<V>>,
    pub(crate) pmat: Option<BoxedOperator<V>>,
    pub(crate) sol: Option<V>,
    pub(crate) rhs: Option<V>,
    pub(crate) res: Option<V>,
    smoothers: Smoothers<V>,
    coarse_solver: Option<BoxedSolver<V>>,
    fe_data: Option<Box<dyn Any>>,
    accepted: Vec<BackendKind>,
    is_setup: bool,
}

impl<V: Vector + 'static> OneLevel<V> {
    pub fn new(level_num: usize) -> Self {
        OneLevel {
            level_num,
            ncycles: 1,
            amat: None,
            rmat: None,
            pmat: None,
            sol: None,
            rhs: None,
            res: None,
            smoothers: Smoothers::Separate { pre: None, post: None },
            coarse_solver: None,
            fe_data: None,
            accepted: vec![BackendKind::Csr, BackendKind::CsrTranspose],
            is_setup: false,
        }
    }

    pub fn set_level_num(&mut self, level_num: usize) {
        self.level_num = level_num;
    }

    /// Sub-cycles performed at this level per visit; values above one give
    /// W-cycle-like descents.
    pub fn set_ncycles(&mut self, ncycles: usize) {
        self.ncycles = ncycles;
    }

    pub fn set_amat(&mut self, a: impl Operator<V> + 'static) {
        self.amat = Some(Box::new(a));
        self.is_setup = false;
    }

    pub fn set_rmat(&mut self, r: impl Operator<V> + 'static) {
        self.rmat = Some(Box::new(r));
    }

    pub fn set_pmat(&mut self, p: impl Operator<V> + 'static) {
        self.pmat = Some(Box::new(p));
    }

    pub fn set_solution_vector(&mut self, sol: V) {
        self.sol = Some(sol);
    }

    pub fn set_rhs_vector(&mut self, rhs: V) {
        self.rhs = Some(rhs);
    }

    pub fn set_residual_vector(&mut self, res: V) {
        self.res = Some(res);
    }

    pub fn set_smoother(&mut self, side: SmootherSide, s: impl LevelSolver<V> + 'static) {
        self.smoothers.set(side, Box::new(s));
    }

    pub fn set_coarse_solve(&mut self, s: impl LevelSolver<V> + 'static) {
        self.coarse_solver = Some(Box::new(s));
    }

    /// Opaque finite-element data kept alongside the level.
    pub fn set_fe_data(&mut self, data: Box<dyn Any>) {
        self.fe_data = Some(data);
    }

    /// Backends accepted for `A` at setup.
    pub fn set_accepted_backends(&mut self, kinds: &[BackendKind]) {
        self.accepted = kinds.to_vec();
        self.is_setup = false;
    }

    /// Detach `A` without dropping it.
    pub fn reset_amat(&mut self) -> Option<BoxedOperator<V>> {
        self.is_setup = false;
        self.amat.take()
    }

    pub fn reset_solution_vector(&mut self) -> Option<V> {
        self.sol.take()
    }

    pub fn reset_rhs_vector(&mut self) -> Option<V> {
        self.rhs.take()
    }

    pub fn level_num(&self) -> usize {
        self.level_num
    }

    pub fn ncycles(&self) -> usize {
        self.ncycles
    }

    pub fn amat(&self) -> Option<&dyn Operator<V>> {
        self.amat.as_deref()
    }

    pub fn rmat(&self) -> Option<&dyn Operator<V>> {
        self.rmat.as_deref()
    }

    pub fn pmat(&self) -> Option<&dyn Operator<V>> {
        self.pmat.as_deref()
    }

    pub fn solution_vector(&self) -> Option<&V> {
        self.sol.as_ref()
    }

    pub fn rhs_vector(&self) -> Option<&V> {
        self.rhs.as_ref()
    }

    pub fn residual_vector(&self) -> Option<&V> {
        self.res.as_ref()
    }

    pub fn fe_data(&self) -> Option<&dyn Any> {
        self.fe_data.as_deref()
    }

    pub fn has_smoother(&self, side: SmootherSide) -> bool {
        self.smoothers.has(side)
    }

    pub fn has_coarse_solve(&self) -> bool {
        self.coarse_solver.is_some()
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    /// Check the operators and allocate the work vectors. Levels other than
    /// the finest also get fresh solution and right-hand side vectors; the
    /// finest level uses the caller's.
    pub fn setup(&mut self) -> Result<(), MgError> {
        let level = self.level_num;
        let a = self.amat.as_ref().ok_or(MgError::MissingOperator { level, which: "A" })?;
        if level > 0 && self.pmat.is_none() {
            return Err(MgError::MissingOperator { level, which: "P" });
        }
        let kind = a.backend();
        if !self.accepted.contains(&kind) {
            return Err(MgError::IncompatibleBackend { level, kind });
        }
        let res = a.create_vector();
        if level > 0 {
            self.sol = Some(res.clone_layout());
            self.rhs = Some(res.clone_layout());
        }
        debug!(
            "level {level}: setup with {:?} operator, {} local unknowns, restriction {}",
            kind,
            res.len(),
            if self.rmat.is_some() { "set" } else { "none" }
        );
        self.res = Some(res);
        self.is_setup = true;
        Ok(())
    }

    fn vectors(&mut self) -> Result<(&V, &mut V), MgError> {
        let level = self.level_num;
        let rhs = self.rhs.as_ref().ok_or(MgError::MissingVector { level, which: "rhs" })?;
        let sol = self.sol.as_mut().ok_or(MgError::MissingVector { level, which: "sol" })?;
        Ok((rhs, sol))
    }

    /// Run the smoother of `side` if one is registered.
    pub(crate) fn smooth(&mut self, side: SmootherSide) -> Result<(), MgError> {
        let level = self.level_num;
        let rhs = self.rhs.as_ref().ok_or(MgError::MissingVector { level, which: "rhs" })?;
        let sol = self.sol.as_mut().ok_or(MgError::MissingVector { level, which: "sol" })?;
        if let Some(s) = self.smoothers.get_mut(side) {
            s.solve(rhs, sol)?;
        }
        Ok(())
    }

    /// Coarsest-level solve: the coarse solver, else the pre-smoother, else
    /// the post-smoother, else `sol = rhs`.
    pub(crate) fn coarse_solve(&mut self) -> Result<(), MgError> {
        let level = self.level_num;
        let rhs = self.rhs.as_ref().ok_or(MgError::MissingVector { level, which: "rhs" })?;
        let sol = self.sol.as_mut().ok_or(MgError::MissingVector { level, which: "sol" })?;
        if let Some(s) = self.coarse_solver.as_mut() {
            s.solve(rhs, sol)
        } else if let Some(s) = self.smoothers.get_mut(SmootherSide::Pre) {
            s.solve(rhs, sol)
        } else if let Some(s) = self.smoothers.get_mut(SmootherSide::Post) {
            s.solve(rhs, sol)
        } else {
            rhs.copy_to(sol);
            Ok(())
        }
    }

    /// `res = rhs - A * sol`.
    pub(crate) fn compute_residual(&mut self) -> Result<(), MgError> {
        let level = self.level_num;
        let a = self.amat.as_ref().ok_or(MgError::MissingOperator { level, which: "A" })?;
        let rhs = self.rhs.as_ref().ok_or(MgError::MissingVector { level, which: "rhs" })?;
        let sol = self.sol.as_ref().ok_or(MgError::MissingVector { level, which: "sol" })?;
        let res = self.res.as_mut().ok_or(MgError::NotAssembled("multigrid level"))?;
        a.apply(-1.0, sol, 1.0, Some(rhs), res)
    }

    /// `next.rhs = R * res` and `next.sol = 0`.
    pub(crate) fn restrict_into(&self, next: &mut OneLevel<V>) -> Result<(), MgError> {
        let level = self.level_num;
        let r = self.rmat.as_ref().ok_or(MgError::MissingOperator { level, which: "R" })?;
        let res = self.res.as_ref().ok_or(MgError::NotAssembled("multigrid level"))?;
        let (next_rhs, next_sol) = next.vectors_mut()?;
        r.apply(1.0, res, 0.0, None, next_rhs)?;
        next_sol.set_constant_value(0.0);
        Ok(())
    }

    /// `sol = next.P * next.sol + sol`.
    pub(crate) fn correct_from(&mut self, next: &OneLevel<V>) -> Result<(), MgError> {
        let p = next.pmat.as_ref().ok_or(MgError::MissingOperator { level: next.level_num, which: "P" })?;
        let coarse = next.sol.as_ref().ok_or(MgError::MissingVector { level: next.level_num, which: "sol" })?;
        let (_, sol) = self.vectors()?;
        p.apply_in_place(1.0, coarse, 1.0, sol)
    }

    fn vectors_mut(&mut self) -> Result<(&mut V, &mut V), MgError> {
        let level = self.level_num;
        let rhs = self.rhs.as_mut().ok_or(MgError::MissingVector { level, which: "rhs" })?;
        let sol = self.sol.as_mut().ok_or(MgError::MissingVector { level, which: "sol" })?;
        Ok((rhs, sol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counting {
        calls: Rc<Cell<usize>>,
        drops: Rc<Cell<usize>>,
    }

    impl LevelSolver<Vec<f64>> for Counting {
        fn solve(&mut self, rhs: &Vec<f64>, sol: &mut Vec<f64>) -> Result<(), MgError> {
            self.calls.set(self.calls.get() + 1);
            sol.iter_mut().zip(rhs).for_each(|(s, r)| *s = 0.5 * r);
            Ok(())
        }
    }

    impl Drop for Counting {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    fn identity(n: usize) -> CsrMatrix {
        let t: Vec<_> = (0..n).map(|i| (i, i, 1.0)).collect();
        CsrMatrix::from_triplets(n, n, &t).unwrap()
    }

    #[test]
    fn setup_checks_operators() {
        let mut l = OneLevel::<Vec<f64>>::new(1);
        assert!(matches!(l.setup(), Err(MgError::MissingOperator { level: 1, which: "A" })));
        l.set_amat(identity(3));
        assert!(matches!(l.setup(), Err(MgError::MissingOperator { level: 1, which: "P" })));
        l.set_pmat(identity(3));
        l.setup().unwrap();
        assert_eq!(l.solution_vector().map(Vec::len), Some(3));
        assert_eq!(l.residual_vector().map(Vec::len), Some(3));

        l.set_amat(faer::Mat::<f64>::identity(3, 3));
        let err = l.setup().unwrap_err();
        assert!(err.is_contract_violation());
        assert!(matches!(err, MgError::IncompatibleBackend { kind: BackendKind::Dense, .. }));
        l.set_accepted_backends(&[BackendKind::Dense]);
        l.setup().unwrap();
    }

    #[test]
    fn finest_level_keeps_caller_vectors() {
        let mut l = OneLevel::<Vec<f64>>::new(0);
        l.set_amat(identity(2));
        l.set_solution_vector(vec![1.0, 2.0]);
        l.setup().unwrap();
        assert_eq!(l.solution_vector(), Some(&vec![1.0, 2.0]));
        assert!(l.rhs_vector().is_none());
        assert_eq!(l.reset_solution_vector(), Some(vec![1.0, 2.0]));
        assert!(l.reset_amat().is_some());
        assert!(!l.is_setup());
    }

    #[test]
    fn shared_smoother_is_dropped_once() {
        let calls = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));
        {
            let mut l = OneLevel::<Vec<f64>>::new(0);
            l.set_smoother(SmootherSide::Both, Counting { calls: calls.clone(), drops: drops.clone() });
            assert!(l.has_smoother(SmootherSide::Pre) && l.has_smoother(SmootherSide::Post));
            l.set_rhs_vector(vec![2.0]);
            l.set_solution_vector(vec![0.0]);
            l.smooth(SmootherSide::Pre).unwrap();
            l.smooth(SmootherSide::Post).unwrap();
        }
        assert_eq!(calls.get(), 2);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn replacing_one_side_of_a_shared_smoother() {
        let calls = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));
        let mut l = OneLevel::<Vec<f64>>::new(0);
        l.set_smoother(SmootherSide::Both, Counting { calls: calls.clone(), drops: drops.clone() });
        l.set_smoother(SmootherSide::Pre, Counting { calls: calls.clone(), drops: drops.clone() });
        assert_eq!(drops.get(), 0);
        l.set_smoother(SmootherSide::Post, Counting { calls: calls.clone(), drops: drops.clone() });
        assert_eq!(drops.get(), 1);
        drop(l);
        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn coarse_solve_fallbacks() {
        let mut l = OneLevel::<Vec<f64>>::new(0);
        l.set_rhs_vector(vec![4.0, -2.0]);
        l.set_solution_vector(vec![0.0, 0.0]);
        l.coarse_solve().unwrap();
        assert_eq!(l.solution_vector(), Some(&vec![4.0, -2.0]));

        let calls = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));
        l.set_smoother(SmootherSide::Post, Counting { calls: calls.clone(), drops });
        l.coarse_solve().unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(l.solution_vector(), Some(&vec![2.0, -1.0]));
    }
}
