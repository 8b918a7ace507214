//! Norm-induced simplex projection via a convex QP, the update ONS needs
//! each step to keep its iterate inside the simplex under the norm induced
//! by its running covariance estimate. The solver is an explicit,
//! quietly-constructed handle rather than global state, so backends can be
//! swapped behind the [`QpSolver`] trait.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::error::{NumericError, OlpsResult};

/// Solves `min 0.5 x^T P x + q^T x` subject to `G x <= h`, `A x = b`.
pub trait QpSolver {
    fn solve(
        &self,
        p: &DMatrix<f64>,
        q: &DVector<f64>,
        g: &DMatrix<f64>,
        h: &DVector<f64>,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> OlpsResult<DVector<f64>>;
}

/// Quiet-by-construction Clarabel backend. No global solver configuration:
/// every call builds its own settings object with `verbose(false)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarabelSolver;

impl QpSolver for ClarabelSolver {
    fn solve(
        &self,
        p: &DMatrix<f64>,
        q: &DVector<f64>,
        g: &DMatrix<f64>,
        h: &DVector<f64>,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> OlpsResult<DVector<f64>> {
        let n = q.len();
        let p_csc = upper_triangular_csc(p);

        let n_eq = a.nrows();
        let n_ineq = g.nrows();
        let mut stacked = vec![0.0; (n_eq + n_ineq) * n];
        for r in 0..n_eq {
            for c in 0..n {
                stacked[r * n + c] = a[(r, c)];
            }
        }
        for r in 0..n_ineq {
            for c in 0..n {
                stacked[(n_eq + r) * n + c] = g[(r, c)];
            }
        }
        let a_csc = dense_to_csc(n_eq + n_ineq, n, &stacked);

        let mut rhs = vec![0.0; n_eq + n_ineq];
        for r in 0..n_eq {
            rhs[r] = b[r];
        }
        for r in 0..n_ineq {
            rhs[n_eq + r] = h[r];
        }

        let cones = vec![
            SupportedConeT::ZeroConeT(n_eq),
            SupportedConeT::NonnegativeConeT(n_ineq),
        ];

        let settings = DefaultSettingsBuilder::default().verbose(false).build().map_err(|e| {
            warn!(error = %e, "qp solver settings rejected");
            NumericError::SolverFailure(e.to_string())
        })?;

        let q_vec: Vec<f64> = q.iter().copied().collect();
        let mut solver = DefaultSolver::new(&p_csc, &q_vec, &a_csc, &rhs, &cones, settings);
        solver.solve();

        match solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                Ok(DVector::from_vec(solver.solution.x.clone()))
            }
            status => {
                warn!(?status, "qp solver failed to converge");
                Err(NumericError::SolverFailure(format!("{status:?}")).into())
            }
        }
    }
}

fn dense_to_csc(rows: usize, cols: usize, data_row_major: &[f64]) -> CscMatrix<f64> {
    let mut colptr = vec![0usize; cols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for c in 0..cols {
        for r in 0..rows {
            let v = data_row_major[r * cols + c];
            rowval.push(r);
            nzval.push(v);
        }
        colptr[c + 1] = rowval.len();
    }
    CscMatrix::new(rows, cols, colptr, rowval, nzval)
}

/// Clarabel reads only the upper triangle of `P` and assumes symmetry.
fn upper_triangular_csc(p: &DMatrix<f64>) -> CscMatrix<f64> {
    let n = p.nrows();
    let mut colptr = vec![0usize; n + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for c in 0..n {
        for r in 0..=c {
            rowval.push(r);
            nzval.push(p[(r, c)]);
        }
        colptr[c + 1] = rowval.len();
    }
    CscMatrix::new(n, n, colptr, rowval, nzval)
}

/// Projects `x` onto the simplex in the norm induced by the symmetric
/// positive-definite matrix `m`: `argmin_b (b-x)^T M (b-x)` s.t. `b in Δ`.
pub fn projection_in_norm(
    solver: &dyn QpSolver,
    x: &DVector<f64>,
    m: &DMatrix<f64>,
) -> OlpsResult<DVector<f64>> {
    let dim = x.len();
    let p = 2.0 * m;
    let q = -2.0 * m * x;
    let g = -DMatrix::identity(dim, dim);
    let h = DVector::zeros(dim);
    let a = DMatrix::from_element(1, dim, 1.0);
    let b = DVector::from_element(1, 1.0);
    solver.solve(&p, &q, &g, &h, &a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_in_norm_with_identity_matches_simplex_projection() {
        let solver = ClarabelSolver;
        let x = DVector::from_vec(vec![0.5, 0.3, -0.1]);
        let m = DMatrix::identity(3, 3);
        let projected = projection_in_norm(&solver, &x, &m).unwrap();
        assert!(projected.iter().all(|&v| v >= -1e-6));
        assert!((projected.sum() - 1.0).abs() < 1e-4);
    }
}
