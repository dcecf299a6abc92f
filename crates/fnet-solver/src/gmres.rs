//! Restarted GMRES for the Schur-complement system over coupling DOFs.
//!
//! The operator is matrix-free: a callback computing `z = S*x` and returning a
//! signed step code (0 = success, negative = non-recoverable, positive =
//! recoverable). Norms are weighted by a caller-supplied scaling vector, so
//! the stopping criterion matches the outer integrator's error weights.
//!
//! Non-convergence is reported as a positive (recoverable) code, never as a
//! panic or error value; retry policy is the caller's business.

use nalgebra::{DMatrix, DVector};
use tracing::warn;

/// Gram-Schmidt variant used to orthogonalize the Krylov basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orthogonalization {
    /// One pass against the unmodified vector; cheaper, less robust.
    ClassicalGramSchmidt,
    /// Sequential projection; the usual default.
    #[default]
    ModifiedGramSchmidt,
}

/// Step code returned when the restart budget is exhausted.
pub const GMRES_NOT_CONVERGED: i32 = 1;

/// Restarted GMRES workspace configuration.
#[derive(Debug, Clone)]
pub struct Gmres {
    size: usize,
    max_krylov: usize,
    ortho: Orthogonalization,
    max_restarts: usize,
}

impl Gmres {
    /// Create a solver for systems of the given size.
    ///
    /// `max_krylov == 0` selects the full system size (no restarting needed
    /// before the exact solution is reached in theory).
    pub fn new(
        size: usize,
        max_krylov: usize,
        ortho: Orthogonalization,
        max_restarts: usize,
    ) -> Self {
        let max_krylov = if max_krylov == 0 {
            size
        } else {
            max_krylov.min(size)
        };
        Self {
            size,
            max_krylov,
            ortho,
            max_restarts,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn ortho_method(&mut self, ortho: Orthogonalization) {
        self.ortho = ortho;
    }

    pub fn max_restarts(&mut self, max_restarts: usize) {
        self.max_restarts = max_restarts;
    }

    /// Solve `S*x = rhs` with the matrix-free operator `matvec`.
    ///
    /// `x` holds the initial guess on entry and the solution on exit. `weight`
    /// scales residual norms component-wise. Returns 0 on convergence, the
    /// operator's code if an application fails, or [`GMRES_NOT_CONVERGED`]
    /// once the restart budget is exhausted.
    pub fn solve<F>(&self, mut matvec: F, tol: f64, weight: &[f64], rhs: &[f64], x: &mut [f64]) -> i32
    where
        F: FnMut(&[f64], &mut [f64]) -> i32,
    {
        let n = self.size;
        if n == 0 {
            return 0;
        }
        debug_assert_eq!(weight.len(), n);
        debug_assert_eq!(rhs.len(), n);
        debug_assert_eq!(x.len(), n);

        let m = self.max_krylov.max(1);
        let mut sx = vec![0.0; n];
        let mut unscaled = vec![0.0; n];
        let mut last_residual = f64::INFINITY;

        for _restart in 0..=self.max_restarts {
            // Scaled residual r = W*(rhs - S*x)
            let code = matvec(x, &mut sx);
            if code != 0 {
                return code;
            }
            let r = DVector::from_iterator(n, (0..n).map(|i| weight[i] * (rhs[i] - sx[i])));
            let beta = r.norm();
            if beta <= tol {
                return 0;
            }
            last_residual = beta;

            let mut basis: Vec<DVector<f64>> = Vec::with_capacity(m + 1);
            basis.push(r / beta);

            let mut h = DMatrix::zeros(m + 1, m);
            let mut cs = vec![0.0; m];
            let mut sn = vec![0.0; m];
            let mut g = DVector::zeros(m + 1);
            g[0] = beta;

            let mut cols = 0;
            for j in 0..m {
                // w = W * S * (v_j / W): the operator acts in unscaled space
                for i in 0..n {
                    unscaled[i] = basis[j][i] / weight[i];
                }
                let code = matvec(&unscaled, &mut sx);
                if code != 0 {
                    return code;
                }
                let mut w = DVector::from_iterator(n, (0..n).map(|i| weight[i] * sx[i]));

                match self.ortho {
                    Orthogonalization::ClassicalGramSchmidt => {
                        let coeffs: Vec<f64> = (0..=j).map(|i| basis[i].dot(&w)).collect();
                        for (i, &hij) in coeffs.iter().enumerate() {
                            h[(i, j)] = hij;
                            w.axpy(-hij, &basis[i], 1.0);
                        }
                    }
                    Orthogonalization::ModifiedGramSchmidt => {
                        for i in 0..=j {
                            let hij = basis[i].dot(&w);
                            h[(i, j)] = hij;
                            w.axpy(-hij, &basis[i], 1.0);
                        }
                    }
                }

                let h_next = w.norm();
                h[(j + 1, j)] = h_next;
                cols = j + 1;

                // Rotate the new column into upper-triangular form
                for i in 0..j {
                    let hi = h[(i, j)];
                    let hi1 = h[(i + 1, j)];
                    h[(i, j)] = cs[i] * hi + sn[i] * hi1;
                    h[(i + 1, j)] = -sn[i] * hi + cs[i] * hi1;
                }
                let (c, s) = givens(h[(j, j)], h[(j + 1, j)]);
                cs[j] = c;
                sn[j] = s;
                h[(j, j)] = c * h[(j, j)] + s * h[(j + 1, j)];
                h[(j + 1, j)] = 0.0;

                let gj = g[j];
                g[j] = c * gj;
                g[j + 1] = -s * gj;

                let residual = g[j + 1].abs();
                last_residual = residual;
                if residual <= tol || h_next <= f64::EPSILON * beta {
                    break;
                }
                basis.push(w / h_next);
            }

            // Solve the triangular system H y = g and update x in unscaled space
            let mut y = vec![0.0; cols];
            for i in (0..cols).rev() {
                let mut sum = g[i];
                for (k, &yk) in y.iter().enumerate().skip(i + 1) {
                    sum -= h[(i, k)] * yk;
                }
                y[i] = sum / h[(i, i)];
            }
            for (k, &yk) in y.iter().enumerate() {
                for i in 0..n {
                    x[i] += yk * basis[k][i] / weight[i];
                }
            }

            if last_residual <= tol {
                return 0;
            }
        }

        warn!(
            residual = last_residual,
            tol, "GMRES did not converge within the restart budget"
        );
        GMRES_NOT_CONVERGED
    }
}

fn givens(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else if a.abs() < b.abs() {
        let t = a / b;
        let s = 1.0 / (1.0 + t * t).sqrt();
        (s * t, s)
    } else {
        let t = b / a;
        let c = 1.0 / (1.0 + t * t).sqrt();
        (c, c * t)
    }
}
