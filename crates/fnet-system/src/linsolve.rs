//! Schur-complement linear solve over the block-structured system Jacobian.
//!
//! The global Jacobian has diagonal unit blocks `J_i`, the right macro-column
//! `NF` (coupling DOFs into unit inlets), the bottom macro-row `FN` (unit
//! outlets into coupling rows) and an identity block in the coupling corner.
//! Block LU elimination reduces `J*x = b` to a small iterative solve over the
//! coupling DOFs:
//!
//! ```text
//! S = I - Σ_i FN_i * J_i^{-1} * NF_i
//! ```
//!
//! `S` is never formed; its action is computed matrix-free with the units'
//! own local solves and fed to GMRES.

use fnet_core::{fuse_codes, merge_codes};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::residual::{split_unit_slices, split_units_only};
use crate::system::ModelSystem;
use crate::unit::UnitSolveCtx;

/// Scalar parameters of one linear solve, shared by all unit-level solves.
#[derive(Debug, Clone, Copy)]
pub struct LinearSolveParams {
    pub t: f64,
    pub time_factor: f64,
    /// Factor in front of the time-derivative Jacobian (BDF step scaling).
    pub alpha: f64,
    /// Tolerance of the outer Newton iteration.
    pub outer_tol: f64,
}

impl ModelSystem {
    /// Solve `J*x = rhs` in place.
    ///
    /// `weight`, `y`, `y_dot` and `res` are the outer integrator's error
    /// weights, current state, derivative and residual, forwarded to the
    /// units' local solvers. Returns a fused step code; GMRES
    /// non-convergence is a recoverable positive code, not an error.
    pub fn linear_solve(
        &mut self,
        params: &LinearSolveParams,
        rhs: &mut [f64],
        weight: &[f64],
        y: &[f64],
        y_dot: &[f64],
        res: &[f64],
    ) -> i32 {
        let layout = &self.layout;
        let final_offset = layout.coupling_offset();
        let num_coupling = layout.num_coupling_dofs();

        let unit_ctx = |i: usize| {
            let offset = layout.offset(i);
            let end = offset + layout.size(i);
            UnitSolveCtx {
                t: params.t,
                time_factor: params.time_factor,
                alpha: params.alpha,
                outer_tol: params.outer_tol,
                weight: &weight[offset..end],
                y: &y[offset..end],
                y_dot: &y_dot[offset..end],
                res: &res[offset..end],
            }
        };

        // ==== Step 1: forward elimination, y_i = J_i^{-1} b_i per unit
        {
            let (rhs_slices, _) = split_unit_slices(layout, rhs);
            self.units
                .par_iter_mut()
                .zip(rhs_slices.into_par_iter())
                .zip(self.error_indicator.par_iter_mut())
                .enumerate()
                .for_each(|(i, ((unit, rhs_i), err_i))| {
                    *err_i = unit.linear_solve(&unit_ctx(i), rhs_i);
                });
        }

        // ==== Step 2: eliminate the bottom macro-row sequentially,
        // y_f = b_f - Σ FN_i y_i. The products accumulate in place into one
        // shared right-hand side, so this loop must not run in parallel.
        {
            let (rhs_units, rhs_cpl) = rhs.split_at_mut(final_offset);
            for (i, pair) in self.coupling.iter().enumerate() {
                let offset = layout.offset(i);
                let end = offset + layout.size(i);
                pair.fn_values.multiply_sub(&rhs_units[offset..end], rhs_cpl);
            }
        }

        // rhs now holds the intermediate solution L^{-1} b; stash the
        // Schur right-hand side and clear the unit scratch
        self.temp_state[..final_offset].fill(0.0);
        let (temp_units, temp_cpl) = self.temp_state.split_at_mut(final_offset);
        let (rhs_units, rhs_cpl) = rhs.split_at_mut(final_offset);
        temp_cpl.copy_from_slice(rhs_cpl);

        // ==== Step 3: solve the Schur complement S x_f = y_f iteratively.
        // The matrix-free action runs the units' local solves in parallel and
        // serializes only the accumulate-and-subtract into the shared output.
        let tolerance =
            (layout.num_dofs() as f64).sqrt() * params.outer_tol * self.schur_safety;

        let units = &mut self.units;
        let coupling = &self.coupling;
        let err = &mut self.error_indicator;

        // The indicator is reused inside the matrix-vector action; reset it
        // so stale codes from the elimination phase are not double-counted
        let cur_error = fuse_codes(err);
        err.fill(0);

        let matvec = |x: &[f64], z: &mut [f64]| -> i32 {
            z.copy_from_slice(&x[..num_coupling]);
            let z_shared = Mutex::new(z);

            let temp_slices = split_units_only(layout, temp_units);
            units
                .par_iter_mut()
                .zip(temp_slices.into_par_iter())
                .zip(err.par_iter_mut())
                .enumerate()
                .for_each(|(i, ((unit, temp_i), err_i))| {
                    // Pure sources and sinks contribute nothing to S: one of
                    // NF/FN vanishes for them
                    if !unit.has_inlet() || !unit.has_outlet() {
                        return;
                    }
                    let pair = &coupling[i];
                    pair.nf.multiply_vector(x, temp_i);
                    let code = unit.linear_solve(&unit_ctx(i), temp_i);
                    *err_i = merge_codes(*err_i, code);

                    let mut z = z_shared.lock();
                    pair.fn_values.multiply_sub(temp_i, &mut **z);
                });

            fuse_codes(err)
        };

        let gmres_result = self.gmres.solve(
            matvec,
            tolerance,
            &weight[final_offset..],
            temp_cpl,
            rhs_cpl,
        );

        // Only the total matters from here on; restore one combined code
        let combined = merge_codes(cur_error, gmres_result);
        self.error_indicator.fill(combined);

        self.temp_state[..final_offset].fill(0.0);

        // ==== Step 4: back substitution, x_i = y_i - J_i^{-1} NF_i x_f.
        // No shared mutation: every unit touches only its own block.
        {
            let (temp_units, _) = self.temp_state.split_at_mut(final_offset);
            let temp_slices = split_units_only(layout, temp_units);
            let rhs_slices = split_units_only(layout, rhs_units);
            let coupling = &self.coupling;
            let x_f: &[f64] = rhs_cpl;

            self.units
                .par_iter_mut()
                .zip(temp_slices.into_par_iter())
                .zip(rhs_slices.into_par_iter())
                .zip(self.error_indicator.par_iter_mut())
                .enumerate()
                .for_each(|(i, (((unit, temp_i), rhs_i), err_i))| {
                    let pair = &coupling[i];
                    pair.nf.multiply_vector(x_f, temp_i);
                    let code = unit.linear_solve(&unit_ctx(i), temp_i);
                    *err_i = merge_codes(*err_i, code);

                    for (r, t) in rhs_i.iter_mut().zip(temp_i.iter()) {
                        *r -= t;
                    }
                });
        }

        fuse_codes(&self.error_indicator)
    }
}
