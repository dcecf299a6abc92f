//! Consistent initialization of state, time derivative and sensitivities.
//!
//! A DAE-valid starting point must satisfy every algebraic constraint. The
//! network makes this a two-phase problem: inlet states of downstream units
//! are derived from source outputs, not independent unknowns, so sources are
//! initialized first, then the coupling DOFs are solved forward, then the
//! remaining units see their final inlets.

use fnet_core::merge_codes;

use crate::system::ModelSystem;
use crate::unit::{InitMode, TimePoint};

impl ModelSystem {
    /// Compute a consistent state/derivative pair in place.
    ///
    /// `mode` selects the full or the lean variant of the unit primitives;
    /// the surrounding algorithm is identical.
    pub fn consistent_initial_conditions(
        &mut self,
        time: &TimePoint,
        mode: InitMode,
        y: &mut [f64],
        y_dot: &mut [f64],
        error_tol: f64,
    ) -> i32 {
        let mut code = 0;
        let final_offset = self.layout.coupling_offset();
        let num_dofs = self.layout.num_dofs();

        // Phase 1: algebraically consistent states.
        // Units without an inlet (network sources) come first: every other
        // unit's inlet is derived from their outputs.
        for i in 0..self.units.len() {
            if self.units[i].has_inlet() {
                continue;
            }
            let offset = self.layout.offset(i);
            let end = offset + self.layout.size(i);
            let local = self.units[i].consistent_initial_state(
                time,
                mode,
                &mut y[offset..end],
                error_tol,
            );
            code = merge_codes(code, local);
        }

        // Coupling DOFs from the now-known source outputs (zero right-hand
        // side for the forward substitution), mirrored into the inlets
        y[final_offset..num_dofs].fill(0.0);
        self.solve_coupling_dof(y);

        // Remaining units see their final inlet values
        for i in 0..self.units.len() {
            if !self.units[i].has_inlet() {
                continue;
            }
            let offset = self.layout.offset(i);
            let end = offset + self.layout.size(i);
            let local = self.units[i].consistent_initial_state(
                time,
                mode,
                &mut y[offset..end],
                error_tol,
            );
            code = merge_codes(code, local);
        }

        // Phase 2: residual at zero time derivative, Jacobian refreshed at
        // the consistent state. Full keeps the residual in the derivative
        // buffer; Lean keeps it in scratch and reuses the Jacobian as-is.
        let mut tmp = std::mem::take(&mut self.temp_state);
        let eval = match mode {
            InitMode::Full => self.residual_with_jacobian(time, y, None, y_dot),
            InitMode::Lean => self.residual_with_jacobian(time, y, None, &mut tmp),
        };
        code = merge_codes(code, eval);

        // Phase 3: local time derivatives from the residual
        for i in 0..self.units.len() {
            let offset = self.layout.offset(i);
            let end = offset + self.layout.size(i);
            let local = self.units[i].consistent_initial_time_derivative(
                time,
                mode,
                &y[offset..end],
                &mut y_dot[offset..end],
                &mut tmp[offset..end],
            );
            code = merge_codes(code, local);
        }
        self.temp_state = tmp;

        // The coupling block's derivative follows the same forward
        // substitution as the state
        y_dot[final_offset..num_dofs].fill(0.0);
        self.solve_coupling_dof(y_dot);

        code
    }

    /// Make the sensitivity vectors consistent with a consistent state.
    ///
    /// Repeats the two-phase structure of the state initialization, using the
    /// AD-tracked partials `∂res/∂p` in place of plain residual values, and
    /// subtracts the second-order cross term `-(∂²res_c/∂y∂p)·ẏ` through the
    /// dual outlet-coupling matrices before the final forward substitution.
    pub fn consistent_initial_sensitivity(
        &mut self,
        time: &TimePoint,
        mode: InitMode,
        y: &[f64],
        y_dot: &[f64],
        sens_y: &mut [Vec<f64>],
        sens_ydot: &mut [Vec<f64>],
    ) -> i32 {
        let n_sens = sens_y.len();
        let final_offset = self.layout.coupling_offset();
        let num_dofs = self.layout.num_dofs();

        // Parameter partials (and a Jacobian update) at the current state
        let mut code = self.d_res_dp_fwd_with_jacobian(time, y, Some(y_dot));

        // Phase 1: sources first, mirroring the state algorithm
        for i in 0..self.units.len() {
            if self.units[i].has_inlet() {
                continue;
            }
            code = merge_codes(code, self.unit_init_sensitivity(i, time, mode, y, y_dot, sens_y, sens_ydot));
        }

        // Coupling rows of each sensitivity vector: -∂res_c/∂p, then the
        // usual forward substitution and inlet mirroring
        for param in 0..n_sens {
            let vsy = &mut sens_y[param];
            for i in final_offset..num_dofs {
                vsy[i] = -self.ad_res[i].deriv(param);
            }
            self.solve_coupling_dof(vsy);
        }

        for i in 0..self.units.len() {
            if !self.units[i].has_inlet() {
                continue;
            }
            code = merge_codes(code, self.unit_init_sensitivity(i, time, mode, y, y_dot, sens_y, sens_ydot));
        }

        // Derivative pass: subtract the second-order cross term through the
        // dual outlet-coupling matrices, then substitute forward
        for param in 0..n_sens {
            let vsyd = &mut sens_ydot[param];
            vsyd[final_offset..num_dofs].fill(0.0);
            for (i, pair) in self.coupling.iter().enumerate() {
                let offset = self.layout.offset(i);
                let end = offset + self.layout.size(i);
                pair.fn_dual.multiply_deriv_sub(
                    &y_dot[offset..end],
                    param,
                    &mut vsyd[final_offset..num_dofs],
                );
            }
            self.solve_coupling_dof(vsyd);
        }

        code
    }

    /// Run one unit's sensitivity-initialization primitive on its slices.
    fn unit_init_sensitivity(
        &mut self,
        i: usize,
        time: &TimePoint,
        mode: InitMode,
        y: &[f64],
        y_dot: &[f64],
        sens_y: &mut [Vec<f64>],
        sens_ydot: &mut [Vec<f64>],
    ) -> i32 {
        let offset = self.layout.offset(i);
        let end = offset + self.layout.size(i);

        let mut sy: Vec<&mut [f64]> = sens_y.iter_mut().map(|v| &mut v[offset..end]).collect();
        let mut syd: Vec<&mut [f64]> =
            sens_ydot.iter_mut().map(|v| &mut v[offset..end]).collect();

        self.units[i].consistent_initial_sensitivity(
            time,
            mode,
            &y[offset..end],
            &y_dot[offset..end],
            &mut sy,
            &mut syd,
            &self.ad_res[offset..end],
        )
    }

    /// Fused convenience: state, derivative and sensitivities in one call.
    pub fn consistent_initialization(
        &mut self,
        time: &TimePoint,
        mode: InitMode,
        y: &mut [f64],
        y_dot: &mut [f64],
        sens_y: &mut [Vec<f64>],
        sens_ydot: &mut [Vec<f64>],
        error_tol: f64,
    ) -> i32 {
        let code = self.consistent_initial_conditions(time, mode, y, y_dot, error_tol);
        if code < 0 || sens_y.is_empty() {
            return code;
        }
        merge_codes(
            code,
            self.consistent_initial_sensitivity(time, mode, y, y_dot, sens_y, sens_ydot),
        )
    }
}
