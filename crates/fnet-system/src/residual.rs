//! Global residual and Jacobian evaluation.
//!
//! The global DOF vector is the concatenation of all unit blocks plus one
//! trailing coupling block. Units evaluate independently (they share no state
//! except the coupling DOFs, which are inputs), so the per-unit work fans out
//! over the rayon pool and fans back in before the coupling equations are
//! applied.

use fnet_core::{LinearValue, fuse_codes};
use fnet_network::DofLayout;
use rayon::prelude::*;

use crate::system::{ModelSystem, OutletSelect};
use crate::unit::{AdBuffers, TimePoint};

/// Split a global buffer into disjoint per-unit slices plus the coupling tail.
pub(crate) fn split_unit_slices<'a, T>(
    layout: &DofLayout,
    buf: &'a mut [T],
) -> (Vec<&'a mut [T]>, &'a mut [T]) {
    let (units_part, coupling) = buf.split_at_mut(layout.coupling_offset());
    (split_units_only(layout, units_part), coupling)
}

/// Split the unit part of a global buffer into disjoint per-unit slices.
pub(crate) fn split_units_only<'a, T>(layout: &DofLayout, buf: &'a mut [T]) -> Vec<&'a mut [T]> {
    let mut slices = Vec::with_capacity(layout.num_units());
    let mut rest = buf;
    for i in 0..layout.num_units() {
        let (head, tail) = rest.split_at_mut(layout.size(i));
        slices.push(head);
        rest = tail;
    }
    slices
}

pub(crate) fn linf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |m, x| m.max(x.abs()))
}

impl ModelSystem {
    /// Evaluate the global residual. Unit error codes are fused with the
    /// most-negative-wins rule.
    pub fn residual(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        res: &mut [f64],
    ) -> i32 {
        let layout = &self.layout;
        let units = &mut self.units;
        let err = &mut self.error_indicator;

        let (res_slices, _) = split_unit_slices(layout, res);
        units
            .par_iter_mut()
            .zip(res_slices.into_par_iter())
            .zip(err.par_iter_mut())
            .enumerate()
            .for_each(|(i, ((unit, res_i), err_i))| {
                let offset = layout.offset(i);
                let end = offset + layout.size(i);
                let y_dot_i = y_dot.map(|v| &v[offset..end]);
                *err_i = unit.residual(time, &y[offset..end], y_dot_i, res_i);
            });

        self.residual_connect::<f64>(y, res);
        fuse_codes(&self.error_indicator)
    }

    /// Evaluate the global residual and update every unit's local Jacobian.
    pub fn residual_with_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        res: &mut [f64],
    ) -> i32 {
        let layout = &self.layout;
        let units = &mut self.units;
        let err = &mut self.error_indicator;

        let (res_slices, _) = split_unit_slices(layout, res);
        let (ad_res_slices, _) = split_unit_slices(layout, &mut self.ad_res);
        let (ad_y_slices, _) = split_unit_slices(layout, &mut self.ad_y);

        units
            .par_iter_mut()
            .zip(res_slices.into_par_iter())
            .zip(ad_res_slices.into_par_iter())
            .zip(ad_y_slices.into_par_iter())
            .zip(err.par_iter_mut())
            .enumerate()
            .for_each(|(i, ((((unit, res_i), ad_res_i), ad_y_i), err_i))| {
                let offset = layout.offset(i);
                let end = offset + layout.size(i);
                let y_dot_i = y_dot.map(|v| &v[offset..end]);
                let ad = AdBuffers {
                    res: Some(ad_res_i),
                    y: Some(ad_y_i),
                    dir_offset: 0,
                };
                *err_i = unit.residual_with_jacobian(time, &y[offset..end], y_dot_i, res_i, ad);
            });

        self.residual_connect::<f64>(y, res);
        fuse_codes(&self.error_indicator)
    }

    /// Infinity norm of the residual at the given state.
    pub fn residual_norm(&mut self, time: &TimePoint, y: &[f64], y_dot: Option<&[f64]>) -> f64 {
        let mut tmp = std::mem::take(&mut self.temp_state);
        self.residual(time, y, y_dot, &mut tmp);
        let norm = linf_norm(&tmp);
        self.temp_state = tmp;
        norm
    }

    /// Apply the coupling equations to a residual buffer.
    ///
    /// The coupling block's residual is the coupling unknowns themselves
    /// (identity block), the inlet-coupling matrices add the coupling DOFs
    /// into each unit's inlet rows, and the outlet-coupling matrices add each
    /// unit's outlet into the coupling rows.
    pub(crate) fn residual_connect<T>(&self, y: &[f64], res: &mut [T])
    where
        T: LinearValue + OutletSelect,
    {
        let layout = &self.layout;
        let final_offset = layout.coupling_offset();
        let num_dofs = layout.num_dofs();

        // Identity block: coupling unknowns are defined, not derived, here
        for i in final_offset..num_dofs {
            res[i].set_constant(y[i]);
        }

        // Right macro-column: coupling DOFs into unit inlet rows
        for (i, pair) in self.coupling.iter().enumerate() {
            let offset = layout.offset(i);
            let end = offset + layout.size(i);
            pair.nf
                .multiply_add_values(&y[final_offset..], &mut res[offset..end]);
        }

        // Bottom macro-row: unit outlets into the coupling rows
        for (i, pair) in self.coupling.iter().enumerate() {
            let offset = layout.offset(i);
            let end = offset + layout.size(i);
            T::outlet(pair).multiply_add(&y[offset..end], &mut res[final_offset..]);
        }
    }

    /// Apply the coupling part of the system Jacobian:
    /// `ret_coupling = alpha*ys_coupling + beta*ret_coupling + alpha*Σ FN_i*ys_i`,
    /// `ret_i += alpha * NF_i * ys_coupling`.
    pub fn multiply_with_jacobian(&self, ys: &[f64], alpha: f64, beta: f64, ret: &mut [f64]) {
        let layout = &self.layout;
        let final_offset = layout.coupling_offset();
        let num_dofs = layout.num_dofs();

        for i in final_offset..num_dofs {
            ret[i] = alpha * ys[i] + beta * ret[i];
        }

        for (i, pair) in self.coupling.iter().enumerate() {
            let offset = layout.offset(i);
            let end = offset + layout.size(i);
            pair.nf
                .multiply_add_scaled(&ys[final_offset..], alpha, &mut ret[offset..end]);
        }

        for (i, pair) in self.coupling.iter().enumerate() {
            let offset = layout.offset(i);
            let end = offset + layout.size(i);
            pair.fn_values
                .multiply_add_scaled(&ys[offset..end], alpha, &mut ret[final_offset..]);
        }
    }

    /// Solve the coupling rows of `vec` by forward substitution, then copy the
    /// coupling values into every inlet-having unit's inlet rows.
    ///
    /// On entry the coupling rows hold the right-hand side `f`; on exit
    /// `vec_coupling = f - Σ FN_i * vec_i` and the inlet DOFs mirror it.
    pub fn solve_coupling_dof(&self, vec: &mut [f64]) {
        let layout = &self.layout;
        let final_offset = layout.coupling_offset();
        let (units_part, coupling_part) = vec.split_at_mut(final_offset);

        for (i, pair) in self.coupling.iter().enumerate() {
            let offset = layout.offset(i);
            let end = offset + layout.size(i);
            pair.fn_values
                .multiply_sub(&units_part[offset..end], coupling_part);
        }

        // y_{unit inlet} = y_{coupling}
        for (i, unit) in self.units.iter().enumerate() {
            if !unit.has_inlet() {
                continue;
            }
            let offset = layout.offset(i);
            let index = unit.inlet_dof_index();
            let stride = unit.inlet_dof_stride();
            for comp in 0..unit.num_components() {
                if let Some(cpl) = layout.coupling_index(i, comp) {
                    units_part[offset + index + comp * stride] = coupling_part[cpl];
                }
            }
        }
    }
}
