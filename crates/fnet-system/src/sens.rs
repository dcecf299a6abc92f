//! Forward parameter-sensitivity residuals.
//!
//! One sensitivity system per registered sensitive parameter. Units provide
//! their own dual residual and Jacobian-combination primitives; the engine
//! contributes the coupling algebra: the Jacobian action through NF/FN and
//! the AD-tracked partials of the coupling rows.

use fnet_core::{Ad, fuse_codes, merge_codes};
use rayon::prelude::*;

use crate::residual::{linf_norm, split_unit_slices};
use crate::system::ModelSystem;
use crate::unit::{AdBuffers, TimePoint};

/// Shared per-unit views of a set of per-direction buffers.
fn per_unit_views<'a>(
    layout: &fnet_network::DofLayout,
    n_units: usize,
    bufs: &'a [Vec<f64>],
) -> Vec<Vec<&'a [f64]>> {
    (0..n_units)
        .map(|i| {
            let offset = layout.offset(i);
            let end = offset + layout.size(i);
            bufs.iter().map(|v| &v[offset..end]).collect()
        })
        .collect()
}

impl ModelSystem {
    /// Forward sensitivity residuals, reusing the Jacobians as they are.
    pub fn residual_sens_fwd(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        sens_y: &[Vec<f64>],
        sens_ydot: &[Vec<f64>],
        res_s: &mut [Vec<f64>],
    ) -> i32 {
        self.residual_sens_algorithm(false, time, y, y_dot, sens_y, sens_ydot, res_s)
    }

    /// Forward sensitivity residuals, updating every unit's Jacobian in the
    /// same dual evaluation.
    pub fn residual_sens_fwd_with_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        sens_y: &[Vec<f64>],
        sens_ydot: &[Vec<f64>],
        res_s: &mut [Vec<f64>],
    ) -> i32 {
        self.residual_sens_algorithm(true, time, y, y_dot, sens_y, sens_ydot, res_s)
    }

    fn residual_sens_algorithm(
        &mut self,
        with_jacobian: bool,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        sens_y: &[Vec<f64>],
        sens_ydot: &[Vec<f64>],
        res_s: &mut [Vec<f64>],
    ) -> i32 {
        let n_sens = sens_y.len();
        let num_dofs = self.layout.num_dofs();
        let final_offset = self.layout.coupling_offset();

        let mut ad_res = std::mem::take(&mut self.ad_res);

        // Step 1: dual residual evaluation, parallel over units
        {
            let layout = &self.layout;
            let err = &mut self.error_indicator;
            let (ad_res_slices, _) = split_unit_slices(layout, &mut ad_res);
            let (ad_y_slices, _) = split_unit_slices(layout, &mut self.ad_y);

            self.units
                .par_iter_mut()
                .zip(ad_res_slices.into_par_iter())
                .zip(ad_y_slices.into_par_iter())
                .zip(err.par_iter_mut())
                .enumerate()
                .for_each(|(i, (((unit, ad_res_i), ad_y_i), err_i))| {
                    let offset = layout.offset(i);
                    let end = offset + layout.size(i);
                    let y_dot_i = y_dot.map(|v| &v[offset..end]);
                    *err_i = if with_jacobian {
                        let ad = AdBuffers {
                            res: Some(ad_res_i),
                            y: Some(ad_y_i),
                            dir_offset: n_sens,
                        };
                        unit.residual_sens_with_jacobian(time, &y[offset..end], y_dot_i, ad)
                    } else {
                        unit.residual_sens_ad(time, &y[offset..end], y_dot_i, ad_res_i)
                    };
                });
        }

        // Coupling equations with dual coefficients
        self.residual_connect::<Ad>(y, &mut ad_res);

        // Step 2: combine with the local Jacobian actions, parallel over units
        {
            let layout = &self.layout;
            let err = &mut self.error_indicator;

            let mut tmp1 = vec![0.0; num_dofs];
            let mut tmp2 = vec![0.0; num_dofs];
            let mut tmp3 = vec![0.0; num_dofs];

            let n_units = self.units.len();
            let sy_units = per_unit_views(layout, n_units, sens_y);
            let syd_units = per_unit_views(layout, n_units, sens_ydot);

            // Transpose the per-direction buffers into per-unit groups of
            // disjoint mutable slices
            let mut rs_units: Vec<Vec<&mut [f64]>> =
                (0..n_units).map(|_| Vec::with_capacity(n_sens)).collect();
            for buf in res_s.iter_mut() {
                let (slices, _) = split_unit_slices(layout, buf);
                for (i, s) in slices.into_iter().enumerate() {
                    rs_units[i].push(s);
                }
            }

            let (tmp1_slices, _) = split_unit_slices(layout, &mut tmp1);
            let (tmp2_slices, _) = split_unit_slices(layout, &mut tmp2);
            let (tmp3_slices, _) = split_unit_slices(layout, &mut tmp3);
            let ad_res_ref = &ad_res;

            self.units
                .par_iter_mut()
                .zip(rs_units.into_par_iter())
                .zip(tmp1_slices.into_par_iter())
                .zip(tmp2_slices.into_par_iter())
                .zip(tmp3_slices.into_par_iter())
                .zip(err.par_iter_mut())
                .enumerate()
                .for_each(|(i, (((((unit, mut rs_i), t1), t2), t3), err_i))| {
                    let offset = layout.offset(i);
                    let end = offset + layout.size(i);
                    let code = unit.residual_sens_combine(
                        time.time_factor,
                        &sy_units[i],
                        &syd_units[i],
                        &mut rs_i,
                        &ad_res_ref[offset..end],
                        t1,
                        t2,
                        t3,
                    );
                    *err_i = merge_codes(*err_i, code);
                });
        }

        // Step 3: coupling rows per direction: the Jacobian action on the
        // sensitivity vector plus the AD-tracked partial of the coupling
        // equations. The derivative part (∂F/∂ẏ)·ṡ is identically zero there.
        {
            let sys: &ModelSystem = self;
            let ad_res_ref = &ad_res;
            res_s
                .par_iter_mut()
                .enumerate()
                .for_each(|(param, buf)| {
                    sys.multiply_with_jacobian(&sens_y[param], 1.0, 0.0, buf);
                    for i in final_offset..num_dofs {
                        buf[i] += ad_res_ref[i].deriv(param);
                    }
                });
        }

        self.ad_res = ad_res;
        fuse_codes(&self.error_indicator)
    }

    /// Evaluate `∂res/∂p` for all registered directions into the dual
    /// residual buffer, updating every unit's Jacobian in the same pass.
    pub fn d_res_dp_fwd_with_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
    ) -> i32 {
        let mut ad_res = std::mem::take(&mut self.ad_res);

        {
            let layout = &self.layout;
            let err = &mut self.error_indicator;
            let (ad_res_slices, _) = split_unit_slices(layout, &mut ad_res);
            let (ad_y_slices, _) = split_unit_slices(layout, &mut self.ad_y);

            self.units
                .par_iter_mut()
                .zip(ad_res_slices.into_par_iter())
                .zip(ad_y_slices.into_par_iter())
                .zip(err.par_iter_mut())
                .enumerate()
                .for_each(|(i, (((unit, ad_res_i), ad_y_i), err_i))| {
                    let offset = layout.offset(i);
                    let end = offset + layout.size(i);
                    let y_dot_i = y_dot.map(|v| &v[offset..end]);
                    let ad = AdBuffers {
                        res: Some(ad_res_i),
                        y: Some(ad_y_i),
                        dir_offset: 0,
                    };
                    *err_i = unit.residual_sens_with_jacobian(time, &y[offset..end], y_dot_i, ad);
                });
        }

        self.residual_connect::<Ad>(y, &mut ad_res);
        self.ad_res = ad_res;
        fuse_codes(&self.error_indicator)
    }

    /// Infinity norms of all sensitivity residuals at the given point.
    pub fn residual_sens_norms(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        sens_y: &[Vec<f64>],
        sens_ydot: &[Vec<f64>],
    ) -> (i32, Vec<f64>) {
        let num_dofs = self.layout.num_dofs();
        let mut res_s = vec![vec![0.0; num_dofs]; sens_y.len()];
        let code = self.residual_sens_fwd(time, y, y_dot, sens_y, sens_ydot, &mut res_s);
        let norms = res_s.iter().map(|v| linf_norm(v)).collect();
        (code, norms)
    }
}
