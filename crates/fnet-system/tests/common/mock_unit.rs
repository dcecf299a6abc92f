//! Mock unit operations for integration tests.
//!
//! Small linear models with closed-form Jacobians, so every engine path can
//! be checked against hand-computed results.

use std::sync::{Arc, Mutex};

use fnet_core::{Ad, UnitId};
use fnet_system::{AdBuffers, InitMode, TimePoint, UnitOperation, UnitSolveCtx};

/// Network source: algebraic outlet pinned to fixed values, one DOF per
/// component.
pub struct SourceUnit {
    pub id: u32,
    pub values: Vec<f64>,
}

impl UnitOperation for SourceUnit {
    fn id(&self) -> UnitId {
        UnitId::from_index(self.id)
    }

    fn num_dofs(&self) -> usize {
        self.values.len()
    }

    fn num_components(&self) -> usize {
        self.values.len()
    }

    fn has_inlet(&self) -> bool {
        false
    }

    fn has_outlet(&self) -> bool {
        true
    }

    fn residual(
        &mut self,
        _time: &TimePoint,
        y: &[f64],
        _y_dot: Option<&[f64]>,
        res: &mut [f64],
    ) -> i32 {
        for (i, r) in res.iter_mut().enumerate() {
            *r = y[i] - self.values[i];
        }
        0
    }

    fn linear_solve(&mut self, _ctx: &UnitSolveCtx<'_>, _rhs: &mut [f64]) -> i32 {
        // J = I
        0
    }

    fn apply_initial_state(&self, y: &mut [f64], y_dot: &mut [f64]) {
        y.copy_from_slice(&self.values);
        y_dot.fill(0.0);
    }

    fn consistent_initial_state(
        &mut self,
        _time: &TimePoint,
        _mode: InitMode,
        y: &mut [f64],
        _error_tol: f64,
    ) -> i32 {
        y.copy_from_slice(&self.values);
        0
    }

    fn consistent_initial_time_derivative(
        &mut self,
        _time: &TimePoint,
        _mode: InitMode,
        _y: &[f64],
        y_dot: &mut [f64],
        _res: &mut [f64],
    ) -> i32 {
        y_dot.fill(0.0);
        0
    }

    fn consistent_initial_sensitivity(
        &mut self,
        _time: &TimePoint,
        _mode: InitMode,
        _y: &[f64],
        _y_dot: &[f64],
        sens_y: &mut [&mut [f64]],
        sens_ydot: &mut [&mut [f64]],
        _ad_res: &[Ad],
    ) -> i32 {
        // Pinned values do not depend on any network parameter
        for s in sens_y.iter_mut() {
            s.fill(0.0);
        }
        for s in sens_ydot.iter_mut() {
            s.fill(0.0);
        }
        0
    }

    fn residual_sens_ad(
        &mut self,
        _time: &TimePoint,
        y: &[f64],
        _y_dot: Option<&[f64]>,
        ad_res: &mut [Ad],
    ) -> i32 {
        for (i, r) in ad_res.iter_mut().enumerate() {
            *r = Ad::constant(y[i] - self.values[i]);
        }
        0
    }

    fn residual_sens_with_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        ad: AdBuffers<'_>,
    ) -> i32 {
        match ad.res {
            Some(ad_res) => self.residual_sens_ad(time, y, y_dot, ad_res),
            None => 0,
        }
    }

    fn residual_sens_combine(
        &mut self,
        _time_factor: f64,
        sens_y: &[&[f64]],
        _sens_ydot: &[&[f64]],
        res_s: &mut [&mut [f64]],
        ad_res: &[Ad],
        _tmp1: &mut [f64],
        _tmp2: &mut [f64],
        _tmp3: &mut [f64],
    ) -> i32 {
        for (dir, out) in res_s.iter_mut().enumerate() {
            for i in 0..out.len() {
                out[i] = sens_y[dir][i] + ad_res[i].deriv(dir);
            }
        }
        0
    }
}

/// Pass-through relay: every DOF is simultaneously inlet and outlet, the
/// residual pins it to the coupling value (algebraic).
pub struct RelayUnit {
    pub id: u32,
    pub comps: usize,
    pub accumulate: bool,
    /// Code returned from `residual` (for error-fusion tests).
    pub residual_code: i32,
    /// Code returned from `linear_solve` (for error-fusion tests).
    pub solve_code: i32,
}

impl RelayUnit {
    pub fn new(id: u32, comps: usize) -> Self {
        Self {
            id,
            comps,
            accumulate: false,
            residual_code: 0,
            solve_code: 0,
        }
    }
}

impl UnitOperation for RelayUnit {
    fn id(&self) -> UnitId {
        UnitId::from_index(self.id)
    }

    fn num_dofs(&self) -> usize {
        self.comps
    }

    fn num_components(&self) -> usize {
        self.comps
    }

    fn has_inlet(&self) -> bool {
        true
    }

    fn has_outlet(&self) -> bool {
        true
    }

    fn can_accumulate(&self) -> bool {
        self.accumulate
    }

    fn residual(
        &mut self,
        _time: &TimePoint,
        y: &[f64],
        _y_dot: Option<&[f64]>,
        res: &mut [f64],
    ) -> i32 {
        res.copy_from_slice(y);
        self.residual_code
    }

    fn linear_solve(&mut self, _ctx: &UnitSolveCtx<'_>, _rhs: &mut [f64]) -> i32 {
        // J = I
        self.solve_code
    }

    fn consistent_initial_time_derivative(
        &mut self,
        _time: &TimePoint,
        _mode: InitMode,
        _y: &[f64],
        y_dot: &mut [f64],
        _res: &mut [f64],
    ) -> i32 {
        y_dot.fill(0.0);
        0
    }

    fn residual_sens_ad(
        &mut self,
        _time: &TimePoint,
        y: &[f64],
        _y_dot: Option<&[f64]>,
        ad_res: &mut [Ad],
    ) -> i32 {
        for (i, r) in ad_res.iter_mut().enumerate() {
            *r = Ad::constant(y[i]);
        }
        0
    }

    fn residual_sens_with_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        ad: AdBuffers<'_>,
    ) -> i32 {
        match ad.res {
            Some(ad_res) => self.residual_sens_ad(time, y, y_dot, ad_res),
            None => 0,
        }
    }

    fn residual_sens_combine(
        &mut self,
        _time_factor: f64,
        sens_y: &[&[f64]],
        _sens_ydot: &[&[f64]],
        res_s: &mut [&mut [f64]],
        ad_res: &[Ad],
        _tmp1: &mut [f64],
        _tmp2: &mut [f64],
        _tmp3: &mut [f64],
    ) -> i32 {
        for (dir, out) in res_s.iter_mut().enumerate() {
            for i in 0..out.len() {
                out[i] = sens_y[dir][i] + ad_res[i].deriv(dir);
            }
        }
        0
    }
}

/// Terminal sink: one algebraic DOF per component mirroring the inlet.
/// Records the total inflow pushed at every topology transition.
pub struct SinkUnit {
    pub id: u32,
    pub comps: usize,
    pub inflows_seen: Arc<Mutex<Vec<f64>>>,
}

impl SinkUnit {
    pub fn new(id: u32, comps: usize) -> Self {
        Self {
            id,
            comps,
            inflows_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl UnitOperation for SinkUnit {
    fn id(&self) -> UnitId {
        UnitId::from_index(self.id)
    }

    fn num_dofs(&self) -> usize {
        self.comps
    }

    fn num_components(&self) -> usize {
        self.comps
    }

    fn has_inlet(&self) -> bool {
        true
    }

    fn has_outlet(&self) -> bool {
        false
    }

    fn set_flow_rates(&mut self, inflow: &Ad, _outflow: &Ad) {
        self.inflows_seen
            .lock()
            .expect("inflow log lock")
            .push(inflow.value());
    }

    fn residual(
        &mut self,
        _time: &TimePoint,
        y: &[f64],
        _y_dot: Option<&[f64]>,
        res: &mut [f64],
    ) -> i32 {
        res.copy_from_slice(y);
        0
    }

    fn linear_solve(&mut self, _ctx: &UnitSolveCtx<'_>, _rhs: &mut [f64]) -> i32 {
        0
    }

    fn consistent_initial_time_derivative(
        &mut self,
        _time: &TimePoint,
        _mode: InitMode,
        _y: &[f64],
        y_dot: &mut [f64],
        _res: &mut [f64],
    ) -> i32 {
        y_dot.fill(0.0);
        0
    }

    fn residual_sens_ad(
        &mut self,
        _time: &TimePoint,
        y: &[f64],
        _y_dot: Option<&[f64]>,
        ad_res: &mut [Ad],
    ) -> i32 {
        for (i, r) in ad_res.iter_mut().enumerate() {
            *r = Ad::constant(y[i]);
        }
        0
    }

    fn residual_sens_with_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        ad: AdBuffers<'_>,
    ) -> i32 {
        match ad.res {
            Some(ad_res) => self.residual_sens_ad(time, y, y_dot, ad_res),
            None => 0,
        }
    }

    fn residual_sens_combine(
        &mut self,
        _time_factor: f64,
        sens_y: &[&[f64]],
        _sens_ydot: &[&[f64]],
        res_s: &mut [&mut [f64]],
        ad_res: &[Ad],
        _tmp1: &mut [f64],
        _tmp2: &mut [f64],
        _tmp3: &mut [f64],
    ) -> i32 {
        for (dir, out) in res_s.iter_mut().enumerate() {
            for i in 0..out.len() {
                out[i] = sens_y[dir][i] + ad_res[i].deriv(dir);
            }
        }
        0
    }
}

/// Well-mixed tank with one component: DOFs `[inlet, content]`,
/// `d(content)/dt = k * (inlet - content)`, outlet is the content.
pub struct TankUnit {
    pub id: u32,
    pub k: f64,
}

impl UnitOperation for TankUnit {
    fn id(&self) -> UnitId {
        UnitId::from_index(self.id)
    }

    fn num_dofs(&self) -> usize {
        2
    }

    fn num_components(&self) -> usize {
        1
    }

    fn has_inlet(&self) -> bool {
        true
    }

    fn has_outlet(&self) -> bool {
        true
    }

    fn inlet_dof_index(&self) -> usize {
        0
    }

    fn outlet_dof_index(&self) -> usize {
        1
    }

    fn residual(
        &mut self,
        _time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        res: &mut [f64],
    ) -> i32 {
        let c_dot = y_dot.map_or(0.0, |v| v[1]);
        res[0] = y[0];
        res[1] = c_dot - self.k * (y[0] - y[1]);
        0
    }

    fn linear_solve(&mut self, ctx: &UnitSolveCtx<'_>, rhs: &mut [f64]) -> i32 {
        // J = [[1, 0], [-k, k + alpha]]
        let x0 = rhs[0];
        rhs[1] = (rhs[1] + self.k * x0) / (self.k + ctx.alpha);
        0
    }

    fn consistent_initial_time_derivative(
        &mut self,
        _time: &TimePoint,
        mode: InitMode,
        _y: &[f64],
        y_dot: &mut [f64],
        res: &mut [f64],
    ) -> i32 {
        // The residual evaluated at zero time derivative sits in `y_dot`
        // (Full) or `res` (Lean); the content row flips its sign
        let r1 = match mode {
            InitMode::Full => y_dot[1],
            InitMode::Lean => res[1],
        };
        y_dot[0] = 0.0;
        y_dot[1] = -r1;
        0
    }

    fn consistent_initial_sensitivity(
        &mut self,
        _time: &TimePoint,
        _mode: InitMode,
        _y: &[f64],
        _y_dot: &[f64],
        sens_y: &mut [&mut [f64]],
        sens_ydot: &mut [&mut [f64]],
        ad_res: &[Ad],
    ) -> i32 {
        // Content sensitivity is a differential state (kept as-is); its
        // derivative follows from the content equation
        for (dir, syd) in sens_ydot.iter_mut().enumerate() {
            let s = &sens_y[dir];
            syd[0] = 0.0;
            syd[1] = self.k * (s[0] - s[1]) - ad_res[1].deriv(dir);
        }
        0
    }

    fn residual_sens_ad(
        &mut self,
        _time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        ad_res: &mut [Ad],
    ) -> i32 {
        let c_dot = y_dot.map_or(0.0, |v| v[1]);
        ad_res[0] = Ad::constant(y[0]);
        ad_res[1] = Ad::constant(c_dot - self.k * (y[0] - y[1]));
        0
    }

    fn residual_sens_with_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        ad: AdBuffers<'_>,
    ) -> i32 {
        match ad.res {
            Some(ad_res) => self.residual_sens_ad(time, y, y_dot, ad_res),
            None => 0,
        }
    }

    fn residual_sens_combine(
        &mut self,
        _time_factor: f64,
        sens_y: &[&[f64]],
        sens_ydot: &[&[f64]],
        res_s: &mut [&mut [f64]],
        ad_res: &[Ad],
        _tmp1: &mut [f64],
        _tmp2: &mut [f64],
        _tmp3: &mut [f64],
    ) -> i32 {
        for (dir, out) in res_s.iter_mut().enumerate() {
            let s = &sens_y[dir];
            let s_dot = &sens_ydot[dir];
            out[0] = s[0] + ad_res[0].deriv(dir);
            out[1] = s_dot[1] - self.k * (s[0] - s[1]) + ad_res[1].deriv(dir);
        }
        0
    }
}
