//! The unit-operation contract and its collaborator traits.

use fnet_core::{Ad, UnitId};

use crate::params::ParamId;

/// Current point of the outer integration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimePoint {
    /// Simulation time.
    pub t: f64,
    /// Index of the current integration section.
    pub section: usize,
    /// Pre-factor of time derivatives (time transformation).
    pub time_factor: f64,
}

impl TimePoint {
    pub fn new(t: f64, section: usize) -> Self {
        Self {
            t,
            section,
            time_factor: 1.0,
        }
    }

    pub fn with_factor(t: f64, section: usize, time_factor: f64) -> Self {
        Self {
            t,
            section,
            time_factor,
        }
    }
}

/// Strategy for consistent initialization.
///
/// Both variants run the same algorithm; `Lean` lets units substitute cheaper
/// approximations where an exact recomputation is not needed (e.g. after a
/// section transition that only changed flow rates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    Full,
    Lean,
}

/// Slices of the system-owned automatic-differentiation buffers handed to a
/// unit, covering exactly the unit's own DOF block.
pub struct AdBuffers<'a> {
    /// Dual residual buffer (value + one derivative per direction).
    pub res: Option<&'a mut [Ad]>,
    /// Dual state buffer for Jacobian extraction.
    pub y: Option<&'a mut [Ad]>,
    /// First AD direction reserved for Jacobian use (directions below this
    /// offset belong to parameter sensitivities).
    pub dir_offset: usize,
}

/// Per-unit context of a local linear solve.
///
/// All slices cover exactly the unit's own DOF block.
pub struct UnitSolveCtx<'a> {
    pub t: f64,
    pub time_factor: f64,
    /// Factor in front of the time-derivative Jacobian (BDF step scaling).
    pub alpha: f64,
    /// Tolerance of the outer Newton iteration.
    pub outer_tol: f64,
    /// Error weights of the outer integrator.
    pub weight: &'a [f64],
    /// Current state.
    pub y: &'a [f64],
    /// Current time derivative.
    pub y_dot: &'a [f64],
    /// Current residual.
    pub res: &'a [f64],
}

/// Observer receiving per-unit solution slices.
///
/// The recorder decides what to retain; the engine only hands over each
/// unit's own slice of the global state vector.
pub trait SolutionRecorder {
    fn record_unit(&mut self, unit: UnitId, solution: &[f64]);
}

/// An externally provided source function (e.g. a measured profile).
///
/// A function that fails to configure is disabled rather than aborting the
/// whole system configuration.
pub trait ExternalFunction: Send + Sync {
    /// Prepare the function for use. Returns false on failure.
    fn configure(&mut self) -> bool;

    /// Evaluate the function at the given time.
    fn value(&self, t: f64) -> f64;
}

/// Contract between the coupling engine and an independently modeled unit
/// operation.
///
/// A unit owns a contiguous block of the global state vector and only ever
/// sees its own slice of the shared buffers. Error codes follow the engine
/// convention: negative = non-recoverable, 0 = success, positive =
/// recoverable with retry.
pub trait UnitOperation: Send + Sync {
    /// Unique id of this unit within the system.
    fn id(&self) -> UnitId;

    /// Number of local degrees of freedom.
    fn num_dofs(&self) -> usize;

    /// Number of transported components.
    fn num_components(&self) -> usize;

    fn has_inlet(&self) -> bool;

    fn has_outlet(&self) -> bool;

    /// Whether the unit tolerates unbalanced in/out flow (accumulation).
    fn can_accumulate(&self) -> bool {
        false
    }

    /// Local index of the first inlet DOF.
    fn inlet_dof_index(&self) -> usize {
        0
    }

    /// Local stride between inlet DOFs of consecutive components.
    fn inlet_dof_stride(&self) -> usize {
        1
    }

    /// Local index of the first outlet DOF.
    fn outlet_dof_index(&self) -> usize {
        0
    }

    /// Local stride between outlet DOFs of consecutive components.
    fn outlet_dof_stride(&self) -> usize {
        1
    }

    /// Whether the unit evaluates its Jacobian by automatic differentiation.
    fn uses_ad(&self) -> bool {
        false
    }

    /// Number of AD directions this unit needs for its Jacobian.
    fn required_ad_dirs(&self) -> usize {
        0
    }

    /// Seed the unit's block of the AD buffers (sparsity pattern, directions).
    fn prepare_ad(&mut self, _ad_res: &mut [Ad], _ad_y: &mut [Ad], _dir_offset: usize) {}

    /// Receive the total volumetric in/out flow of the active topology.
    fn set_flow_rates(&mut self, _inflow: &Ad, _outflow: &Ad) {}

    /// A discontinuous section transition has happened.
    fn notify_topology_transition(&mut self, _t: f64, _section: usize) {}

    /// Write the unit's configured initial state into its block.
    fn apply_initial_state(&self, _y: &mut [f64], _y_dot: &mut [f64]) {}

    /// Evaluate the local residual into `res`.
    fn residual(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        res: &mut [f64],
    ) -> i32;

    /// Evaluate the local residual and update the local Jacobian.
    fn residual_with_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        res: &mut [f64],
        ad: AdBuffers<'_>,
    ) -> i32 {
        let _ = ad;
        self.residual(time, y, y_dot, res)
    }

    /// Solve the local linear system `J_i * x = rhs` in place.
    fn linear_solve(&mut self, ctx: &UnitSolveCtx<'_>, rhs: &mut [f64]) -> i32;

    /// Compute an algebraically consistent local state.
    fn consistent_initial_state(
        &mut self,
        _time: &TimePoint,
        _mode: InitMode,
        _y: &mut [f64],
        _error_tol: f64,
    ) -> i32 {
        0
    }

    /// Compute the local time derivative of a consistent state.
    ///
    /// `y_dot` holds the residual evaluated at zero time derivative when
    /// `mode` is [`InitMode::Full`]; `res` holds it when `mode` is
    /// [`InitMode::Lean`].
    fn consistent_initial_time_derivative(
        &mut self,
        _time: &TimePoint,
        _mode: InitMode,
        _y: &[f64],
        _y_dot: &mut [f64],
        _res: &mut [f64],
    ) -> i32 {
        0
    }

    /// Make the local sensitivity vectors consistent, one slice per direction.
    fn consistent_initial_sensitivity(
        &mut self,
        _time: &TimePoint,
        _mode: InitMode,
        _y: &[f64],
        _y_dot: &[f64],
        _sens_y: &mut [&mut [f64]],
        _sens_ydot: &mut [&mut [f64]],
        _ad_res: &[Ad],
    ) -> i32 {
        0
    }

    /// Evaluate the dual residual (parameter directions only, Jacobian
    /// untouched).
    fn residual_sens_ad(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        ad_res: &mut [Ad],
    ) -> i32;

    /// Evaluate the dual residual and update the local Jacobian in one pass.
    fn residual_sens_with_jacobian(
        &mut self,
        time: &TimePoint,
        y: &[f64],
        y_dot: Option<&[f64]>,
        ad: AdBuffers<'_>,
    ) -> i32;

    /// Combine the dual residual with the local Jacobian actions into the
    /// forward-sensitivity residuals, one slice per direction:
    /// `res_s = (∂F/∂y)·s + (∂F/∂ẏ)·ṡ + ∂F/∂p`.
    ///
    /// `tmp1`..`tmp3` are per-unit scratch blocks for the unit's own use.
    fn residual_sens_combine(
        &mut self,
        time_factor: f64,
        sens_y: &[&[f64]],
        sens_ydot: &[&[f64]],
        res_s: &mut [&mut [f64]],
        ad_res: &[Ad],
        tmp1: &mut [f64],
        tmp2: &mut [f64],
        tmp3: &mut [f64],
    ) -> i32;

    /// Set a unit-owned parameter. Returns false if the parameter is unknown.
    fn set_parameter(&mut self, _id: &ParamId, _value: f64) -> bool {
        false
    }

    fn has_parameter(&self, _id: &ParamId) -> bool {
        false
    }

    /// All unit-owned parameters and their current values.
    fn parameter_values(&self) -> Vec<(ParamId, f64)> {
        Vec::new()
    }

    /// Register a unit-owned parameter as sensitive, seeding an AD direction.
    fn set_sensitive_parameter(&mut self, _id: &ParamId, _dir: usize, _seed: f64) -> bool {
        false
    }

    /// Change the value of an already-sensitive parameter.
    fn set_sensitive_parameter_value(&mut self, _id: &ParamId, _value: f64) {}

    /// Remove all AD directions from the unit's parameters.
    fn clear_sens_params(&mut self) {}

    /// Hand the unit's solution slice to the recorder.
    fn report_solution(&self, recorder: &mut dyn SolutionRecorder, y: &[f64]) {
        recorder.record_unit(self.id(), y);
    }
}
