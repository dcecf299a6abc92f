//! The model system: unit registration, configuration, topology transitions
//! and coupling-matrix assembly.

use fnet_core::{Ad, LinearValue, UnitId};
use fnet_network::{DofLayout, FlowSchedule, RawSwitch, UnitTopo};
use fnet_solver::{Gmres, Orthogonalization, SparseMat};
use tracing::{debug, error};

use crate::error::{SystemError, SystemResult};
use crate::params::{FlowParamMap, SensParamSet};
use crate::unit::{ExternalFunction, SolutionRecorder, UnitOperation};

/// Settings of the Schur-complement linear solver.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    /// Maximum Krylov subspace dimension (0 selects the coupling-DOF count).
    pub max_krylov: usize,
    /// Gram-Schmidt variant for the Krylov basis.
    pub ortho: Orthogonalization,
    /// Maximum number of GMRES restarts.
    pub max_restarts: usize,
    /// Safety factor applied to the Schur solve tolerance.
    pub schur_safety: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_krylov: 0,
            ortho: Orthogonalization::ModifiedGramSchmidt,
            max_restarts: 10,
            schur_safety: 1e-8,
        }
    }
}

/// The inlet- and outlet-coupling matrices of one unit.
///
/// `nf` maps coupling DOFs into the unit's inlet rows; `fn_dual` maps the
/// unit's outlet into the coupling rows with dual-valued (normalized flow
/// fraction) coefficients. `fn_values` is the value-identical numeric shadow
/// used by code paths that need no derivative information.
#[derive(Default)]
pub(crate) struct CouplingPair {
    pub nf: SparseMat<f64>,
    pub fn_dual: SparseMat<Ad>,
    pub fn_values: SparseMat<f64>,
}

/// Selects the outlet-coupling matrix matching the value kind of a residual
/// buffer: the numeric shadow for plain evaluation, the dual matrix when the
/// result has to carry parameter derivatives.
pub(crate) trait OutletSelect: LinearValue {
    fn outlet(pair: &CouplingPair) -> &SparseMat<Self>
    where
        Self: Sized;
}

impl OutletSelect for f64 {
    fn outlet(pair: &CouplingPair) -> &SparseMat<f64> {
        &pair.fn_values
    }
}

impl OutletSelect for Ad {
    fn outlet(pair: &CouplingPair) -> &SparseMat<Ad> {
        &pair.fn_dual
    }
}

/// A coupled system of unit operations.
///
/// Units are registered first, then [`ModelSystem::configure`] installs the
/// flow schedule and allocates all workspaces. The system exclusively owns
/// its units, the coupling matrices and the network description.
pub struct ModelSystem {
    pub(crate) units: Vec<Box<dyn UnitOperation>>,
    pub(crate) layout: DofLayout,
    pub(crate) schedule: Option<FlowSchedule>,
    pub(crate) coupling: Vec<CouplingPair>,
    pub(crate) total_inlet_flow: Vec<Ad>,
    pub(crate) error_indicator: Vec<i32>,
    pub(crate) temp_state: Vec<f64>,
    pub(crate) ad_res: Vec<Ad>,
    pub(crate) ad_y: Vec<Ad>,
    pub(crate) flow_params: FlowParamMap,
    pub(crate) sens_params: SensParamSet,
    pub(crate) externals: Vec<Option<Box<dyn ExternalFunction>>>,
    pub(crate) gmres: Gmres,
    pub(crate) schur_safety: f64,
}

impl Default for ModelSystem {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            layout: DofLayout::build(&[]),
            schedule: None,
            coupling: Vec::new(),
            total_inlet_flow: Vec::new(),
            error_indicator: Vec::new(),
            temp_state: Vec::new(),
            ad_res: Vec::new(),
            ad_y: Vec::new(),
            flow_params: FlowParamMap::default(),
            sens_params: SensParamSet::default(),
            externals: Vec::new(),
            gmres: Gmres::new(0, 0, Orthogonalization::ModifiedGramSchmidt, 0),
            schur_safety: 1e-8,
        }
    }
}

impl ModelSystem {
    /// Create an empty system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit operation. Fails on a duplicate unit id.
    pub fn add_unit(&mut self, unit: Box<dyn UnitOperation>) -> SystemResult<usize> {
        if self.units.iter().any(|m| m.id() == unit.id()) {
            return Err(SystemError::DuplicateUnitId { id: unit.id() });
        }
        self.units.push(unit);
        Ok(self.units.len() - 1)
    }

    /// Remove a unit operation, handing ownership back to the caller.
    ///
    /// The system must be reconfigured before it is used again.
    pub fn remove_unit(&mut self, id: UnitId) -> Option<Box<dyn UnitOperation>> {
        let index = self.units.iter().position(|m| m.id() == id)?;
        self.schedule = None;
        Some(self.units.remove(index))
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    pub fn unit(&self, index: usize) -> Option<&dyn UnitOperation> {
        self.units.get(index).map(|u| u.as_ref())
    }

    /// Find a unit by its external id.
    pub fn unit_by_id(&self, id: UnitId) -> Option<&dyn UnitOperation> {
        self.units.iter().find(|u| u.id() == id).map(|u| u.as_ref())
    }

    /// Total DOF count including the coupling block. Valid after `configure`.
    pub fn num_dofs(&self) -> usize {
        self.layout.num_dofs()
    }

    pub fn num_coupling_dofs(&self) -> usize {
        self.layout.num_coupling_dofs()
    }

    pub fn layout(&self) -> &DofLayout {
        &self.layout
    }

    /// Whether any registered unit evaluates its Jacobian with AD.
    pub fn uses_ad(&self) -> bool {
        self.units.iter().any(|u| u.uses_ad())
    }

    /// Maximum AD direction count over all units (units are locally
    /// independent, so directions are shared).
    pub fn required_ad_dirs(&self) -> usize {
        self.units
            .iter()
            .map(|u| u.required_ad_dirs())
            .max()
            .unwrap_or(0)
    }

    /// Attach an external source function; it is configured during
    /// [`ModelSystem::configure`].
    pub fn add_external_function(&mut self, func: Box<dyn ExternalFunction>) -> usize {
        self.externals.push(Some(func));
        self.externals.len() - 1
    }

    pub fn external_function(&self, index: usize) -> Option<&dyn ExternalFunction> {
        self.externals.get(index).and_then(|f| f.as_deref())
    }

    fn topos(&self) -> Vec<UnitTopo> {
        self.units
            .iter()
            .map(|u| UnitTopo {
                id: u.id(),
                num_dofs: u.num_dofs(),
                num_components: u.num_components(),
                has_inlet: u.has_inlet(),
                has_outlet: u.has_outlet(),
                can_accumulate: u.can_accumulate(),
            })
            .collect()
    }

    /// Recompute the DOF layout from the current unit list.
    ///
    /// Resizes the per-unit error indicator as a side effect.
    fn rebuild_layout(&mut self) {
        let topos = self.topos();
        self.layout = DofLayout::build(&topos);
        self.error_indicator = vec![0; self.units.len()];
        debug!(
            num_units = self.units.len(),
            num_dofs = self.layout.num_dofs(),
            num_coupling = self.layout.num_coupling_dofs(),
            "rebuilt DOF layout"
        );
    }

    /// Install the valve-switch schedule and allocate all workspaces.
    ///
    /// Returns `Ok(false)` if an external source function failed to configure
    /// (the instance is disabled and the system remains usable); structural
    /// problems in the switch data are hard errors.
    pub fn configure(
        &mut self,
        switches: &[RawSwitch],
        settings: &SolverSettings,
    ) -> SystemResult<bool> {
        if !settings.schur_safety.is_finite() || settings.schur_safety <= 0.0 {
            return Err(fnet_core::CoreError::InvalidArg {
                what: "schur_safety must be positive and finite",
            }
            .into());
        }

        self.rebuild_layout();

        let topos = self.topos();
        self.schedule = Some(FlowSchedule::configure(switches, &topos)?);
        self.register_flow_parameters();

        self.coupling = (0..self.units.len())
            .map(|_| CouplingPair::default())
            .collect();
        self.total_inlet_flow = vec![Ad::constant(0.0); self.units.len()];

        let num_dofs = self.layout.num_dofs();
        let ad_dirs = self.required_ad_dirs();
        self.temp_state = vec![0.0; num_dofs];
        self.ad_res = vec![Ad::with_dirs(0.0, ad_dirs); num_dofs];
        self.ad_y = vec![Ad::with_dirs(0.0, ad_dirs); num_dofs];

        self.gmres = Gmres::new(
            self.layout.num_coupling_dofs(),
            settings.max_krylov,
            settings.ortho,
            settings.max_restarts,
        );
        self.schur_safety = settings.schur_safety;

        // Configure external source functions; a failing one is disabled
        // instead of aborting the whole configuration
        let mut success = true;
        for (i, slot) in self.externals.iter_mut().enumerate() {
            if let Some(func) = slot.as_mut() {
                if !func.configure() {
                    error!(source = i, "failed to configure external source, source is ignored");
                    *slot = None;
                    success = false;
                }
            }
        }

        Ok(success)
    }

    /// Seed the AD buffers of every AD-using unit.
    pub fn prepare_ad_vectors(&mut self, dir_offset: usize) {
        let layout = &self.layout;
        let (res_slices, _) = crate::residual::split_unit_slices(layout, &mut self.ad_res);
        let (y_slices, _) = crate::residual::split_unit_slices(layout, &mut self.ad_y);
        for ((unit, res_i), y_i) in self
            .units
            .iter_mut()
            .zip(res_slices.into_iter())
            .zip(y_slices.into_iter())
        {
            if unit.uses_ad() {
                unit.prepare_ad(res_i, y_i, dir_offset);
            }
        }
    }

    /// Drive the topology state machine to the given section.
    ///
    /// Pushes per-unit flow totals, notifies every unit of the transition and
    /// rebuilds the coupling matrices iff the active switch changed (or the
    /// simulation is restarting at section 0). Between transitions the matrix
    /// sparsity structure is immutable.
    pub fn notify_topology_transition(&mut self, t: f64, section: usize) -> SystemResult<()> {
        let schedule = self.schedule.as_mut().ok_or(SystemError::NotConfigured)?;
        let switched = schedule.advance_section(section);

        let totals = schedule.active_switch().flow_totals(self.units.len());
        for (unit, (total_in, total_out)) in self.units.iter_mut().zip(totals.iter()) {
            unit.set_flow_rates(total_in, total_out);
            unit.notify_topology_transition(t, section);
        }

        if section == 0 || switched {
            self.assemble_coupling_matrices();
        }
        Ok(())
    }

    /// Rebuild the inlet- (NF) and outlet- (FN) coupling matrices from the
    /// active switch. Only called when the connections have changed.
    pub(crate) fn assemble_coupling_matrices(&mut self) {
        let Self {
            units,
            layout,
            schedule,
            coupling,
            total_inlet_flow,
            ..
        } = self;
        let Some(schedule) = schedule.as_ref() else {
            return;
        };
        let sw = schedule.active_switch();

        for pair in coupling.iter_mut() {
            pair.nf.clear();
            pair.fn_dual.clear();
        }

        // Right macro-column: each inlet component ties to its coupling DOF
        // with a -1, in exactly the order the coupling index map was built
        for (i, unit) in units.iter().enumerate() {
            if !unit.has_inlet() {
                continue;
            }
            let index = unit.inlet_dof_index();
            let stride = unit.inlet_dof_stride();
            for comp in 0..unit.num_components() {
                if let Some(col) = layout.coupling_index(i, comp) {
                    coupling[i].nf.add_element(index + comp * stride, col, -1.0);
                }
            }
        }

        // Total volumetric inflow per destination, duplicate pairs counted once
        *total_inlet_flow = sw.total_inflows(units.len());

        // Bottom macro-row: normalized flow fractions from each source outlet
        // into the destination's coupling rows
        for (row, conn) in sw.connections().iter().enumerate() {
            let rate = sw.effective_rate(row);
            let coeff = -&(rate / &total_inlet_flow[conn.dest]);

            let source = &units[conn.source];
            let index = source.outlet_dof_index();
            let stride = source.outlet_dof_stride();

            match (conn.comp_source, conn.comp_dest) {
                (None, None) => {
                    // Wildcard: connect all components with the same rate
                    for comp in 0..source.num_components() {
                        if let Some(cpl_row) = layout.coupling_index(conn.dest, comp) {
                            coupling[conn.source].fn_dual.add_element(
                                cpl_row,
                                index + comp * stride,
                                coeff.clone(),
                            );
                        }
                    }
                }
                (Some(comp_source), Some(comp_dest)) => {
                    if let Some(cpl_row) = layout.coupling_index(conn.dest, comp_dest) {
                        coupling[conn.source].fn_dual.add_element(
                            cpl_row,
                            index + comp_source * stride,
                            coeff.clone(),
                        );
                    }
                }
                // Asymmetric wildcards are rejected at configuration time
                _ => {}
            }
        }

        // Keep the numeric shadow value-identical to the dual matrices
        for pair in coupling.iter_mut() {
            pair.fn_values = pair.fn_dual.values();
        }
    }

    /// Write every unit's configured initial state into the global buffers.
    pub fn apply_initial_state(&mut self, y: &mut [f64], y_dot: &mut [f64]) {
        for (i, unit) in self.units.iter().enumerate() {
            let offset = self.layout.offset(i);
            let end = offset + self.layout.size(i);
            unit.apply_initial_state(&mut y[offset..end], &mut y_dot[offset..end]);
        }
    }

    /// Hand each unit its own slice of the solution.
    pub fn report_solution(&self, recorder: &mut dyn SolutionRecorder, solution: &[f64]) {
        for (i, unit) in self.units.iter().enumerate() {
            let offset = self.layout.offset(i);
            let end = offset + self.layout.size(i);
            unit.report_solution(recorder, &solution[offset..end]);
        }
    }
}
