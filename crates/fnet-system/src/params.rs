//! Parameter identifiers and the system-level parameter registry.
//!
//! Network-level parameters (connection flow rates) live in the system's own
//! registry as dual-valued handles; unit-owned parameters are only forwarded
//! through to the owning unit.

use std::collections::{HashMap, HashSet};

use fnet_core::UnitId;

use crate::system::ModelSystem;

/// Structured identifier of a tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    /// Flow rate of the connection `source -> dest` in a given valve switch.
    FlowRate {
        source: UnitId,
        dest: UnitId,
        switch: usize,
    },
    /// A parameter owned by a unit operation, identified by a name tag and an
    /// optional component index.
    Unit {
        unit: UnitId,
        name: u64,
        component: Option<u32>,
    },
}

/// Location of a flow-rate handle inside the schedule (first-occurrence row).
#[derive(Debug, Clone, Copy)]
pub(crate) struct RateHandle {
    pub switch: usize,
    pub row: usize,
}

pub(crate) type FlowParamMap = HashMap<ParamId, RateHandle>;
pub(crate) type SensParamSet = HashSet<ParamId>;

impl ModelSystem {
    /// Set a parameter value. Returns true if any owner accepted it.
    pub fn set_parameter(&mut self, id: &ParamId, value: f64) -> bool {
        let mut found = false;
        if let Some(&handle) = self.flow_params.get(id) {
            if let Some(schedule) = self.schedule.as_mut() {
                schedule
                    .switch_mut(handle.switch)
                    .rate_mut(handle.row)
                    .set_value(value);
                found = true;
            }
        }

        for unit in self.units.iter_mut() {
            if let ParamId::Unit { unit: owner, .. } = id {
                if *owner == unit.id() {
                    found = unit.set_parameter(id, value) || found;
                }
            }
        }
        found
    }

    /// Whether any owner knows this parameter.
    pub fn has_parameter(&self, id: &ParamId) -> bool {
        if self.flow_params.contains_key(id) {
            return true;
        }
        self.units.iter().any(|unit| unit.has_parameter(id))
    }

    /// All parameters (system-level and unit-owned) and their current values.
    pub fn parameter_values(&self) -> Vec<(ParamId, f64)> {
        let mut values = Vec::new();
        if let Some(schedule) = self.schedule.as_ref() {
            for (&id, &handle) in self.flow_params.iter() {
                values.push((id, schedule.switch(handle.switch).rate(handle.row).value()));
            }
        }
        for unit in self.units.iter() {
            values.extend(unit.parameter_values());
        }
        values
    }

    /// Register a parameter as sensitive, seeding AD direction `dir`.
    ///
    /// Returns true if any owner accepted the registration. A flow-rate
    /// registration must happen before the coupling matrices are (re)built so
    /// the seeded direction propagates into the matrix entries.
    pub fn set_sensitive_parameter(&mut self, id: &ParamId, dir: usize, seed: f64) -> bool {
        let mut found = false;
        if let Some(&handle) = self.flow_params.get(id) {
            if let Some(schedule) = self.schedule.as_mut() {
                schedule
                    .switch_mut(handle.switch)
                    .rate_mut(handle.row)
                    .set_deriv(dir, seed);
                self.sens_params.insert(*id);
                found = true;
            }
        }

        for unit in self.units.iter_mut() {
            if let ParamId::Unit { unit: owner, .. } = id {
                if *owner == unit.id() {
                    found = unit.set_sensitive_parameter(id, dir, seed) || found;
                }
            }
        }
        found
    }

    /// Change the value of an already-sensitive parameter without touching
    /// its AD direction.
    pub fn set_sensitive_parameter_value(&mut self, id: &ParamId, value: f64) {
        if self.sens_params.contains(id) {
            if let Some(&handle) = self.flow_params.get(id) {
                if let Some(schedule) = self.schedule.as_mut() {
                    schedule
                        .switch_mut(handle.switch)
                        .rate_mut(handle.row)
                        .set_value(value);
                }
            }
        }

        for unit in self.units.iter_mut() {
            if let ParamId::Unit { unit: owner, .. } = id {
                if *owner == unit.id() {
                    unit.set_sensitive_parameter_value(id, value);
                }
            }
        }
    }

    /// Remove all AD directions from registered sensitive parameters.
    pub fn clear_sens_params(&mut self) {
        let sens: Vec<ParamId> = self.sens_params.drain().collect();
        for id in sens {
            if let Some(&handle) = self.flow_params.get(&id) {
                if let Some(schedule) = self.schedule.as_mut() {
                    schedule
                        .switch_mut(handle.switch)
                        .rate_mut(handle.row)
                        .clear_derivs();
                }
            }
        }

        for unit in self.units.iter_mut() {
            unit.clear_sens_params();
        }
    }

    /// Register the flow rates of every switch as addressable parameters
    /// (first occurrence per (source, dest) pair).
    pub(crate) fn register_flow_parameters(&mut self) {
        self.flow_params.clear();
        self.sens_params.clear();

        let Some(schedule) = self.schedule.as_ref() else {
            return;
        };
        for switch in 0..schedule.num_switches() {
            let sw = schedule.switch(switch);
            for (row, conn) in sw.connections().iter().enumerate() {
                if sw.is_duplicate_pair(row) {
                    continue;
                }
                let id = ParamId::FlowRate {
                    source: self.units[conn.source].id(),
                    dest: self.units[conn.dest].id(),
                    switch,
                };
                self.flow_params.insert(id, RateHandle { switch, row });
            }
        }
    }
}
