//! Valve-switch schedule: connection tables, validation, topology transitions.
//!
//! A switch is one topology epoch. Its connection table has five columns per
//! row: source unit id, destination unit id, source component, destination
//! component, flow rate. A component index of -1 is a wildcard meaning "all
//! components" and is only valid on both ends at once.
//!
//! Several rows may repeat the same (source, dest) pair with different
//! component indices; the flow rate of the first such row is authoritative and
//! the pair's flow is counted once in all balances.

use fnet_core::{Ad, UnitId};
use tracing::debug;

use crate::error::{NetworkError, NetworkResult};
use crate::topo::UnitTopo;

/// Unvalidated switch data as handed over by the configuration layer.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawSwitch {
    /// Section index at which this switch becomes active.
    pub section: usize,
    /// Flat connection table, 5 values per row.
    pub connections: Vec<f64>,
}

/// A validated connection with unit ids resolved to internal indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub source: usize,
    pub dest: usize,
    /// Source component, None for the all-components wildcard.
    pub comp_source: Option<usize>,
    /// Destination component, None for the all-components wildcard.
    pub comp_dest: Option<usize>,
}

/// One topology epoch: section threshold, connections and flow rates.
#[derive(Debug, Clone)]
pub struct FlowSwitch {
    section: usize,
    connections: Vec<Connection>,
    rates: Vec<Ad>,
}

impl FlowSwitch {
    /// Section index at which this switch becomes active.
    pub fn section(&self) -> usize {
        self.section
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Stored flow rate of a row (not deduplicated).
    pub fn rate(&self, row: usize) -> &Ad {
        &self.rates[row]
    }

    /// Mutable access to a stored flow rate (parameter handle).
    pub fn rate_mut(&mut self, row: usize) -> &mut Ad {
        &mut self.rates[row]
    }

    /// Index of the first row sharing this row's (source, dest) pair.
    pub fn first_occurrence(&self, row: usize) -> usize {
        let c = self.connections[row];
        for (j, prev) in self.connections[..row].iter().enumerate() {
            if prev.source == c.source && prev.dest == c.dest {
                return j;
            }
        }
        row
    }

    /// Whether an earlier row already carries this row's (source, dest) pair.
    pub fn is_duplicate_pair(&self, row: usize) -> bool {
        self.first_occurrence(row) != row
    }

    /// The authoritative flow rate for a row (its pair's first occurrence).
    pub fn effective_rate(&self, row: usize) -> &Ad {
        &self.rates[self.first_occurrence(row)]
    }

    /// Total volumetric inflow per unit, each (source, dest) pair counted once.
    pub fn total_inflows(&self, num_units: usize) -> Vec<Ad> {
        let mut totals = vec![Ad::constant(0.0); num_units];
        for (row, c) in self.connections.iter().enumerate() {
            if self.is_duplicate_pair(row) {
                continue;
            }
            totals[c.dest] += &self.rates[row];
        }
        totals
    }

    /// Per-unit (total inflow, total outflow), each pair counted once.
    pub fn flow_totals(&self, num_units: usize) -> Vec<(Ad, Ad)> {
        let mut totals = vec![(Ad::constant(0.0), Ad::constant(0.0)); num_units];
        for (row, c) in self.connections.iter().enumerate() {
            if self.is_duplicate_pair(row) {
                continue;
            }
            totals[c.dest].0 += &self.rates[row];
            totals[c.source].1 += &self.rates[row];
        }
        totals
    }

    /// Whether a unit has no outgoing connection in this switch.
    fn is_terminal(&self, unit: usize) -> bool {
        self.connections.iter().all(|c| c.source != unit)
    }
}

/// The ordered list of switches and the active-switch state machine.
#[derive(Debug, Clone)]
pub struct FlowSchedule {
    switches: Vec<FlowSwitch>,
    active: usize,
    cycle_period: usize,
}

impl FlowSchedule {
    /// Parse and validate raw switch data against the registered units.
    ///
    /// This is a hard validation boundary: any malformed row, unresolvable
    /// unit id, component index out of range, asymmetric wildcard or unclosed
    /// flow balance rejects the whole schedule.
    pub fn configure(raw: &[RawSwitch], topos: &[UnitTopo]) -> NetworkResult<Self> {
        if raw.is_empty() {
            return Err(NetworkError::Empty);
        }

        let mut switches = Vec::with_capacity(raw.len());
        for (idx, sw) in raw.iter().enumerate() {
            if idx > 0 && sw.section <= raw[idx - 1].section {
                return Err(NetworkError::SectionOrder { switch: idx });
            }
            switches.push(check_connection_list(sw, idx, topos)?);
        }

        if switches[0].section != 0 {
            return Err(NetworkError::FirstSection {
                section: switches[0].section,
            });
        }

        // Cycle period of the schedule over sections. For a switch every
        // section this equals the switch count; sparse schedules wrap when the
        // first switch's threshold recurs after the last epoch has run its
        // span.
        let cycle_period = if switches.len() >= 2 {
            switches[1].section - switches[0].section + switches[switches.len() - 1].section
        } else {
            1
        };

        Ok(Self {
            switches,
            active: 0,
            cycle_period,
        })
    }

    pub fn num_switches(&self) -> usize {
        self.switches.len()
    }

    pub fn switch(&self, idx: usize) -> &FlowSwitch {
        &self.switches[idx]
    }

    pub fn switch_mut(&mut self, idx: usize) -> &mut FlowSwitch {
        &mut self.switches[idx]
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_switch(&self) -> &FlowSwitch {
        &self.switches[self.active]
    }

    /// Drive the state machine to the given section index.
    ///
    /// Section 0 restarts the schedule at switch 0. Otherwise the next switch
    /// activates once its section threshold is reached, and after the last
    /// switch the schedule cycles back to the first one when its threshold
    /// recurs. Returns true if the active switch changed.
    pub fn advance_section(&mut self, section: usize) -> bool {
        // Simulation is (re-)starting from the very beginning
        if section == 0 {
            self.active = 0;
        }

        let prev = self.active;
        let wrap = section % self.cycle_period;

        if self.active < self.switches.len() - 1 && self.switches[self.active + 1].section <= wrap
        {
            self.active += 1;
        } else if self.active == self.switches.len() - 1 && self.switches[0].section == wrap {
            self.active = 0;
        }

        if prev != self.active {
            debug!(
                from = prev,
                to = self.active,
                section,
                wrap,
                "switching valve configuration"
            );
        }
        prev != self.active
    }
}

/// Validate one switch's connection table and resolve unit ids to indices.
fn check_connection_list(
    raw: &RawSwitch,
    idx_switch: usize,
    topos: &[UnitTopo],
) -> NetworkResult<FlowSwitch> {
    if raw.connections.len() % 5 != 0 {
        return Err(NetworkError::TableShape {
            switch: idx_switch,
            len: raw.connections.len(),
        });
    }

    let num_rows = raw.connections.len() / 5;
    let mut connections = Vec::with_capacity(num_rows);
    let mut rates: Vec<Ad> = Vec::with_capacity(num_rows);

    let conn_err = |row: usize, what: String| NetworkError::Connection {
        switch: idx_switch,
        row,
        what,
    };

    let mut total_inflow = vec![0.0; topos.len()];
    let mut total_outflow = vec![0.0; topos.len()];

    for i in 0..num_rows {
        let vals = &raw.connections[5 * i..5 * i + 5];
        let id_source = vals[0];
        let id_dest = vals[1];
        let comp_source = vals[2] as i64;
        let comp_dest = vals[3] as i64;
        let mut rate = vals[4];

        if id_source < 0.0 {
            return Err(conn_err(i, "source unit operation id has to be at least 0".into()));
        }
        if id_dest < 0.0 {
            return Err(conn_err(
                i,
                "destination unit operation id has to be at least 0".into(),
            ));
        }

        // Resolve external ids to array indices
        let source = UnitTopo::index_of(topos, UnitId::from_index(id_source as u32))
            .ok_or_else(|| conn_err(i, format!("source unit operation id {id_source} not found")))?;
        let dest = UnitTopo::index_of(topos, UnitId::from_index(id_dest as u32)).ok_or_else(
            || conn_err(i, format!("destination unit operation id {id_dest} not found")),
        )?;

        if !topos[source].has_outlet {
            return Err(conn_err(
                i,
                format!("source unit operation {} does not have an outlet", topos[source].id),
            ));
        }
        if !topos[dest].has_inlet {
            return Err(conn_err(
                i,
                format!(
                    "destination unit operation {} does not have an inlet",
                    topos[dest].id
                ),
            ));
        }

        if comp_source >= 0 && comp_source as usize >= topos[source].num_components {
            return Err(conn_err(
                i,
                format!(
                    "source component index exceeds number of components {}",
                    topos[source].num_components
                ),
            ));
        }
        if comp_dest >= 0 && comp_dest as usize >= topos[dest].num_components {
            return Err(conn_err(
                i,
                format!(
                    "destination component index exceeds number of components {}",
                    topos[dest].num_components
                ),
            ));
        }

        if (comp_source < 0) != (comp_dest < 0) {
            return Err(conn_err(
                i,
                format!(
                    "only source or destination (not both) are set to connect all components from unit {} to {}",
                    topos[source].id, topos[dest].id
                ),
            ));
        }
        if comp_source < 0
            && comp_dest < 0
            && topos[source].num_components != topos[dest].num_components
        {
            return Err(conn_err(
                i,
                format!(
                    "number of components not equal when connecting all components from unit {} to {}",
                    topos[source].id, topos[dest].id
                ),
            ));
        }

        // A previous row with the same (source, dest) pair fixes the rate;
        // flow rates count once per pair in the balance
        match connections
            .iter()
            .position(|c: &Connection| c.source == source && c.dest == dest)
        {
            Some(j) => rate = rates[j].value(),
            None => {
                total_inflow[dest] += rate;
                total_outflow[source] += rate;
            }
        }

        connections.push(Connection {
            source,
            dest,
            comp_source: if comp_source < 0 {
                None
            } else {
                Some(comp_source as usize)
            },
            comp_dest: if comp_dest < 0 {
                None
            } else {
                Some(comp_dest as usize)
            },
        });
        rates.push(Ad::constant(rate));
    }

    let sw = FlowSwitch {
        section: raw.section,
        connections,
        rates,
    };

    // Check the flow rate balance for every non-exempt unit
    for (i, t) in topos.iter().enumerate() {
        // Units with only one port do not need to balance their flows
        if total_inflow[i] >= 0.0 && total_outflow[i] == 0.0 && t.has_inlet && !t.has_outlet {
            continue;
        }
        if total_inflow[i] == 0.0 && total_outflow[i] >= 0.0 && !t.has_inlet && t.has_outlet {
            continue;
        }

        // Terminal units do not need to balance their flows
        if total_outflow[i] >= 0.0 && sw.is_terminal(i) {
            continue;
        }

        let diff = (total_inflow[i] - total_outflow[i]).abs();
        if (diff >= 1e-15 || diff >= 1e-15 * total_outflow[i].abs()) && !t.can_accumulate {
            return Err(NetworkError::FlowBalance {
                switch: idx_switch,
                unit: i,
                imbalance: diff,
            });
        }
    }

    Ok(sw)
}
