//! Global degree-of-freedom layout.
//!
//! The global state vector is the concatenation of all unit blocks followed by
//! one trailing coupling block. Units with an inlet get one coupling DOF per
//! component; the coupling index map assigns these contiguously in unit order,
//! then component order.

use crate::topo::UnitTopo;

/// Offsets and sizes of every unit block plus the trailing coupling block.
#[derive(Debug, Clone)]
pub struct DofLayout {
    /// Per-unit offsets with one trailing entry for the coupling block.
    offsets: Vec<usize>,
    /// Per-unit sizes with one trailing entry for the coupling block.
    sizes: Vec<usize>,
    /// First coupling DOF of each unit's inlet (None for units without inlet).
    inlet_start: Vec<Option<usize>>,
    num_coupling: usize,
}

impl DofLayout {
    /// Build the layout for the given ordered unit list.
    ///
    /// All units must already report stable DOF/component counts. Structural
    /// problems (duplicate ids) are rejected at registration, not here.
    pub fn build(topos: &[UnitTopo]) -> Self {
        let mut offsets = Vec::with_capacity(topos.len() + 1);
        let mut sizes = Vec::with_capacity(topos.len() + 1);

        let mut total = 0;
        for t in topos {
            offsets.push(total);
            sizes.push(t.num_dofs);
            total += t.num_dofs;
        }
        // Trailing entry: the coupling block starts where the unit blocks end
        offsets.push(total);

        // Units with an inlet get one coupling DOF per component, assigned
        // contiguously in unit order
        let mut inlet_start = Vec::with_capacity(topos.len());
        let mut counter = 0;
        for t in topos {
            if t.has_inlet {
                inlet_start.push(Some(counter));
                counter += t.num_components;
            } else {
                inlet_start.push(None);
            }
        }
        sizes.push(counter);

        Self {
            offsets,
            sizes,
            inlet_start,
            num_coupling: counter,
        }
    }

    /// Number of units covered by the layout.
    pub fn num_units(&self) -> usize {
        self.inlet_start.len()
    }

    /// Total number of DOFs including the coupling block.
    pub fn num_dofs(&self) -> usize {
        self.coupling_offset() + self.num_coupling
    }

    /// Number of coupling DOFs.
    pub fn num_coupling_dofs(&self) -> usize {
        self.num_coupling
    }

    /// Offset of unit `i`'s block in the global vector.
    pub fn offset(&self, i: usize) -> usize {
        self.offsets[i]
    }

    /// Size of unit `i`'s block.
    pub fn size(&self, i: usize) -> usize {
        self.sizes[i]
    }

    /// Offset of the trailing coupling block.
    pub fn coupling_offset(&self) -> usize {
        self.offsets[self.num_units()]
    }

    /// Coupling DOF index (zero-based within the coupling block) of a unit's
    /// inlet component, or None if the unit has no inlet.
    pub fn coupling_index(&self, unit: usize, component: usize) -> Option<usize> {
        self.inlet_start[unit].map(|start| start + component)
    }
}
