//! Topology descriptors for registered unit operations.

use fnet_core::UnitId;

/// The layout- and validation-relevant projection of a unit operation.
///
/// The numerical engine registers full unit-operation objects; the network
/// layer only needs their port structure and sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitTopo {
    /// External id of the unit, unique within one system.
    pub id: UnitId,
    /// Number of local degrees of freedom.
    pub num_dofs: usize,
    /// Number of transported components.
    pub num_components: usize,
    /// Whether the unit has an inlet port.
    pub has_inlet: bool,
    /// Whether the unit has an outlet port.
    pub has_outlet: bool,
    /// Whether the unit tolerates unbalanced in/out flow (accumulation).
    pub can_accumulate: bool,
}

impl UnitTopo {
    /// Find the array index of the unit with the given external id.
    pub fn index_of(topos: &[UnitTopo], id: UnitId) -> Option<usize> {
        topos.iter().position(|t| t.id == id)
    }
}
