//! Flow-network description for coupled unit-operation systems.
//!
//! This crate owns the pure-data side of the network: which units exist (as
//! topology descriptors), how global degrees of freedom are laid out, and the
//! valve-switch schedule that changes the connection topology over integration
//! sections. It performs all structural validation; the numerical engine
//! consumes the validated data.

pub mod error;
pub mod layout;
pub mod switches;
pub mod topo;

pub use error::{NetworkError, NetworkResult};
pub use layout::DofLayout;
pub use switches::{Connection, FlowSchedule, FlowSwitch, RawSwitch};
pub use topo::UnitTopo;
