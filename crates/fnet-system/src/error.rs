//! Error types for system assembly and configuration.
//!
//! Structural and configuration problems fail fast through these types.
//! Numerical problems during time stepping are returned as signed step codes
//! (see `fnet_core::errcode`) so the outer integrator can adapt without
//! unwinding the call stack.

use fnet_core::{CoreError, UnitId};
use fnet_network::NetworkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Cannot add model because of already existing unit operation id {id}")]
    DuplicateUnitId { id: UnitId },

    #[error("System has not been configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

pub type SystemResult<T> = Result<T, SystemError>;
