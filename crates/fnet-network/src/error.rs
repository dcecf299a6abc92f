//! Network-specific error types.
//!
//! All of these are configuration errors: they surface immediately, fail the
//! whole configuration step, and the caller must not proceed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection table of switch {switch} has {len} values (must be a multiple of 5)")]
    TableShape { switch: usize, len: usize },

    #[error("Switch {switch} row {row}: {what}")]
    Connection {
        switch: usize,
        row: usize,
        what: String,
    },

    #[error(
        "Switch {switch}: flow rate balance is not closed for unit {unit}, imbalanced by {imbalance:e}"
    )]
    FlowBalance {
        switch: usize,
        unit: usize,
        imbalance: f64,
    },

    #[error("Section index has to be monotonically increasing (switch {switch})")]
    SectionOrder { switch: usize },

    #[error("First switch has to start at section 0 (got {section})")]
    FirstSection { section: usize },

    #[error("Schedule has no switches")]
    Empty,
}

pub type NetworkResult<T> = Result<T, NetworkError>;
