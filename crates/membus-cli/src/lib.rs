//! Loads JSON machine descriptions into membus address spaces and reports on them.

use env_logger as _;
#[cfg(test)]
use tempfile as _;

/// Error type for loading and querying descriptions.
pub mod errors;
/// Description file format and machine construction.
pub mod machine;
/// Table dumps and address probes.
pub mod report;

pub use errors::CliError;
pub use machine::{parse_number, Machine, MachineFile};
