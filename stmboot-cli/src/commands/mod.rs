//! Command implementations.
//!
//! Each top-level action is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod ports;
pub(crate) mod update;
