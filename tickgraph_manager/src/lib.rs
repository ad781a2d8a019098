//! tickgraph Manager Library
//!
//! Command implementations behind the `tickgraph` binary.

pub mod commands;
pub mod logging;
pub mod watchdog;
