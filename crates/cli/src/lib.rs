//! Library half of the `stepwise` binary: command implementations and
//! logging setup, kept here so integration tests can drive them directly.

pub mod commands;
pub mod logging;
