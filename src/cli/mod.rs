//! Command-line interface module.
//!
//! Provides argument parsing, command handling and terminal rendering.

pub mod args;
pub mod commands;
pub mod report;
