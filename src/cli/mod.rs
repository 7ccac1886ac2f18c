//! CLI module for shellpilot - command-line interface and subcommands.
//!
//! Provides the entry point for running goals, single commands and
//! verification checks against configured connections.

pub mod commands;

pub use commands::Cli;
