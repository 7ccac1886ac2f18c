//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: drive a goal to completion, streaming NDJSON events
//! - exec: run one command through the connection registry
//! - verify: check whether a goal is already satisfied
//! - connections: list configured connections

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shellpilot - goal-driven command execution on local and remote systems
#[derive(Parser, Debug)]
#[command(name = "shellpilot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (on stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan, execute and verify until the goal is met
    Run {
        /// Natural-language goal, e.g. "install nginx"
        goal: String,

        /// Connection name from the config file
        #[arg(short = 'C', long, default_value = "local")]
        connection: String,

        /// Override engine.max-iterations
        #[arg(short, long)]
        max_iterations: Option<u32>,
    },

    /// Run a single command and print its execution log as JSON
    Exec {
        /// Shell command to run
        command: String,

        /// Connection name from the config file
        #[arg(short = 'C', long, default_value = "local")]
        connection: String,
    },

    /// Check whether a goal is already satisfied
    Verify {
        /// Natural-language goal
        goal: String,

        /// Connection name from the config file
        #[arg(short = 'C', long, default_value = "local")]
        connection: String,
    },

    /// List configured connections
    Connections,
}
