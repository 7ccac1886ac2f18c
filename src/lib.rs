//! Shellpilot - goal-driven command execution
//!
//! Shellpilot takes a natural-language goal ("install nginx") and a target
//! runtime (the local host, an SSH host, a container, a pod or a WSL distro),
//! then loops: ask a reasoning service for shell commands, run them through a
//! backend executor, feed the results back, and stop once an independent
//! check confirms the goal. Progress is published as a stream of tagged
//! events suitable for NDJSON transport.

pub mod agent;
pub mod domain;
pub mod error;
pub mod executor;
pub mod history;
pub mod id;
pub mod llm;
pub mod registry;
pub mod retrieval;
pub mod stream;
pub mod verification;

pub use error::{PilotError, Result};
