//! Agent loop module - the plan, execute, verify state machine.
//!
//! This module provides:
//! - AgentLoop for driving one goal execution
//! - Prompt rendering for the reasoning service
//! - Install-command detection used to phrase the next prompt

mod install;
mod loop_runner;
mod prompt;

pub use install::{any_install_command, is_install_command};
pub use loop_runner::{AgentConfig, AgentLoop, DEFAULT_MAX_ITERATIONS, ENV_CHECK, UNKNOWN_ENVIRONMENT};
pub use prompt::{IterationView, LogView, PLAN_TEMPLATE, PromptContext, PromptRenderer, truncate_tail};
