//! Configuration for the shellpilot binary.
//!
//! A single YAML file (~/.config/shellpilot/shellpilot.yml or .shellpilot.yml)
//! with sections for the reasoning service, engine limits, named
//! connections, history and knowledge.

pub use self::global::GlobalConfig;

mod global;

pub type Config = GlobalConfig;
