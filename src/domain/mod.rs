//! Domain types for Shellpilot
//!
//! This module contains the value types shared by every layer:
//! - ConnectionDescriptor: identity + credentials for a target runtime
//! - ExecutionLog: normalized result of one command attempt
//! - ExecutionPlan: one reasoning-service proposal
//! - IterationRecord / IterationHistory: the loop's append-only memory
//! - RunOutcome: how a goal execution ended

pub mod descriptor;
pub mod execution_log;
pub mod iteration;
pub mod outcome;
pub mod plan;

pub use descriptor::{
    ConnectionDescriptor, ConnectionKind, ContainerApiTarget, ContainerTarget, DistroTarget, PodTarget,
    RemoteShellTarget, Target, TlsMaterial,
};
pub use execution_log::{EXIT_LOCAL_FAILURE, EXIT_TIMEOUT, ExecutionLog};
pub use iteration::{IterationHistory, IterationRecord};
pub use outcome::RunOutcome;
pub use plan::{ExecutionPlan, first_json_object};
