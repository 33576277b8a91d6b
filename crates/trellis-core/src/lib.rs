//!
//! Trellis Core - workflow execution engine for the Trellis Platform
//!
//! This crate implements the dynamic workflow interpreter: tenant-authored
//! JSON definitions (sequential steps, conditions, parallel branches, human
//! tasks, delays) executed step by step over a pluggable persistence
//! substrate. It is the foundation for the other crates in the platform.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - definitions, executions, user tasks, repositories
pub mod domain;

/// Application services - the interpreter components
pub mod application;

/// Core context types
pub mod types;

/// Error types
pub mod error;

/// Timeout-string parsing
pub mod duration;

// Re-export key types
pub use error::EngineError;
pub use types::{ActivityContext, TriggerContext};

// Domain model
pub use domain::definition::{
    ActivityStep, BranchDefinition, ConditionStep, DelayStep, EndStep, ParallelStep, RetryPolicy,
    Routing, Step, UserTaskStep, WaitPolicy, WorkflowDefinition, WorkflowId,
};
pub use domain::execution::{ExecutionId, ExecutionStatus, WorkflowExecution, WorkflowState};
pub use domain::repository::{DefinitionRepository, ExecutionRepository, UserTaskRepository};
pub use domain::user_task::{UserTask, UserTaskId, UserTaskStatus};

// Application surface
pub use application::activity::{ActivityHandler, ActivityRegistry};
pub use application::condition::{ConditionEvaluator, ExprConditionEvaluator};
pub use application::engine::{ExecutionHandle, WorkflowEngine};
pub use application::interpolate::interpolate;
pub use application::parallel::{BranchJoin, BranchOutput};
pub use application::user_task::{UserTaskCoordinator, UserTaskOutcome};
pub use duration::{parse_timeout, DEFAULT_ACTIVITY_TIMEOUT, DEFAULT_USER_TASK_TIMEOUT};
