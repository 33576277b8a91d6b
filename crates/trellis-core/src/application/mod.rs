//! Application services: the interpreter components composed by the engine

/// Activity registry and retrying invoker
pub mod activity;

/// Restricted condition-expression evaluation
pub mod condition;

/// The step router and workflow engine
pub mod engine;

/// Template interpolation against state
pub mod interpolate;

/// Parallel branch joining
pub mod parallel;

/// User-task coordination
pub mod user_task;
