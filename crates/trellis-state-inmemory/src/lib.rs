//!
//! In-memory persistence collaborators for the Trellis Platform
//!
//! Implements the `trellis-core` repository traits over concurrent maps.
//! This is the substrate used in development and tests; production
//! deployments provide durable implementations of the same traits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod repositories;

pub use repositories::{
    InMemoryDefinitionRepository, InMemoryExecutionRepository, InMemoryUserTaskRepository,
};
