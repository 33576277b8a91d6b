use thiserror::Error;

/// Core error type for the Trellis workflow engine
///
/// The variants split into three broad families: definition errors
/// (author bugs, never retried), transient activity failures (retried per
/// the step's retry policy), and substrate errors (the persistence
/// collaborator cannot be reached).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Workflow definition not found
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(String),

    /// Workflow execution not found
    #[error("Workflow execution not found: {0}")]
    ExecutionNotFound(String),

    /// Invalid workflow definition
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// Step id does not resolve within its definition
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    /// Activity name has no registered handler
    #[error("Unknown activity: {0}")]
    UnknownActivity(String),

    /// Timeout string does not match the `<digits><s|m|h|d>` format
    #[error("Invalid timeout format: {0}")]
    InvalidTimeoutFormat(String),

    /// Condition expression failed to parse or evaluate
    #[error("Condition evaluation error: {0}")]
    ConditionEvaluationError(String),

    /// Activity handler returned an error (transient, subject to retry)
    #[error("Activity error: {0}")]
    ActivityError(String),

    /// Activity did not finish within its bounded timeout
    #[error("Activity timed out: {0}")]
    ActivityTimeout(String),

    /// User task was not completed before its deadline
    #[error("User task timed out: {0}")]
    UserTaskTimeout(String),

    /// User task not found
    #[error("User task not found: {0}")]
    UserTaskNotFound(String),

    /// Persistence collaborator failure
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Workflow execution error
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

impl EngineError {
    /// Whether a failed activity invocation may be retried.
    ///
    /// Definition bugs are excluded: re-running an unknown activity or a
    /// malformed timeout can never succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ActivityError(_)
                | EngineError::ActivityTimeout(_)
                | EngineError::StateStoreError(_)
        )
    }
}
