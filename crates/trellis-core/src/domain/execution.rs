use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::definition::WorkflowDefinition;
use crate::error::EngineError;
use crate::types::TriggerContext;

/// Value object: Workflow execution ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    /// Generate a fresh execution id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution lifecycle status
///
/// `Running` is the only non-terminal status; there are no transitions out
/// of the other four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution in progress
    Running,
    /// Execution finished successfully
    Completed,
    /// Execution failed with an error
    Failed,
    /// Execution cancelled by signal
    Cancelled,
    /// Execution stopped by an unrouted timeout
    TimedOut,
}

impl ExecutionStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}

/// The single mutable key-value map owned by one execution
///
/// Seeded with the definition's default variables and the `trigger`
/// payload; accumulates `step_<id>_result`, `step_<id>_error` and
/// `outputPath`-named entries as steps complete. The engine never detects
/// key collisions: two steps targeting the same path is a caller error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState(serde_json::Map<String, Value>);

impl WorkflowState {
    /// Seed a state map from defaults and trigger data
    pub fn seeded(defaults: &serde_json::Map<String, Value>, trigger_data: Value) -> Self {
        let mut map = defaults.clone();
        map.insert("trigger".to_string(), trigger_data);
        Self(map)
    }

    /// Get a top-level entry
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a top-level entry
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Walk a dotted path through the map
    ///
    /// Numeric segments index into arrays. Returns `None` when any segment
    /// is missing.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write a value at a dotted path, creating intermediate objects
    ///
    /// A non-object intermediate value is replaced; the last writer wins.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = match segments.pop() {
            Some(last) => last,
            None => return,
        };

        if segments.is_empty() {
            self.0.insert(last.to_string(), value);
            return;
        }

        let first = segments.remove(0);
        let mut current = self
            .0
            .entry(first.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));

        for segment in segments {
            if !current.is_object() {
                *current = Value::Object(serde_json::Map::new());
            }
            current = current
                .as_object_mut()
                .expect("just ensured object")
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
        }

        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        current
            .as_object_mut()
            .expect("just ensured object")
            .insert(last.to_string(), value);
    }

    /// Read-only snapshot as a JSON value
    pub fn snapshot(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Number of top-level entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map has no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over top-level entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Aggregate: one running or finished instance of a workflow definition
///
/// Mutated exclusively by the engine's control loop; terminal once the
/// status leaves `Running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    /// Unique identifier
    pub id: ExecutionId,

    /// Snapshot of the definition this execution started with
    pub definition: WorkflowDefinition,

    /// Owning tenant
    pub tenant_id: String,

    /// User that triggered the execution, if any
    pub user_id: Option<String>,

    /// Cursor into the definition, while running
    pub current_step_id: Option<String>,

    /// Accumulated execution state
    pub state: WorkflowState,

    /// Lifecycle status
    pub status: ExecutionStatus,

    /// Error message, when failed or timed out
    pub error: Option<String>,

    /// Final result, when completed
    pub result: Option<Value>,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// Completion timestamp, once terminal
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Create a running execution from a definition snapshot and a trigger
    pub fn new(definition: WorkflowDefinition, context: &TriggerContext) -> Self {
        let state = WorkflowState::seeded(
            &definition.default_variables,
            context.trigger_data.clone(),
        );
        let initial = definition.initial_step.clone();
        Self {
            id: ExecutionId::generate(),
            definition,
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            current_step_id: Some(initial),
            state,
            status: ExecutionStatus::Running,
            error: None,
            result: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn finish(&mut self, status: ExecutionStatus) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::ExecutionError(format!(
                "cannot transition terminal execution {} out of {}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.current_step_id = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Complete the execution with an optional result
    pub fn complete(&mut self, result: Option<Value>) -> Result<(), EngineError> {
        self.finish(ExecutionStatus::Completed)?;
        self.result = result;
        Ok(())
    }

    /// Fail the execution with an error message
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), EngineError> {
        self.finish(ExecutionStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Cancel the execution
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), EngineError> {
        self.finish(ExecutionStatus::Cancelled)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Stop the execution after an unrouted timeout
    pub fn time_out(&mut self, error: impl Into<String>) -> Result<(), EngineError> {
        self.finish(ExecutionStatus::TimedOut)?;
        self.error = Some(error.into());
        Ok(())
    }
}
