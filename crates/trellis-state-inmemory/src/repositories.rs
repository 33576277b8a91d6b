use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use trellis_core::{
    DefinitionRepository, EngineError, ExecutionId, ExecutionRepository, ExecutionStatus,
    UserTask, UserTaskId, UserTaskRepository, UserTaskStatus, WorkflowDefinition,
    WorkflowExecution, WorkflowId,
};

/// In-memory implementation of the DefinitionRepository
///
/// Backed by a concurrent map; suitable for development and tests, not for
/// production durability.
#[derive(Default, Clone)]
pub struct InMemoryDefinitionRepository {
    definitions: Arc<DashMap<String, WorkflowDefinition>>,
}

impl InMemoryDefinitionRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionRepository for InMemoryDefinitionRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, EngineError> {
        Ok(self.definitions.get(&id.0).map(|d| d.clone()))
    }

    async fn save(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
        debug!(workflow = %definition.id, version = %definition.version, "saving definition");
        self.definitions
            .insert(definition.id.0.clone(), definition.clone());
        Ok(())
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), EngineError> {
        self.definitions.remove(&id.0);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkflowId>, EngineError> {
        Ok(self
            .definitions
            .iter()
            .map(|entry| WorkflowId(entry.key().clone()))
            .collect())
    }
}

/// In-memory implementation of the ExecutionRepository
#[derive(Default, Clone)]
pub struct InMemoryExecutionRepository {
    executions: Arc<DashMap<String, WorkflowExecution>>,
}

impl InMemoryExecutionRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<WorkflowExecution>, EngineError> {
        Ok(self.executions.get(&id.0).map(|e| e.clone()))
    }

    async fn save(&self, execution: &WorkflowExecution) -> Result<(), EngineError> {
        self.executions
            .insert(execution.id.0.clone(), execution.clone());
        Ok(())
    }

    async fn list_for_definition(
        &self,
        definition_id: &WorkflowId,
    ) -> Result<Vec<ExecutionId>, EngineError> {
        Ok(self
            .executions
            .iter()
            .filter(|entry| entry.definition.id == *definition_id)
            .map(|entry| entry.id.clone())
            .collect())
    }

    async fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        Ok(self
            .executions
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.clone())
            .collect())
    }
}

/// In-memory implementation of the UserTaskRepository
#[derive(Default, Clone)]
pub struct InMemoryUserTaskRepository {
    tasks: Arc<DashMap<String, UserTask>>,
}

impl InMemoryUserTaskRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire every pending task whose deadline has passed
    ///
    /// Returns the ids of the tasks that were escalated. A periodic sweep
    /// over this keeps the inbox honest for executions whose engine loop is
    /// no longer waiting (for example after a host restart).
    pub fn expire_overdue(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<UserTaskId> {
        let mut expired = Vec::new();
        for mut entry in self.tasks.iter_mut() {
            if entry.status == UserTaskStatus::Pending && entry.timeout_at <= now {
                if entry.time_out().is_ok() {
                    expired.push(entry.id.clone());
                }
            }
        }
        expired
    }
}

#[async_trait]
impl UserTaskRepository for InMemoryUserTaskRepository {
    async fn find_by_id(&self, id: &UserTaskId) -> Result<Option<UserTask>, EngineError> {
        Ok(self.tasks.get(&id.0).map(|t| t.clone()))
    }

    async fn save(&self, task: &UserTask) -> Result<(), EngineError> {
        self.tasks.insert(task.id.0.clone(), task.clone());
        Ok(())
    }

    async fn list_pending(&self, tenant_id: &str) -> Result<Vec<UserTask>, EngineError> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id && entry.status == UserTaskStatus::Pending)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn list_pending_for_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<UserTask>, EngineError> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| {
                entry.execution_id == *execution_id && entry.status == UserTaskStatus::Pending
            })
            .map(|entry| entry.clone())
            .collect())
    }
}
