//! Repository traits for the Trellis engine
//!
//! The interpreter never holds authoritative workflow or task state only in
//! process memory; everything goes through these traits. External crates
//! implement them to provide real persistence; the `memory` module provides
//! lightweight implementations for tests.

use async_trait::async_trait;

use crate::domain::definition::{WorkflowDefinition, WorkflowId};
use crate::domain::execution::{ExecutionId, ExecutionStatus, WorkflowExecution};
use crate::domain::user_task::{UserTask, UserTaskId};
use crate::error::EngineError;

/// Repository for workflow definitions
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    /// Find a definition by ID
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, EngineError>;

    /// Save a definition
    async fn save(&self, definition: &WorkflowDefinition) -> Result<(), EngineError>;

    /// Delete a definition
    async fn delete(&self, id: &WorkflowId) -> Result<(), EngineError>;

    /// List all definition ids
    async fn list(&self) -> Result<Vec<WorkflowId>, EngineError>;
}

/// Repository for workflow executions
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Find an execution by ID
    async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<WorkflowExecution>, EngineError>;

    /// Save an execution snapshot
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), EngineError>;

    /// List executions for a definition
    async fn list_for_definition(
        &self,
        definition_id: &WorkflowId,
    ) -> Result<Vec<ExecutionId>, EngineError>;

    /// List executions with a given status
    async fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<WorkflowExecution>, EngineError>;
}

/// Repository for user tasks
#[async_trait]
pub trait UserTaskRepository: Send + Sync {
    /// Find a task by ID
    async fn find_by_id(&self, id: &UserTaskId) -> Result<Option<UserTask>, EngineError>;

    /// Save a task
    async fn save(&self, task: &UserTask) -> Result<(), EngineError>;

    /// List a tenant's pending tasks (the task-inbox surface)
    async fn list_pending(&self, tenant_id: &str) -> Result<Vec<UserTask>, EngineError>;

    /// List pending tasks belonging to one execution
    async fn list_pending_for_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<UserTask>, EngineError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use crate::domain::user_task::UserTaskStatus;
    use dashmap::DashMap;
    use std::sync::Arc;

    /// In-memory definition repository backed by a concurrent map
    #[derive(Default)]
    pub struct MemoryDefinitionRepository {
        definitions: Arc<DashMap<String, WorkflowDefinition>>,
    }

    impl MemoryDefinitionRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl DefinitionRepository for MemoryDefinitionRepository {
        async fn find_by_id(
            &self,
            id: &WorkflowId,
        ) -> Result<Option<WorkflowDefinition>, EngineError> {
            Ok(self.definitions.get(&id.0).map(|d| d.clone()))
        }

        async fn save(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
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

    /// In-memory execution repository backed by a concurrent map
    #[derive(Default)]
    pub struct MemoryExecutionRepository {
        executions: Arc<DashMap<String, WorkflowExecution>>,
    }

    impl MemoryExecutionRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ExecutionRepository for MemoryExecutionRepository {
        async fn find_by_id(
            &self,
            id: &ExecutionId,
        ) -> Result<Option<WorkflowExecution>, EngineError> {
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

    /// In-memory user-task repository backed by a concurrent map
    #[derive(Default)]
    pub struct MemoryUserTaskRepository {
        tasks: Arc<DashMap<String, UserTask>>,
    }

    impl MemoryUserTaskRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl UserTaskRepository for MemoryUserTaskRepository {
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
                .filter(|entry| {
                    entry.tenant_id == tenant_id && entry.status == UserTaskStatus::Pending
                })
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

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::definition::{ActivityStep, Routing, Step};
        use crate::types::TriggerContext;
        use serde_json::json;

        fn definition(id: &str) -> WorkflowDefinition {
            WorkflowDefinition {
                id: WorkflowId(id.to_string()),
                name: "Test".to_string(),
                version: "1".to_string(),
                initial_step: "a".to_string(),
                steps: vec![Step::Activity(ActivityStep {
                    id: "a".to_string(),
                    activity: "logError".to_string(),
                    params: json!({}),
                    timeout: None,
                    output_path: None,
                    retry_policy: None,
                    routing: Routing::default(),
                })],
                default_variables: serde_json::Map::new(),
            }
        }

        #[tokio::test]
        async fn test_definition_repository_round_trip() {
            let repo = MemoryDefinitionRepository::new();
            let def = definition("wf-1");

            repo.save(&def).await.unwrap();
            let found = repo.find_by_id(&def.id).await.unwrap().unwrap();
            assert_eq!(found.name, "Test");
            assert_eq!(repo.list().await.unwrap().len(), 1);

            repo.delete(&def.id).await.unwrap();
            assert!(repo.find_by_id(&def.id).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_execution_repository_filters() {
            let repo = MemoryExecutionRepository::new();
            let ctx = TriggerContext::new("t1", json!({}));

            let mut completed = WorkflowExecution::new(definition("wf-1"), &ctx);
            completed.complete(None).unwrap();
            let running = WorkflowExecution::new(definition("wf-1"), &ctx);

            repo.save(&completed).await.unwrap();
            repo.save(&running).await.unwrap();

            let ids = repo
                .list_for_definition(&WorkflowId("wf-1".to_string()))
                .await
                .unwrap();
            assert_eq!(ids.len(), 2);

            let running_only = repo.list_by_status(ExecutionStatus::Running).await.unwrap();
            assert_eq!(running_only.len(), 1);
            assert_eq!(running_only[0].id, running.id);
        }
    }
}
