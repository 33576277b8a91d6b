//! User-task coordination: create a task record, suspend until a completion
//! signal or a timeout, then escalate

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::domain::definition::UserTaskStep;
use crate::domain::execution::{ExecutionId, WorkflowState};
use crate::domain::repository::UserTaskRepository;
use crate::domain::user_task::{UserTask, UserTaskId, UserTaskStatus};
use crate::duration::{parse_timeout, DEFAULT_USER_TASK_TIMEOUT};
use crate::error::EngineError;

/// How a user-task wait ended
#[derive(Debug, Clone, PartialEq)]
pub enum UserTaskOutcome {
    /// A completion signal arrived with this result payload
    Completed(Value),
    /// The deadline elapsed first; carries the task id
    TimedOut(UserTaskId),
}

/// Coordinates user-task steps between the engine loop and the external
/// task-management surface
///
/// The authoritative task state lives in the repository; the in-process
/// waiter map only routes completion signals to suspended steps. Suspension
/// is a `oneshot` wait under `tokio::time::timeout`, so it never blocks the
/// runtime's event loop.
pub struct UserTaskCoordinator {
    tasks: Arc<dyn UserTaskRepository>,
    waiters: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl UserTaskCoordinator {
    /// Create a coordinator over a task repository
    pub fn new(tasks: Arc<dyn UserTaskRepository>) -> Self {
        Self {
            tasks,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying task repository
    pub fn repository(&self) -> &Arc<dyn UserTaskRepository> {
        &self.tasks
    }

    /// Run a user-task step to its outcome
    ///
    /// Creates the pending task record, then suspends the calling step until
    /// an external completion signal or the configured timeout (default one
    /// hour). On timeout the task is persisted as `timed_out`.
    pub async fn run_step(
        &self,
        execution_id: &ExecutionId,
        tenant_id: &str,
        step: &UserTaskStep,
        state: &WorkflowState,
    ) -> Result<UserTaskOutcome, EngineError> {
        let wait = match &step.timeout {
            Some(timeout) => parse_timeout(timeout)?,
            None => DEFAULT_USER_TASK_TIMEOUT,
        };

        let now = Utc::now();
        let task = UserTask {
            id: UserTaskId::generate(),
            execution_id: execution_id.clone(),
            step_id: step.id.clone(),
            tenant_id: tenant_id.to_string(),
            assignee: step.assignee.clone(),
            candidates: step.candidates.clone(),
            form: step.form.clone(),
            context_data: state.snapshot(),
            status: UserTaskStatus::Pending,
            result: None,
            created_at: now,
            timeout_at: now
                + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::hours(1)),
        };
        let task_id = task.id.clone();

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(task_id.0.clone(), tx);

        // persist after registering the waiter so a completion signal racing
        // the save still finds a receiver
        if let Err(error) = self.tasks.save(&task).await {
            self.waiters.lock().await.remove(&task_id.0);
            return Err(error);
        }

        info!(
            execution = %execution_id,
            step = %step.id,
            task = %task_id,
            assignee = ?step.assignee,
            "user task created"
        );

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(result)) => Ok(UserTaskOutcome::Completed(result)),
            Ok(Err(_)) => Err(EngineError::ExecutionError(format!(
                "user task {} waiter dropped",
                task_id
            ))),
            Err(_) => {
                self.waiters.lock().await.remove(&task_id.0);
                self.mark_timed_out(&task_id).await?;
                Ok(UserTaskOutcome::TimedOut(task_id))
            }
        }
    }

    /// Deliver an external completion signal
    ///
    /// Tolerant by contract: signals for unknown or already-finished task
    /// ids are no-ops, not errors. The repository record is updated before
    /// the suspended step is woken so the completed task is never observable
    /// as pending after the workflow moves on.
    pub async fn complete_task(&self, task_id: &UserTaskId, result: Value) -> Result<(), EngineError> {
        let mut task = match self.tasks.find_by_id(task_id).await? {
            Some(task) => task,
            None => {
                debug!(task = %task_id, "completion signal for unknown task ignored");
                return Ok(());
            }
        };

        if task.status != UserTaskStatus::Pending {
            debug!(task = %task_id, status = ?task.status, "completion signal for finished task ignored");
            return Ok(());
        }

        task.complete(result.clone())?;
        self.tasks.save(&task).await?;

        if let Some(tx) = self.waiters.lock().await.remove(&task_id.0) {
            // a dropped receiver means the step already moved on; the record
            // update above still stands
            let _ = tx.send(result);
        }

        info!(task = %task_id, "user task completed");
        Ok(())
    }

    /// Cancel every pending task belonging to an execution
    pub async fn cancel_for_execution(&self, execution_id: &ExecutionId) -> Result<(), EngineError> {
        for mut task in self.tasks.list_pending_for_execution(execution_id).await? {
            task.cancel()?;
            self.tasks.save(&task).await?;
            self.waiters.lock().await.remove(&task.id.0);
            warn!(task = %task.id, execution = %execution_id, "pending user task cancelled");
        }
        Ok(())
    }

    async fn mark_timed_out(&self, task_id: &UserTaskId) -> Result<(), EngineError> {
        if let Some(mut task) = self.tasks.find_by_id(task_id).await? {
            if task.status == UserTaskStatus::Pending {
                task.time_out()?;
                self.tasks.save(&task).await?;
                warn!(task = %task_id, "user task timed out");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definition::Routing;
    use crate::domain::repository::memory::MemoryUserTaskRepository;
    use serde_json::json;
    use std::time::Duration;

    fn step(timeout: Option<&str>) -> UserTaskStep {
        UserTaskStep {
            id: "approve".to_string(),
            assignee: Some("manager".to_string()),
            candidates: vec![],
            form: json!({"fields": []}),
            timeout: timeout.map(str::to_string),
            output_path: Some("approval".to_string()),
            routing: Routing::default(),
        }
    }

    fn coordinator() -> (Arc<UserTaskCoordinator>, Arc<MemoryUserTaskRepository>) {
        let repo = Arc::new(MemoryUserTaskRepository::new());
        (
            Arc::new(UserTaskCoordinator::new(repo.clone())),
            repo,
        )
    }

    #[tokio::test]
    async fn test_completion_signal_resolves_wait() {
        let (coordinator, repo) = coordinator();
        let execution_id = ExecutionId("exec-1".to_string());
        let state = WorkflowState::default();

        let waiting = {
            let coordinator = coordinator.clone();
            let execution_id = execution_id.clone();
            tokio::spawn(async move {
                coordinator
                    .run_step(&execution_id, "tenant-1", &step(Some("1h")), &state)
                    .await
            })
        };

        // wait for the pending record to appear, then signal
        let task = loop {
            let pending = repo.list_pending("tenant-1").await.unwrap();
            if let Some(task) = pending.into_iter().next() {
                break task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        coordinator
            .complete_task(&task.id, json!({"approved": true}))
            .await
            .unwrap();

        let outcome = waiting.await.unwrap().unwrap();
        assert_eq!(outcome, UserTaskOutcome::Completed(json!({"approved": true})));

        let stored = repo.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UserTaskStatus::Completed);
        assert_eq!(stored.result, Some(json!({"approved": true})));
    }

    #[tokio::test]
    async fn test_timeout_marks_task_timed_out() {
        let (coordinator, repo) = coordinator();
        let execution_id = ExecutionId("exec-2".to_string());
        let state = WorkflowState::default();

        // no signal arrives within the shortest expressible timeout
        let started = std::time::Instant::now();
        let outcome = coordinator
            .run_step(&execution_id, "tenant-1", &step(Some("0s")), &state)
            .await
            .unwrap();

        let task_id = match outcome {
            UserTaskOutcome::TimedOut(id) => id,
            other => panic!("expected timeout, got {:?}", other),
        };
        assert!(started.elapsed() < Duration::from_secs(5));

        let stored = repo.find_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, UserTaskStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_signal_for_unknown_task_is_noop() {
        let (coordinator, _repo) = coordinator();
        coordinator
            .complete_task(&UserTaskId("ghost".to_string()), json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_for_finished_task_is_noop() {
        let (coordinator, repo) = coordinator();
        let execution_id = ExecutionId("exec-3".to_string());
        let state = WorkflowState::default();

        let outcome = coordinator
            .run_step(&execution_id, "tenant-1", &step(Some("0s")), &state)
            .await
            .unwrap();
        let task_id = match outcome {
            UserTaskOutcome::TimedOut(id) => id,
            other => panic!("expected timeout, got {:?}", other),
        };

        // late signal: ignored, result untouched
        coordinator
            .complete_task(&task_id, json!({"approved": true}))
            .await
            .unwrap();
        let stored = repo.find_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, UserTaskStatus::TimedOut);
        assert!(stored.result.is_none());
    }

    #[tokio::test]
    async fn test_cancel_for_execution() {
        let (coordinator, repo) = coordinator();
        let execution_id = ExecutionId("exec-4".to_string());
        let state = WorkflowState::default();

        let waiting = {
            let coordinator = coordinator.clone();
            let execution_id = execution_id.clone();
            tokio::spawn(async move {
                coordinator
                    .run_step(&execution_id, "tenant-1", &step(Some("1h")), &state)
                    .await
            })
        };

        let task = loop {
            let pending = repo.list_pending("tenant-1").await.unwrap();
            if let Some(task) = pending.into_iter().next() {
                break task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        coordinator.cancel_for_execution(&execution_id).await.unwrap();
        let stored = repo.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UserTaskStatus::Cancelled);

        // the suspended step observes a dropped waiter, surfaced as an error
        let result = waiting.await.unwrap();
        assert!(result.is_err());
    }
}
