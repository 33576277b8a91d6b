//! The workflow engine: owns execution state and the step-router loop

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::application::activity::{invoke_with_retry, ActivityRegistry};
use crate::application::condition::{ConditionEvaluator, ExprConditionEvaluator};
use crate::application::interpolate::interpolate;
use crate::application::parallel::{
    join_branches, joins_to_value, required_terminations, BranchOutput,
};
use crate::application::user_task::{UserTaskCoordinator, UserTaskOutcome};
use crate::domain::definition::{Step, WorkflowDefinition, WorkflowId};
use crate::domain::execution::{ExecutionId, WorkflowExecution, WorkflowState};
use crate::domain::repository::{DefinitionRepository, ExecutionRepository, UserTaskRepository};
use crate::domain::user_task::{UserTask, UserTaskId};
use crate::duration::parse_timeout;
use crate::error::EngineError;
use crate::types::{ActivityContext, TriggerContext};

/// Upper bound on steps per execution; condition-driven loops are legal,
/// runaway definitions are not
const MAX_STEPS_PER_EXECUTION: usize = 10_000;

/// How one step run ended, before routing
enum StepOutcome {
    /// Step succeeded; a condition step overrides the next-step decision
    Success {
        value: Option<Value>,
        next_override: Option<Option<String>>,
    },
    /// Step failed after exhausting its own recovery
    Error { message: String },
    /// Step hit its bounded timeout
    Timeout { message: String },
}

/// Identity of the execution a step runs under
#[derive(Clone)]
struct ExecMeta {
    execution_id: ExecutionId,
    tenant_id: String,
}

/// Handle to a spawned execution
pub struct ExecutionHandle {
    /// Id of the running execution
    pub execution_id: ExecutionId,
    engine: WorkflowEngine,
    task: JoinHandle<()>,
}

impl ExecutionHandle {
    /// Wait for the execution to reach a terminal status and return it
    pub async fn join(self) -> Result<WorkflowExecution, EngineError> {
        let _ = self.task.await;
        self.engine.execution(&self.execution_id).await
    }
}

/// The top-level workflow engine
///
/// Composes the interpolator, condition evaluator, activity invoker,
/// user-task coordinator and parallel runner behind a single start/signal/
/// query surface. One engine instance serves many executions; each
/// execution's state is owned by exactly one spawned control loop.
#[derive(Clone)]
pub struct WorkflowEngine {
    definitions: Arc<dyn DefinitionRepository>,
    executions: Arc<dyn ExecutionRepository>,
    user_tasks: Arc<UserTaskCoordinator>,
    activities: Arc<ActivityRegistry>,
    conditions: Arc<dyn ConditionEvaluator>,
    cancellations: Arc<DashMap<String, String>>,
}

impl WorkflowEngine {
    /// Create an engine over the persistence collaborators and a populated
    /// activity registry
    pub fn new(
        definitions: Arc<dyn DefinitionRepository>,
        executions: Arc<dyn ExecutionRepository>,
        user_tasks: Arc<dyn UserTaskRepository>,
        activities: ActivityRegistry,
    ) -> Self {
        Self {
            definitions,
            executions,
            user_tasks: Arc::new(UserTaskCoordinator::new(user_tasks)),
            activities: Arc::new(activities),
            conditions: Arc::new(ExprConditionEvaluator::new()),
            cancellations: Arc::new(DashMap::new()),
        }
    }

    /// Replace the condition evaluator
    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.conditions = evaluator;
        self
    }

    /// Start an execution from a definition snapshot
    ///
    /// The definition is validated first; a definition that fails validation
    /// never starts running. The created execution record is persisted
    /// before the control loop is spawned. If the persistence collaborator
    /// is unavailable, one attempt is made to leave a `failed` record with a
    /// descriptive message, and the error is returned; there is no retry.
    pub async fn start(
        &self,
        definition: WorkflowDefinition,
        context: TriggerContext,
    ) -> Result<ExecutionHandle, EngineError> {
        definition.validate()?;

        let mut execution = WorkflowExecution::new(definition, &context);
        if let Err(store_error) = self.executions.save(&execution).await {
            let _ = execution.fail(format!("substrate unavailable: {}", store_error));
            let _ = self.executions.save(&execution).await;
            return Err(store_error);
        }

        info!(
            execution = %execution.id,
            workflow = %execution.definition.id,
            tenant = %execution.tenant_id,
            "execution started"
        );

        let execution_id = execution.id.clone();
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.run_to_completion(execution).await });

        Ok(ExecutionHandle {
            execution_id,
            engine: self.clone(),
            task,
        })
    }

    /// Start an execution of a registered definition
    pub async fn start_registered(
        &self,
        workflow_id: &WorkflowId,
        context: TriggerContext,
    ) -> Result<ExecutionHandle, EngineError> {
        let definition = self
            .definitions
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(workflow_id.0.clone()))?;
        self.start(definition, context).await
    }

    /// Signal: complete a pending user task
    ///
    /// Unknown or already-finished task ids are tolerated as no-ops.
    pub async fn complete_user_task(
        &self,
        task_id: &UserTaskId,
        result: Value,
    ) -> Result<(), EngineError> {
        self.user_tasks.complete_task(task_id, result).await
    }

    /// Signal: request cancellation of a running execution
    ///
    /// The flag is observed between steps; an in-flight activity runs to its
    /// own completion or timeout and its side effects are not rolled back.
    pub async fn cancel(
        &self,
        execution_id: &ExecutionId,
        reason: impl Into<String>,
    ) -> Result<(), EngineError> {
        let execution = self
            .executions
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.0.clone()))?;
        if execution.status.is_terminal() {
            return Ok(());
        }
        self.cancellations
            .insert(execution_id.0.clone(), reason.into());
        Ok(())
    }

    /// Query: read-only snapshot of an execution's state map
    pub async fn workflow_state(&self, execution_id: &ExecutionId) -> Result<Value, EngineError> {
        Ok(self.execution(execution_id).await?.state.snapshot())
    }

    /// Query: fetch an execution record
    pub async fn execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<WorkflowExecution, EngineError> {
        self.executions
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.0.clone()))
    }

    /// Query: a tenant's pending user tasks
    pub async fn pending_tasks(&self, tenant_id: &str) -> Result<Vec<UserTask>, EngineError> {
        self.user_tasks.repository().list_pending(tenant_id).await
    }

    // ── Control loop ─────────────────────────────────────────────────

    async fn run_to_completion(&self, mut execution: WorkflowExecution) {
        let execution_id = execution.id.clone();

        if let Err(engine_error) = self.drive(&mut execution).await {
            if !execution.status.is_terminal() {
                let _ = execution.fail(engine_error.to_string());
            }
            error!(execution = %execution_id, error = %engine_error, "execution failed");
        }

        self.cancellations.remove(&execution_id.0);
        if let Err(store_error) = self.executions.save(&execution).await {
            error!(
                execution = %execution_id,
                error = %store_error,
                "failed to persist terminal execution state"
            );
        } else {
            info!(
                execution = %execution_id,
                status = %execution.status,
                "execution finished"
            );
        }
    }

    /// The step-router loop: execute, record, route, repeat
    async fn drive(&self, execution: &mut WorkflowExecution) -> Result<(), EngineError> {
        let definition = execution.definition.clone();
        let meta = ExecMeta {
            execution_id: execution.id.clone(),
            tenant_id: execution.tenant_id.clone(),
        };

        let mut current = execution.current_step_id.clone();
        let mut last_value: Option<Value> = None;
        let mut executed = 0usize;

        while let Some(step_id) = current {
            // cancellation is observed between steps, never preemptively
            if let Some(reason) = self.cancellations.get(&execution.id.0).map(|r| r.value().clone()) {
                info!(execution = %execution.id, %reason, "cancellation observed");
                self.user_tasks.cancel_for_execution(&execution.id).await?;
                execution.cancel(reason)?;
                return Ok(());
            }

            executed += 1;
            if executed > MAX_STEPS_PER_EXECUTION {
                execution.fail(format!(
                    "step limit of {} exceeded",
                    MAX_STEPS_PER_EXECUTION
                ))?;
                return Ok(());
            }

            let position = definition.steps.iter().position(|s| s.id() == step_id);
            let step = match position.map(|p| &definition.steps[p]) {
                Some(step) => step,
                None => {
                    execution.fail(EngineError::UnknownStep(step_id).to_string())?;
                    return Ok(());
                }
            };

            // checkpoint the cursor before the step's suspension points
            execution.current_step_id = Some(step_id.clone());
            self.executions.save(execution).await?;

            if let Step::End(end) = step {
                let result = end
                    .result
                    .as_ref()
                    .map(|template| interpolate(template, &execution.state))
                    .or(last_value);
                execution.complete(result)?;
                return Ok(());
            }

            let sequential_next = position
                .and_then(|p| definition.steps.get(p + 1))
                .map(|s| s.id().to_string());

            let mut writes = Vec::new();
            let outcome = self
                .execute_step(&meta, step, &mut execution.state, &mut writes)
                .await?;

            let routing = step.routing().cloned().unwrap_or_default();
            current = match outcome {
                StepOutcome::Success {
                    value,
                    next_override,
                } => {
                    if value.is_some() {
                        last_value = value;
                    }
                    match next_override {
                        Some(target) => target,
                        None => routing.on_success.or(sequential_next),
                    }
                }
                StepOutcome::Error { message } => match routing.on_error {
                    Some(next) => Some(next),
                    None => {
                        execution.fail(message)?;
                        return Ok(());
                    }
                },
                StepOutcome::Timeout { message } => {
                    match routing.on_timeout.or(routing.on_error) {
                        Some(next) => Some(next),
                        None => {
                            execution.time_out(message)?;
                            return Ok(());
                        }
                    }
                }
            };

            self.executions.save(execution).await?;
        }

        // ran off the end of a success path
        execution.complete(last_value)?;
        Ok(())
    }

    /// Execute one step against a state map and record its result
    ///
    /// Shared between the top-level loop and branch sequences; `writes`
    /// collects `outputPath` writes so branches can merge them at the join
    /// point.
    async fn execute_step(
        &self,
        meta: &ExecMeta,
        step: &Step,
        state: &mut WorkflowState,
        writes: &mut Vec<(String, Value)>,
    ) -> Result<StepOutcome, EngineError> {
        debug!(execution = %meta.execution_id, step = %step.id(), "executing step");

        match step {
            Step::Activity(activity) => {
                let params = interpolate(&activity.params, state);
                let ctx = ActivityContext {
                    execution_id: meta.execution_id.clone(),
                    tenant_id: meta.tenant_id.clone(),
                    step_id: activity.id.clone(),
                    attempt: 1,
                };
                match invoke_with_retry(
                    &self.activities,
                    &ctx,
                    &activity.activity,
                    &params,
                    activity.timeout.as_deref(),
                    activity.retry_policy.as_ref(),
                )
                .await
                {
                    Ok(value) => {
                        record_success(state, writes, step, &value);
                        Ok(StepOutcome::Success {
                            value: Some(value),
                            next_override: None,
                        })
                    }
                    Err(EngineError::ActivityTimeout(message)) => {
                        record_error(state, step, &message);
                        Ok(StepOutcome::Timeout { message })
                    }
                    Err(engine_error) => {
                        let message = engine_error.to_string();
                        record_error(state, step, &message);
                        Ok(StepOutcome::Error { message })
                    }
                }
            }

            Step::Condition(condition) => {
                match self.conditions.evaluate(&condition.expression, state) {
                    Ok(verdict) => {
                        let value = Value::Bool(verdict);
                        record_success(state, writes, step, &value);
                        let target = if verdict {
                            condition.on_true.clone()
                        } else {
                            condition.on_false.clone()
                        };
                        Ok(StepOutcome::Success {
                            value: Some(value),
                            next_override: Some(target),
                        })
                    }
                    Err(engine_error) => {
                        let message = engine_error.to_string();
                        record_error(state, step, &message);
                        Ok(StepOutcome::Error { message })
                    }
                }
            }

            Step::UserTask(user_task) => {
                match self
                    .user_tasks
                    .run_step(&meta.execution_id, &meta.tenant_id, user_task, state)
                    .await?
                {
                    UserTaskOutcome::Completed(result) => {
                        record_success(state, writes, step, &result);
                        Ok(StepOutcome::Success {
                            value: Some(result),
                            next_override: None,
                        })
                    }
                    UserTaskOutcome::TimedOut(task_id) => {
                        let message =
                            EngineError::UserTaskTimeout(task_id.0.clone()).to_string();
                        record_error(state, step, &message);
                        Ok(StepOutcome::Timeout { message })
                    }
                }
            }

            Step::Parallel(parallel) => {
                let required =
                    required_terminations(&parallel.wait_for, parallel.branches.len());

                let mut tasks = Vec::with_capacity(parallel.branches.len());
                for (index, branch) in parallel.branches.iter().enumerate() {
                    let engine = self.clone();
                    let branch_meta = meta.clone();
                    let steps = branch.steps.clone();
                    // copy-on-fork: each branch owns its own state
                    let mut branch_state = state.clone();
                    tasks.push((
                        index,
                        tokio::spawn(async move {
                            let mut branch_writes = Vec::new();
                            match engine
                                .run_sequence(
                                    &branch_meta,
                                    &steps,
                                    &mut branch_state,
                                    &mut branch_writes,
                                )
                                .await
                            {
                                Ok(value) => Ok(BranchOutput {
                                    value,
                                    writes: branch_writes,
                                }),
                                Err(engine_error) => Err(engine_error.to_string()),
                            }
                        }),
                    ));
                }

                let joins = join_branches(tasks, required).await;
                let satisfied = joins.len() >= required;
                let value = joins_to_value(&joins);

                if satisfied {
                    // merge-on-join: only waited branches reach parent state
                    for join in &joins {
                        if let Ok(output) = &join.outcome {
                            for (path, branch_value) in &output.writes {
                                state.set_path(path, branch_value.clone());
                                writes.push((path.clone(), branch_value.clone()));
                            }
                        }
                    }
                    record_success(state, writes, step, &value);
                    Ok(StepOutcome::Success {
                        value: Some(value),
                        next_override: None,
                    })
                } else {
                    let message = format!(
                        "parallel step '{}' satisfied {} of {} required terminations",
                        parallel.id,
                        joins.len(),
                        required
                    );
                    record_error(state, step, &message);
                    Ok(StepOutcome::Error { message })
                }
            }

            Step::Delay(delay) => {
                let duration = parse_timeout(&delay.duration)?;
                debug!(execution = %meta.execution_id, step = %delay.id, ?duration, "delay");
                tokio::time::sleep(duration).await;
                Ok(StepOutcome::Success {
                    value: None,
                    next_override: None,
                })
            }

            Step::End(_) => {
                // handled by the callers before dispatch
                Ok(StepOutcome::Success {
                    value: None,
                    next_override: Some(None),
                })
            }
        }
    }

    /// Run a branch's step sequence against its own state copy
    ///
    /// Same routing rules as the top loop, scoped to the branch: explicit
    /// edges first, then definition order. The branch terminates at an end
    /// step or when a success path runs out of steps; an unhandled error
    /// fails only this branch.
    fn run_sequence<'a>(
        &'a self,
        meta: &'a ExecMeta,
        steps: &'a [Step],
        state: &'a mut WorkflowState,
        writes: &'a mut Vec<(String, Value)>,
    ) -> BoxFuture<'a, Result<Option<Value>, EngineError>> {
        Box::pin(async move {
            let mut current = steps.first().map(|s| s.id().to_string());
            let mut last_value: Option<Value> = None;
            let mut executed = 0usize;

            while let Some(step_id) = current {
                executed += 1;
                if executed > MAX_STEPS_PER_EXECUTION {
                    return Err(EngineError::ExecutionError(format!(
                        "branch step limit of {} exceeded",
                        MAX_STEPS_PER_EXECUTION
                    )));
                }

                let position = steps.iter().position(|s| s.id() == step_id);
                let step = match position.map(|p| &steps[p]) {
                    Some(step) => step,
                    None => return Err(EngineError::UnknownStep(step_id)),
                };

                if let Step::End(end) = step {
                    return Ok(end
                        .result
                        .as_ref()
                        .map(|template| interpolate(template, state))
                        .or(last_value));
                }

                let sequential_next = position
                    .and_then(|p| steps.get(p + 1))
                    .map(|s| s.id().to_string());

                let outcome = self.execute_step(meta, step, state, writes).await?;
                let routing = step.routing().cloned().unwrap_or_default();

                current = match outcome {
                    StepOutcome::Success {
                        value,
                        next_override,
                    } => {
                        if value.is_some() {
                            last_value = value;
                        }
                        match next_override {
                            Some(target) => target,
                            None => routing.on_success.or(sequential_next),
                        }
                    }
                    StepOutcome::Error { message } => match routing.on_error {
                        Some(next) => Some(next),
                        None => return Err(EngineError::ExecutionError(message)),
                    },
                    StepOutcome::Timeout { message } => {
                        match routing.on_timeout.or(routing.on_error) {
                            Some(next) => Some(next),
                            None => return Err(EngineError::ExecutionError(message)),
                        }
                    }
                };
            }

            Ok(last_value)
        })
    }
}

/// Record a successful step's value into state
fn record_success(
    state: &mut WorkflowState,
    writes: &mut Vec<(String, Value)>,
    step: &Step,
    value: &Value,
) {
    state.set(format!("step_{}_result", step.id()), value.clone());
    if let Some(path) = step.output_path() {
        state.set_path(path, value.clone());
        writes.push((path.to_string(), value.clone()));
    }
}

/// Record a failed step's error message into state
fn record_error(state: &mut WorkflowState, step: &Step, message: &str) {
    state.set(format!("step_{}_error", step.id()), json!(message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::activity::ActivityHandler;
    use crate::domain::definition::{ActivityStep, EndStep, Routing};
    use crate::domain::repository::memory::{
        MemoryDefinitionRepository, MemoryExecutionRepository, MemoryUserTaskRepository,
    };
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ActivityHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(
            &self,
            _ctx: &ActivityContext,
            params: Value,
        ) -> Result<Value, EngineError> {
            Ok(params)
        }
    }

    fn engine() -> WorkflowEngine {
        let mut registry = ActivityRegistry::new();
        registry.register(Arc::new(Echo));
        WorkflowEngine::new(
            Arc::new(MemoryDefinitionRepository::new()),
            Arc::new(MemoryExecutionRepository::new()),
            Arc::new(MemoryUserTaskRepository::new()),
            registry,
        )
    }

    fn echo_step(id: &str, params: Value) -> Step {
        Step::Activity(ActivityStep {
            id: id.to_string(),
            activity: "echo".to_string(),
            params,
            timeout: None,
            output_path: None,
            retry_policy: None,
            routing: Routing::default(),
        })
    }

    fn definition(steps: Vec<Step>, initial: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId("wf".to_string()),
            name: "Test".to_string(),
            version: "1".to_string(),
            initial_step: initial.to_string(),
            steps,
            default_variables: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_invalid_definition_never_starts() {
        let engine = engine();
        let definition = definition(vec![], "a");
        let result = engine
            .start(definition, TriggerContext::new("t1", json!({})))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidDefinition(_))));
    }

    #[tokio::test]
    async fn test_unknown_definition_id() {
        let engine = engine();
        let result = engine
            .start_registered(
                &WorkflowId("ghost".to_string()),
                TriggerContext::new("t1", json!({})),
            )
            .await;
        assert!(matches!(result, Err(EngineError::DefinitionNotFound(_))));
    }

    #[tokio::test]
    async fn test_end_step_result_template() {
        let engine = engine();
        let steps = vec![
            echo_step("collect", json!({"amount": "{{trigger.amount}}"})),
            Step::End(EndStep {
                id: "done".to_string(),
                result: Some(json!({"final": "{{step_collect_result.amount}}"})),
            }),
        ];
        let handle = engine
            .start(
                definition(steps, "collect"),
                TriggerContext::new("t1", json!({"amount": 9})),
            )
            .await
            .unwrap();
        let finished = handle.join().await.unwrap();

        assert_eq!(finished.status, crate::domain::execution::ExecutionStatus::Completed);
        assert_eq!(finished.result, Some(json!({"final": 9})));
    }

    #[tokio::test]
    async fn test_cancel_unknown_execution_errors() {
        let engine = engine();
        let result = engine
            .cancel(&ExecutionId("ghost".to_string()), "because")
            .await;
        assert!(matches!(result, Err(EngineError::ExecutionNotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_terminal_execution_is_noop() {
        let engine = engine();
        let handle = engine
            .start(
                definition(vec![echo_step("only", json!({}))], "only"),
                TriggerContext::new("t1", json!({})),
            )
            .await
            .unwrap();
        let execution_id = handle.execution_id.clone();
        handle.join().await.unwrap();

        engine.cancel(&execution_id, "too late").await.unwrap();
        let execution = engine.execution(&execution_id).await.unwrap();
        assert_eq!(
            execution.status,
            crate::domain::execution::ExecutionStatus::Completed
        );
    }
}
