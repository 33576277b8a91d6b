use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::duration::parse_timeout;
use crate::error::EngineError;

/// Value object: Workflow definition ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable, versioned description of a business process
///
/// Definitions are tenant-authored JSON. A definition is never mutated after
/// an execution starts; each execution snapshots the definition it began
/// with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// ID of the workflow
    pub id: WorkflowId,

    /// Human-readable name
    pub name: String,

    /// Definition version
    pub version: String,

    /// First step to execute
    pub initial_step: String,

    /// The steps in this workflow
    pub steps: Vec<Step>,

    /// Variables seeded into state before the trigger data
    #[serde(default)]
    pub default_variables: serde_json::Map<String, Value>,
}

/// Routing edges shared by every step variant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    /// Next step when the step succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,

    /// Next step when the step fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,

    /// Next step when the step times out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<String>,
}

/// Retry policy for activity and user-task steps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of invocation attempts
    pub max_attempts: u32,

    /// Backoff before the second attempt, as a timeout string
    pub initial_interval: String,

    /// Multiplier applied to the interval after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: "1s".to_string(),
            backoff_multiplier: 2.0,
        }
    }
}

/// Join policy for a parallel step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitPolicy {
    /// Wait for every branch to reach a terminal step
    All,
    /// Return as soon as one branch terminates
    Any,
    /// Return once the given number of branches have terminated
    Count(usize),
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::All
    }
}

/// One independent step sequence inside a parallel step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDefinition {
    /// Optional branch label, for logs and results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The branch's own step sequence
    pub steps: Vec<Step>,
}

/// Activity step: dispatch a named side-effecting operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStep {
    /// Step ID, unique within its sequence
    pub id: String,

    /// Registered activity name
    pub activity: String,

    /// Parameter template, interpolated against state before dispatch
    #[serde(default)]
    pub params: Value,

    /// Bound on a single invocation, as a timeout string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Where to write the activity result into state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    /// Retry policy consulted on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    /// Routing edges
    #[serde(flatten)]
    pub routing: Routing,
}

/// Condition step: boolean branch over interpolated state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionStep {
    /// Step ID, unique within its sequence
    pub id: String,

    /// Boolean-valued expression template
    pub expression: String,

    /// Next step when the expression is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_true: Option<String>,

    /// Next step when the expression is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_false: Option<String>,

    /// Routing edges; only `on_error` is meaningful here
    #[serde(flatten)]
    pub routing: Routing,
}

/// User-task step: suspend until a human completes a task record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTaskStep {
    /// Step ID, unique within its sequence
    pub id: String,

    /// Direct assignee
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// Candidate users or groups when there is no direct assignee
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,

    /// Form definition shown to the assignee
    #[serde(default)]
    pub form: Value,

    /// How long to wait before escalation, as a timeout string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Where to write the task result into state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    /// Routing edges
    #[serde(flatten)]
    pub routing: Routing,
}

/// Parallel step: run independent branches and join them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelStep {
    /// Step ID, unique within its sequence
    pub id: String,

    /// Branch definitions
    pub branches: Vec<BranchDefinition>,

    /// Join policy
    #[serde(default)]
    pub wait_for: WaitPolicy,

    /// Where to write the ordered branch results into state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    /// Routing edges
    #[serde(flatten)]
    pub routing: Routing,
}

/// Delay step: fixed cooperative sleep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayStep {
    /// Step ID, unique within its sequence
    pub id: String,

    /// How long to sleep, as a timeout string
    pub duration: String,

    /// Routing edges
    #[serde(flatten)]
    pub routing: Routing,
}

/// End step: terminate the execution successfully
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndStep {
    /// Step ID, unique within its sequence
    pub id: String,

    /// Result template, interpolated against the final state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// A single unit of work in a workflow definition
///
/// A closed tagged union: adding a step kind is a compile-time-checked
/// change, not a runtime string switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    /// Dispatch a named activity
    Activity(ActivityStep),
    /// Branch on a boolean expression
    Condition(ConditionStep),
    /// Wait for human input
    UserTask(UserTaskStep),
    /// Fan out into branches
    Parallel(ParallelStep),
    /// Sleep for a fixed duration
    Delay(DelayStep),
    /// Terminate the execution
    End(EndStep),
}

impl Step {
    /// Step ID
    pub fn id(&self) -> &str {
        match self {
            Step::Activity(s) => &s.id,
            Step::Condition(s) => &s.id,
            Step::UserTask(s) => &s.id,
            Step::Parallel(s) => &s.id,
            Step::Delay(s) => &s.id,
            Step::End(s) => &s.id,
        }
    }

    /// Routing edges, if the variant carries them
    pub fn routing(&self) -> Option<&Routing> {
        match self {
            Step::Activity(s) => Some(&s.routing),
            Step::Condition(s) => Some(&s.routing),
            Step::UserTask(s) => Some(&s.routing),
            Step::Parallel(s) => Some(&s.routing),
            Step::Delay(s) => Some(&s.routing),
            Step::End(_) => None,
        }
    }

    /// Where the step writes its result into state, if configured
    pub fn output_path(&self) -> Option<&str> {
        match self {
            Step::Activity(s) => s.output_path.as_deref(),
            Step::UserTask(s) => s.output_path.as_deref(),
            Step::Parallel(s) => s.output_path.as_deref(),
            _ => None,
        }
    }
}

impl WorkflowDefinition {
    /// Validate the definition before any execution references it
    ///
    /// Checks: at least one step, unique step ids per sequence, a resolvable
    /// initial step, all explicit route targets resolvable in their own
    /// sequence, well-formed timeout and retry-interval strings, and a
    /// satisfiable wait policy on every parallel step.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.steps.is_empty() {
            return Err(EngineError::InvalidDefinition(
                "workflow must have at least one step".to_string(),
            ));
        }

        let ids = Self::validate_sequence(&self.steps)?;

        if !ids.contains(self.initial_step.as_str()) {
            return Err(EngineError::InvalidDefinition(format!(
                "initial step '{}' does not exist",
                self.initial_step
            )));
        }

        Ok(())
    }

    /// Validate one step sequence and return its id set
    fn validate_sequence(steps: &[Step]) -> Result<HashSet<&str>, EngineError> {
        let mut ids: HashSet<&str> = HashSet::with_capacity(steps.len());
        for step in steps {
            if !ids.insert(step.id()) {
                return Err(EngineError::InvalidDefinition(format!(
                    "duplicate step id: {}",
                    step.id()
                )));
            }
        }

        for step in steps {
            if let Some(routing) = step.routing() {
                for (edge, target) in [
                    ("onSuccess", &routing.on_success),
                    ("onError", &routing.on_error),
                    ("onTimeout", &routing.on_timeout),
                ] {
                    if let Some(target) = target {
                        if !ids.contains(target.as_str()) {
                            return Err(EngineError::InvalidDefinition(format!(
                                "step '{}' routes {} to unknown step '{}'",
                                step.id(),
                                edge,
                                target
                            )));
                        }
                    }
                }
            }

            match step {
                Step::Activity(s) => {
                    if let Some(timeout) = &s.timeout {
                        parse_timeout(timeout)?;
                    }
                    if let Some(policy) = &s.retry_policy {
                        Self::validate_retry_policy(&s.id, policy)?;
                    }
                }
                Step::Condition(s) => {
                    for (edge, target) in [("onTrue", &s.on_true), ("onFalse", &s.on_false)] {
                        if let Some(target) = target {
                            if !ids.contains(target.as_str()) {
                                return Err(EngineError::InvalidDefinition(format!(
                                    "step '{}' routes {} to unknown step '{}'",
                                    s.id, edge, target
                                )));
                            }
                        }
                    }
                }
                Step::UserTask(s) => {
                    if let Some(timeout) = &s.timeout {
                        parse_timeout(timeout)?;
                    }
                }
                Step::Parallel(s) => {
                    if s.branches.is_empty() {
                        return Err(EngineError::InvalidDefinition(format!(
                            "parallel step '{}' has no branches",
                            s.id
                        )));
                    }
                    if let WaitPolicy::Count(n) = s.wait_for {
                        if n == 0 || n > s.branches.len() {
                            return Err(EngineError::InvalidDefinition(format!(
                                "parallel step '{}' waits for {} of {} branches",
                                s.id,
                                n,
                                s.branches.len()
                            )));
                        }
                    }
                    for branch in &s.branches {
                        Self::validate_sequence(&branch.steps)?;
                    }
                }
                Step::Delay(s) => {
                    parse_timeout(&s.duration)?;
                }
                Step::End(_) => {}
            }
        }

        Ok(ids)
    }

    fn validate_retry_policy(step_id: &str, policy: &RetryPolicy) -> Result<(), EngineError> {
        if policy.max_attempts == 0 {
            return Err(EngineError::InvalidDefinition(format!(
                "step '{}' retry policy allows zero attempts",
                step_id
            )));
        }
        if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 1.0 {
            return Err(EngineError::InvalidDefinition(format!(
                "step '{}' retry policy has invalid backoff multiplier",
                step_id
            )));
        }
        parse_timeout(&policy.initial_interval)?;
        Ok(())
    }

    /// Find a top-level step by id
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity(id: &str) -> Step {
        Step::Activity(ActivityStep {
            id: id.to_string(),
            activity: "createRecord".to_string(),
            params: json!({}),
            timeout: None,
            output_path: None,
            retry_policy: None,
            routing: Routing::default(),
        })
    }

    fn definition(steps: Vec<Step>, initial: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId("wf-1".to_string()),
            name: "Test".to_string(),
            version: "1".to_string(),
            initial_step: initial.to_string(),
            steps,
            default_variables: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_step_deserializes_from_tagged_json() {
        let step: Step = serde_json::from_value(json!({
            "type": "activity",
            "id": "notify",
            "activity": "sendEmail",
            "params": {"to": "{{trigger.email}}"},
            "outputPath": "email_result",
            "retryPolicy": {"maxAttempts": 3, "initialInterval": "1s", "backoffMultiplier": 2.0},
            "onError": "log-failure"
        }))
        .unwrap();

        match step {
            Step::Activity(s) => {
                assert_eq!(s.id, "notify");
                assert_eq!(s.activity, "sendEmail");
                assert_eq!(s.output_path.as_deref(), Some("email_result"));
                assert_eq!(s.routing.on_error.as_deref(), Some("log-failure"));
                assert_eq!(s.retry_policy.unwrap().max_attempts, 3);
            }
            other => panic!("expected activity step, got {:?}", other),
        }
    }

    #[test]
    fn test_wait_policy_serde_shapes() {
        assert_eq!(
            serde_json::from_value::<WaitPolicy>(json!("all")).unwrap(),
            WaitPolicy::All
        );
        assert_eq!(
            serde_json::from_value::<WaitPolicy>(json!("any")).unwrap(),
            WaitPolicy::Any
        );
        assert_eq!(
            serde_json::from_value::<WaitPolicy>(json!({"count": 2})).unwrap(),
            WaitPolicy::Count(2)
        );
    }

    #[test]
    fn test_validate_ok() {
        let mut first = activity("a");
        if let Step::Activity(s) = &mut first {
            s.routing.on_success = Some("b".to_string());
        }
        let def = definition(vec![first, activity("b")], "a");
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_steps() {
        let def = definition(vec![], "a");
        match def.validate() {
            Err(EngineError::InvalidDefinition(msg)) => {
                assert!(msg.contains("at least one step"))
            }
            other => panic!("expected InvalidDefinition, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let def = definition(vec![activity("a"), activity("a")], "a");
        match def.validate() {
            Err(EngineError::InvalidDefinition(msg)) => assert!(msg.contains("duplicate")),
            other => panic!("expected InvalidDefinition, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_unknown_initial_step() {
        let def = definition(vec![activity("a")], "missing");
        match def.validate() {
            Err(EngineError::InvalidDefinition(msg)) => assert!(msg.contains("initial step")),
            other => panic!("expected InvalidDefinition, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_dangling_route_target() {
        let mut step = activity("a");
        if let Step::Activity(s) = &mut step {
            s.routing.on_error = Some("nowhere".to_string());
        }
        let def = definition(vec![step], "a");
        match def.validate() {
            Err(EngineError::InvalidDefinition(msg)) => assert!(msg.contains("nowhere")),
            other => panic!("expected InvalidDefinition, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_malformed_timeout_rejected_eagerly() {
        let step = Step::Delay(DelayStep {
            id: "pause".to_string(),
            duration: "five minutes".to_string(),
            routing: Routing::default(),
        });
        let def = definition(vec![step], "pause");
        match def.validate() {
            Err(EngineError::InvalidTimeoutFormat(msg)) => assert_eq!(msg, "five minutes"),
            other => panic!("expected InvalidTimeoutFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_unsatisfiable_count_policy() {
        let step = Step::Parallel(ParallelStep {
            id: "fan".to_string(),
            branches: vec![BranchDefinition {
                name: None,
                steps: vec![activity("b1")],
            }],
            wait_for: WaitPolicy::Count(2),
            output_path: None,
            routing: Routing::default(),
        });
        let def = definition(vec![step], "fan");
        match def.validate() {
            Err(EngineError::InvalidDefinition(msg)) => assert!(msg.contains("waits for 2")),
            other => panic!("expected InvalidDefinition, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_branch_sequences_recursively() {
        let step = Step::Parallel(ParallelStep {
            id: "fan".to_string(),
            branches: vec![BranchDefinition {
                name: Some("dup".to_string()),
                steps: vec![activity("x"), activity("x")],
            }],
            wait_for: WaitPolicy::All,
            output_path: None,
            routing: Routing::default(),
        });
        let def = definition(vec![step], "fan");
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_validate_zero_attempt_retry_policy() {
        let mut step = activity("a");
        if let Step::Activity(s) = &mut step {
            s.retry_policy = Some(RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            });
        }
        let def = definition(vec![step], "a");
        assert!(def.validate().is_err());
    }
}
