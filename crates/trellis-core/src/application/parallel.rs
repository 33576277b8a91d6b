//! Joining of parallel branch tasks under a wait policy
//!
//! Branches run as independently scheduled tasks over deep copies of the
//! fork-time state; this module owns the join side: how many terminations
//! satisfy the policy, and what the parent step sees as its result.

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::domain::definition::WaitPolicy;

/// What one branch produced
#[derive(Debug, Clone, PartialEq)]
pub struct BranchOutput {
    /// Final value of the branch's last completed step
    pub value: Option<Value>,

    /// `outputPath` writes made by the branch's steps, in execution order
    ///
    /// These are the only channel through which a branch's state reaches
    /// the parent: merged at the join point, never by shared mutation.
    pub writes: Vec<(String, Value)>,
}

/// One joined branch: index plus output or error
#[derive(Debug)]
pub struct BranchJoin {
    /// Position of the branch in the parallel step definition
    pub branch_index: usize,

    /// The branch's output, or the error that terminated it
    pub outcome: Result<BranchOutput, String>,
}

/// Number of terminated branches that satisfies the wait policy
pub fn required_terminations(policy: &WaitPolicy, branch_count: usize) -> usize {
    match policy {
        WaitPolicy::All => branch_count,
        WaitPolicy::Any => 1.min(branch_count),
        WaitPolicy::Count(n) => *n,
    }
}

/// Await branch tasks until `required` of them have terminated
///
/// Success and failure both count as termination; a branch failure never
/// aborts its siblings (branches are independent fault domains). Once the
/// threshold is met the remaining tasks are left running detached and
/// their results are discarded. Returns the joined branches ordered by
/// branch index.
pub async fn join_branches(
    tasks: Vec<(usize, JoinHandle<Result<BranchOutput, String>>)>,
    required: usize,
) -> Vec<BranchJoin> {
    let mut pending: FuturesUnordered<_> = tasks
        .into_iter()
        .map(|(index, handle)| async move {
            match handle.await {
                Ok(outcome) => BranchJoin {
                    branch_index: index,
                    outcome,
                },
                Err(join_error) => BranchJoin {
                    branch_index: index,
                    outcome: Err(format!("branch {} panicked: {}", index, join_error)),
                },
            }
        })
        .collect();

    let mut joined = Vec::with_capacity(required);
    while joined.len() < required {
        match pending.next().await {
            Some(join) => joined.push(join),
            None => break,
        }
    }
    // dropping `pending` detaches the unfinished branch tasks

    joined.sort_by_key(|j| j.branch_index);
    joined
}

/// Render joined branches as the parent step's result value
pub fn joins_to_value(joins: &[BranchJoin]) -> Value {
    Value::Array(
        joins
            .iter()
            .map(|join| match &join.outcome {
                Ok(output) => json!({
                    "branchIndex": join.branch_index,
                    "result": output.value.clone().unwrap_or(Value::Null),
                }),
                Err(error) => json!({
                    "branchIndex": join.branch_index,
                    "error": error,
                }),
            })
            .collect(),
    )
}
