//! Activity registry and invocation with bounded timeout and retry

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::definition::RetryPolicy;
use crate::duration::{parse_timeout, DEFAULT_ACTIVITY_TIMEOUT};
use crate::error::EngineError;
use crate::types::ActivityContext;

/// A named side-effecting operation invokable from an activity step
///
/// Handlers receive already-interpolated parameters. A handler error is
/// treated as transient and retried per the step's retry policy; only the
/// engine classifies definition bugs as non-retryable.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    /// Registered activity name
    fn name(&self) -> &str;

    /// Invoke the activity
    async fn invoke(&self, ctx: &ActivityContext, params: Value) -> Result<Value, EngineError>;
}

/// Mapping from activity name to handler
///
/// Populated once at engine construction; lookups of unregistered names
/// fail immediately with [`EngineError::UnknownActivity`] and are never
/// retried.
#[derive(Default)]
pub struct ActivityRegistry {
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl ActivityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name
    pub fn register(&mut self, handler: Arc<dyn ActivityHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// Look up a handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered activity names
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }
}

/// Invoke a registered activity with a bounded timeout and retry policy
///
/// Each attempt runs under `tokio::time::timeout`; between failed attempts
/// the caller's task suspends for an exponentially growing interval
/// (`initial_interval * multiplier^(attempt-1)`). Exhausting the policy
/// surfaces the final error; an elapsed timeout surfaces as
/// [`EngineError::ActivityTimeout`] so the router can follow `onTimeout`.
pub async fn invoke_with_retry(
    registry: &ActivityRegistry,
    ctx: &ActivityContext,
    activity: &str,
    params: &Value,
    timeout: Option<&str>,
    policy: Option<&RetryPolicy>,
) -> Result<Value, EngineError> {
    let handler = registry
        .get(activity)
        .ok_or_else(|| EngineError::UnknownActivity(activity.to_string()))?;

    let bound = match timeout {
        Some(timeout) => parse_timeout(timeout)?,
        None => DEFAULT_ACTIVITY_TIMEOUT,
    };

    let max_attempts = policy.map(|p| p.max_attempts.max(1)).unwrap_or(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        let attempt_ctx = ActivityContext {
            attempt,
            ..ctx.clone()
        };
        debug!(
            execution = %ctx.execution_id,
            step = %ctx.step_id,
            activity,
            attempt,
            "invoking activity"
        );

        let outcome = tokio::time::timeout(bound, handler.invoke(&attempt_ctx, params.clone()))
            .await
            .map_err(|_| {
                EngineError::ActivityTimeout(format!(
                    "{} did not finish within {:?}",
                    activity, bound
                ))
            })
            .and_then(|result| result);

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() {
                    return Err(error);
                }
                warn!(
                    execution = %ctx.execution_id,
                    step = %ctx.step_id,
                    activity,
                    attempt,
                    %error,
                    "activity attempt failed"
                );
                if attempt < max_attempts {
                    if let Some(policy) = policy {
                        tokio::time::sleep(backoff(policy, attempt)?).await;
                    }
                }
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        EngineError::ActivityError(format!("{} failed with no recorded error", activity))
    }))
}

/// Backoff before the attempt following `attempt` failures
fn backoff(policy: &RetryPolicy, attempt: u32) -> Result<Duration, EngineError> {
    let initial = parse_timeout(&policy.initial_interval)?;
    let factor = policy.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
    Ok(initial.mul_f64(factor))
}
