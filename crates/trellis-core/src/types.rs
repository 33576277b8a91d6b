use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::execution::ExecutionId;

/// Context that accompanies a trigger and starts one execution
///
/// Every execution is tenant-scoped; `trigger_data` is the payload that
/// seeds the workflow state under the `trigger` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerContext {
    /// Owning tenant
    pub tenant_id: String,

    /// User that triggered the execution, if any
    #[serde(default)]
    pub user_id: Option<String>,

    /// Payload that started the execution
    #[serde(default)]
    pub trigger_data: Value,
}

impl TriggerContext {
    /// Create a trigger context for a tenant with a data payload
    pub fn new(tenant_id: impl Into<String>, trigger_data: Value) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            trigger_data,
        }
    }

    /// Attach the triggering user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Context handed to an activity handler on each invocation
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Execution the step belongs to
    pub execution_id: ExecutionId,

    /// Owning tenant
    pub tenant_id: String,

    /// Step being executed
    pub step_id: String,

    /// Invocation attempt, starting at 1
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trigger_context_builder() {
        let ctx = TriggerContext::new("tenant-1", json!({"orderId": 42})).with_user("user-7");

        assert_eq!(ctx.tenant_id, "tenant-1");
        assert_eq!(ctx.user_id.as_deref(), Some("user-7"));
        assert_eq!(ctx.trigger_data["orderId"], 42);
    }

    #[test]
    fn test_trigger_context_deserializes_without_user() {
        let ctx: TriggerContext =
            serde_json::from_value(json!({"tenantId": "t1", "triggerData": {"a": 1}})).unwrap();

        assert_eq!(ctx.tenant_id, "t1");
        assert!(ctx.user_id.is_none());
        assert_eq!(ctx.trigger_data["a"], 1);
    }
}
