use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use trellis_core::{ActivityContext, ActivityHandler, EngineError};

use crate::{require_str, NotificationSink};

/// `sendEmail`: deliver an email through the notification collaborator
///
/// Params: `to`, `subject`, optional `body` (strings).
pub struct SendEmail {
    notifications: Arc<dyn NotificationSink>,
}

impl SendEmail {
    /// Create the handler over a notification sink
    pub fn new(notifications: Arc<dyn NotificationSink>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl ActivityHandler for SendEmail {
    fn name(&self) -> &str {
        "sendEmail"
    }

    async fn invoke(&self, ctx: &ActivityContext, params: Value) -> Result<Value, EngineError> {
        let to = require_str(&params, "to", "sendEmail")?;
        let subject = require_str(&params, "subject", "sendEmail")?;
        let body = params.get("body").and_then(|v| v.as_str()).unwrap_or("");

        self.notifications
            .send_email(&ctx.tenant_id, to, subject, body)
            .await?;
        Ok(json!({"sent": true, "to": to}))
    }
}

/// `createNotification`: create an in-app notification for a user
///
/// Params: `userId`, `title` (strings), optional `payload` (object).
pub struct CreateNotification {
    notifications: Arc<dyn NotificationSink>,
}

impl CreateNotification {
    /// Create the handler over a notification sink
    pub fn new(notifications: Arc<dyn NotificationSink>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl ActivityHandler for CreateNotification {
    fn name(&self) -> &str {
        "createNotification"
    }

    async fn invoke(&self, ctx: &ActivityContext, params: Value) -> Result<Value, EngineError> {
        let user_id = require_str(&params, "userId", "createNotification")?;
        let title = require_str(&params, "title", "createNotification")?;
        let payload = params.get("payload").cloned().unwrap_or_else(|| json!({}));

        self.notifications
            .create_notification(&ctx.tenant_id, user_id, title, &payload)
            .await?;
        Ok(json!({"created": true, "userId": user_id}))
    }
}

/// `logError`: record a workflow-authored error line
///
/// Params: `message` (string), optional `details` (any). Always succeeds;
/// the output confirms what was logged so downstream steps can reference it.
pub struct LogError;

#[async_trait]
impl ActivityHandler for LogError {
    fn name(&self) -> &str {
        "logError"
    }

    async fn invoke(&self, ctx: &ActivityContext, params: Value) -> Result<Value, EngineError> {
        let message = params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unspecified workflow error");
        let details = params.get("details").cloned().unwrap_or(Value::Null);

        error!(
            execution = %ctx.execution_id,
            tenant = %ctx.tenant_id,
            step = %ctx.step_id,
            %message,
            %details,
            "workflow error logged"
        );

        Ok(json!({"logged": true, "message": message}))
    }
}
