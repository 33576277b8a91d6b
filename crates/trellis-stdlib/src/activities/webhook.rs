use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use trellis_core::{ActivityContext, ActivityHandler, EngineError};

use crate::require_str;

/// `callWebhook`: POST (or other method) a payload to an external URL
///
/// Params: `url` (string), optional `method` (default POST), optional
/// `headers` (object of strings), optional `body` (any JSON).
///
/// Any HTTP response is a successful invocation whose output carries the
/// status and body; only transport failures surface as activity errors and
/// are therefore retryable.
pub struct CallWebhook {
    client: Client,
}

impl CallWebhook {
    /// Create the handler with a bounded-timeout HTTP client
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
        }
    }
}

impl Default for CallWebhook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityHandler for CallWebhook {
    fn name(&self) -> &str {
        "callWebhook"
    }

    async fn invoke(&self, ctx: &ActivityContext, params: Value) -> Result<Value, EngineError> {
        let url = require_str(&params, "url", "callWebhook")?;
        let method_str = params
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("POST")
            .to_uppercase();
        let method = Method::from_str(&method_str).map_err(|_| {
            EngineError::InvalidDefinition(format!("callWebhook: invalid method {}", method_str))
        })?;

        let mut request = self.client.request(method.clone(), url);

        if let Some(headers) = params.get("headers").and_then(|v| v.as_object()) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }

        if method != Method::GET && method != Method::HEAD {
            if let Some(body) = params.get("body") {
                request = request.json(body);
            }
        }

        debug!(execution = %ctx.execution_id, url, method = %method_str, "calling webhook");

        let response = request.send().await.map_err(|transport_error| {
            EngineError::ActivityError(format!("webhook request failed: {}", transport_error))
        })?;

        let status = response.status().as_u16();
        let success = response.status().is_success();
        let body_text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<Value>(&body_text)
            .unwrap_or(Value::String(body_text));

        Ok(json!({
            "status": status,
            "success": success,
            "body": body,
        }))
    }
}
