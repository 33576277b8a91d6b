//!
//! Standard library of activity handlers for the Trellis Platform
//!
//! Every handler implements `trellis_core::ActivityHandler` and is invoked
//! with already-interpolated parameters. Side effects go through the
//! collaborator traits defined here: the tenant-scoped record store and the
//! notification sink. Webhooks go out over HTTP directly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use trellis_core::{ActivityRegistry, EngineError};

pub mod activities;

use activities::notify::{CreateNotification, LogError, SendEmail};
use activities::records::{CreateRecord, QueryRecords, UpdateRecord};
use activities::webhook::CallWebhook;

/// Tenant-scoped data-record CRUD collaborator
///
/// The platform's record API; the engine only sees this seam.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record and return it, id included
    async fn create_record(
        &self,
        tenant_id: &str,
        table: &str,
        values: &Value,
    ) -> Result<Value, EngineError>;

    /// Update a record and return the stored version
    async fn update_record(
        &self,
        tenant_id: &str,
        table: &str,
        record_id: &str,
        values: &Value,
    ) -> Result<Value, EngineError>;

    /// Query records matching a filter
    async fn query_records(
        &self,
        tenant_id: &str,
        table: &str,
        filter: &Value,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, EngineError>;
}

/// Outbound notification collaborator
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send an email
    async fn send_email(
        &self,
        tenant_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), EngineError>;

    /// Create an in-app notification for a user
    async fn create_notification(
        &self,
        tenant_id: &str,
        user_id: &str,
        title: &str,
        payload: &Value,
    ) -> Result<(), EngineError>;
}

/// Register the standard activity set on a registry
///
/// Covers the platform's built-in operations: `createRecord`,
/// `updateRecord`, `queryRecords`, `sendEmail`, `createNotification`,
/// `logError`, `callWebhook`.
pub fn register_standard_activities(
    registry: &mut ActivityRegistry,
    records: Arc<dyn RecordStore>,
    notifications: Arc<dyn NotificationSink>,
) {
    registry.register(Arc::new(CreateRecord::new(records.clone())));
    registry.register(Arc::new(UpdateRecord::new(records.clone())));
    registry.register(Arc::new(QueryRecords::new(records)));
    registry.register(Arc::new(SendEmail::new(notifications.clone())));
    registry.register(Arc::new(CreateNotification::new(notifications)));
    registry.register(Arc::new(LogError));
    registry.register(Arc::new(CallWebhook::new()));
}

/// Extract a required string parameter
pub(crate) fn require_str<'a>(params: &'a Value, key: &str, activity: &str) -> Result<&'a str, EngineError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            EngineError::InvalidDefinition(format!(
                "{} requires a string '{}' parameter",
                activity, key
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;
    use trellis_core::{ActivityContext, ActivityHandler, ExecutionId};

    pub(crate) struct MockRecordStore {
        pub calls: Mutex<Vec<String>>,
    }

    impl MockRecordStore {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RecordStore for MockRecordStore {
        async fn create_record(
            &self,
            tenant_id: &str,
            table: &str,
            values: &Value,
        ) -> Result<Value, EngineError> {
            self.calls
                .lock()
                .await
                .push(format!("create:{}:{}", tenant_id, table));
            let mut record = values.clone();
            if let Some(map) = record.as_object_mut() {
                map.insert("id".to_string(), json!("rec-1"));
            }
            Ok(record)
        }

        async fn update_record(
            &self,
            tenant_id: &str,
            table: &str,
            record_id: &str,
            values: &Value,
        ) -> Result<Value, EngineError> {
            self.calls
                .lock()
                .await
                .push(format!("update:{}:{}:{}", tenant_id, table, record_id));
            Ok(values.clone())
        }

        async fn query_records(
            &self,
            tenant_id: &str,
            table: &str,
            _filter: &Value,
            limit: Option<usize>,
        ) -> Result<Vec<Value>, EngineError> {
            self.calls
                .lock()
                .await
                .push(format!("query:{}:{}:{:?}", tenant_id, table, limit));
            Ok(vec![json!({"id": "rec-1"})])
        }
    }

    pub(crate) struct MockNotificationSink {
        pub sent: Mutex<Vec<String>>,
    }

    impl MockNotificationSink {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for MockNotificationSink {
        async fn send_email(
            &self,
            tenant_id: &str,
            to: &str,
            subject: &str,
            _body: &str,
        ) -> Result<(), EngineError> {
            self.sent
                .lock()
                .await
                .push(format!("email:{}:{}:{}", tenant_id, to, subject));
            Ok(())
        }

        async fn create_notification(
            &self,
            tenant_id: &str,
            user_id: &str,
            title: &str,
            _payload: &Value,
        ) -> Result<(), EngineError> {
            self.sent
                .lock()
                .await
                .push(format!("notify:{}:{}:{}", tenant_id, user_id, title));
            Ok(())
        }
    }

    pub(crate) fn ctx() -> ActivityContext {
        ActivityContext {
            execution_id: ExecutionId("exec-1".to_string()),
            tenant_id: "tenant-1".to_string(),
            step_id: "step-1".to_string(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_standard_registry_covers_the_builtin_set() {
        let mut registry = ActivityRegistry::new();
        register_standard_activities(
            &mut registry,
            Arc::new(MockRecordStore::new()),
            Arc::new(MockNotificationSink::new()),
        );

        for name in [
            "createRecord",
            "updateRecord",
            "queryRecords",
            "sendEmail",
            "createNotification",
            "logError",
            "callWebhook",
        ] {
            assert!(registry.get(name).is_some(), "missing activity {}", name);
        }
    }

    #[tokio::test]
    async fn test_registered_handler_is_invokable() {
        let mut registry = ActivityRegistry::new();
        register_standard_activities(
            &mut registry,
            Arc::new(MockRecordStore::new()),
            Arc::new(MockNotificationSink::new()),
        );

        let handler = registry.get("logError").unwrap();
        let result = handler
            .invoke(&ctx(), json!({"message": "boom"}))
            .await
            .unwrap();
        assert_eq!(result["logged"], json!(true));
    }
}
