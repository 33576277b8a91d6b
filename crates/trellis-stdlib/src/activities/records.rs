use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use trellis_core::{ActivityContext, ActivityHandler, EngineError};

use crate::{require_str, RecordStore};

/// `createRecord`: insert a row into a tenant table
///
/// Params: `table` (string), `values` (object).
pub struct CreateRecord {
    records: Arc<dyn RecordStore>,
}

impl CreateRecord {
    /// Create the handler over a record store
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl ActivityHandler for CreateRecord {
    fn name(&self) -> &str {
        "createRecord"
    }

    async fn invoke(&self, ctx: &ActivityContext, params: Value) -> Result<Value, EngineError> {
        let table = require_str(&params, "table", "createRecord")?;
        let values = params.get("values").cloned().unwrap_or_else(|| json!({}));

        debug!(tenant = %ctx.tenant_id, table, "creating record");
        let record = self
            .records
            .create_record(&ctx.tenant_id, table, &values)
            .await?;
        Ok(json!({"record": record}))
    }
}

/// `updateRecord`: update one row in a tenant table
///
/// Params: `table` (string), `recordId` (string), `values` (object).
pub struct UpdateRecord {
    records: Arc<dyn RecordStore>,
}

impl UpdateRecord {
    /// Create the handler over a record store
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl ActivityHandler for UpdateRecord {
    fn name(&self) -> &str {
        "updateRecord"
    }

    async fn invoke(&self, ctx: &ActivityContext, params: Value) -> Result<Value, EngineError> {
        let table = require_str(&params, "table", "updateRecord")?;
        let record_id = require_str(&params, "recordId", "updateRecord")?;
        let values = params.get("values").cloned().unwrap_or_else(|| json!({}));

        debug!(tenant = %ctx.tenant_id, table, record = record_id, "updating record");
        let record = self
            .records
            .update_record(&ctx.tenant_id, table, record_id, &values)
            .await?;
        Ok(json!({"record": record}))
    }
}

/// `queryRecords`: fetch rows matching a filter
///
/// Params: `table` (string), optional `filter` (object), optional `limit`
/// (number).
pub struct QueryRecords {
    records: Arc<dyn RecordStore>,
}

impl QueryRecords {
    /// Create the handler over a record store
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl ActivityHandler for QueryRecords {
    fn name(&self) -> &str {
        "queryRecords"
    }

    async fn invoke(&self, ctx: &ActivityContext, params: Value) -> Result<Value, EngineError> {
        let table = require_str(&params, "table", "queryRecords")?;
        let filter = params.get("filter").cloned().unwrap_or_else(|| json!({}));
        let limit = params
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);

        let rows = self
            .records
            .query_records(&ctx.tenant_id, table, &filter, limit)
            .await?;
        Ok(json!({"count": rows.len(), "records": rows}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{ctx, MockRecordStore};

    #[tokio::test]
    async fn test_create_record_returns_stored_row() {
        let store = Arc::new(MockRecordStore::new());
        let handler = CreateRecord::new(store.clone());

        let result = handler
            .invoke(
                &ctx(),
                json!({"table": "orders", "values": {"total": 120}}),
            )
            .await
            .unwrap();

        assert_eq!(result["record"]["id"], json!("rec-1"));
        assert_eq!(result["record"]["total"], json!(120));
        assert_eq!(
            store.calls.lock().await.clone(),
            vec!["create:tenant-1:orders".to_string()]
        );
    }

    #[tokio::test]
    async fn test_update_record_requires_record_id() {
        let handler = UpdateRecord::new(Arc::new(MockRecordStore::new()));
        let result = handler.invoke(&ctx(), json!({"table": "orders"})).await;
        assert!(matches!(result, Err(EngineError::InvalidDefinition(_))));
    }

    #[tokio::test]
    async fn test_update_record_addresses_the_row() {
        let store = Arc::new(MockRecordStore::new());
        let handler = UpdateRecord::new(store.clone());

        handler
            .invoke(
                &ctx(),
                json!({"table": "orders", "recordId": "o-9", "values": {"status": "paid"}}),
            )
            .await
            .unwrap();

        assert_eq!(
            store.calls.lock().await.clone(),
            vec!["update:tenant-1:orders:o-9".to_string()]
        );
    }

    #[tokio::test]
    async fn test_query_records_returns_count_and_rows() {
        let store = Arc::new(MockRecordStore::new());
        let handler = QueryRecords::new(store.clone());

        let result = handler
            .invoke(
                &ctx(),
                json!({"table": "orders", "filter": {"status": "open"}, "limit": 10}),
            )
            .await
            .unwrap();

        assert_eq!(result["count"], json!(1));
        assert_eq!(result["records"][0]["id"], json!("rec-1"));
        assert_eq!(
            store.calls.lock().await.clone(),
            vec!["query:tenant-1:orders:Some(10)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_table_is_a_definition_error() {
        let handler = QueryRecords::new(Arc::new(MockRecordStore::new()));
        let result = handler.invoke(&ctx(), json!({})).await;
        assert!(matches!(result, Err(EngineError::InvalidDefinition(_))));
    }
}
