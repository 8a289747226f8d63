//! Per-table registry
//!
//! Arena of table stores keyed by table id with an explicit init/dispose
//! lifecycle. Each store carries its own lock, so work on different tables
//! never contends and state never leaks between tables.

use super::schema::Column;
use super::store::TableStore;
use crate::error::ApiError;
use crate::types::TableId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct TableRegistry {
    tables: RwLock<HashMap<TableId, Arc<TableStore>>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Create the store for a table, or return the existing one.
    pub fn init(&self, table_id: &str, columns: Vec<Column>) -> Arc<TableStore> {
        {
            let tables = self.tables.read();
            if let Some(store) = tables.get(table_id) {
                return Arc::clone(store);
            }
        }

        let mut tables = self.tables.write();
        // Another caller may have initialized it between the two locks.
        Arc::clone(tables.entry(table_id.to_string()).or_insert_with(|| {
            info!(table_id, "Initialized table store");
            Arc::new(TableStore::new(table_id, columns))
        }))
    }

    pub fn get(&self, table_id: &str) -> Result<Arc<TableStore>, ApiError> {
        self.tables
            .read()
            .get(table_id)
            .cloned()
            .ok_or_else(|| ApiError::TableNotFound(table_id.to_string()))
    }

    /// Remove a table; rejected while it has generating cells.
    pub fn dispose(&self, table_id: &str) -> Result<(), ApiError> {
        let mut tables = self.tables.write();
        let store = tables
            .get(table_id)
            .ok_or_else(|| ApiError::TableNotFound(table_id.to_string()))?;
        if store.has_active_sessions() {
            return Err(ApiError::CellBusy(format!(
                "Table {} has active generation sessions",
                table_id
            )));
        }
        tables.remove(table_id);
        info!(table_id, "Disposed table store");
        Ok(())
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.tables.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}
