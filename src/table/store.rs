//! Table State Store
//!
//! Canonical table data plus generation/edit state for one table. All
//! mutation goes through a single per-table lock, so a reader always sees a
//! cell's accumulated fields as of one complete `apply_delta`, never a
//! half-applied change. Admission control for generation sessions is
//! evaluated under the same lock as the snapshot it creates.

use super::cell::{Cell, CellChange};
use super::schema::{Column, Row};
use super::subscription::{CellStatus, CellUpdate, SubscriberMap, Subscription, UpdateCallback};
use crate::error::ApiError;
use crate::types::{CellAddress, RowId, SessionId, TableId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pre-session copy of every targeted cell
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub session_id: SessionId,
    /// `None` marks a cell that did not exist before the session
    pub cells: Vec<(CellAddress, Option<Cell>)>,
}

struct TableData {
    columns: Vec<Column>,
    rows: Vec<Row>,
    status: HashMap<CellAddress, CellStatus>,
    snapshots: HashMap<SessionId, TableSnapshot>,
    version: u64,
}

impl TableData {
    fn row_index(&self, row_id: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.id == row_id)
    }

    fn status(&self, address: &CellAddress) -> CellStatus {
        self.status
            .get(address)
            .copied()
            .unwrap_or(CellStatus::Idle)
    }

    fn check_address(&self, address: &CellAddress) -> Result<usize, ApiError> {
        if !self.columns.iter().any(|c| c.id == address.column_id) {
            return Err(ApiError::ColumnNotFound(address.column_id.clone()));
        }
        self.row_index(&address.row_id)
            .ok_or_else(|| ApiError::RowNotFound(address.row_id.clone()))
    }

    fn cell(&self, address: &CellAddress) -> Option<Cell> {
        self.row_index(&address.row_id)
            .and_then(|i| self.rows[i].cells.get(&address.column_id).cloned())
    }

    fn update(&mut self, address: &CellAddress) -> CellUpdate {
        self.version += 1;
        CellUpdate {
            address: address.clone(),
            cell: self.cell(address),
            status: self.status(address),
            version: self.version,
        }
    }
}

/// Concurrently accessed data for one table
pub struct TableStore {
    table_id: TableId,
    data: RwLock<TableData>,
    subscribers: Arc<SubscriberMap>,
}

impl TableStore {
    pub fn new(table_id: impl Into<TableId>, columns: Vec<Column>) -> Self {
        Self {
            table_id: table_id.into(),
            data: RwLock::new(TableData {
                columns,
                rows: Vec::new(),
                status: HashMap::new(),
                snapshots: HashMap::new(),
                version: 0,
            }),
            subscribers: Arc::new(SubscriberMap::new()),
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn columns(&self) -> Vec<Column> {
        self.data.read().columns.clone()
    }

    pub fn column(&self, column_id: &str) -> Option<Column> {
        self.data
            .read()
            .columns
            .iter()
            .find(|c| c.id == column_id)
            .cloned()
    }

    pub fn add_row(&self, row: Row) -> Result<(), ApiError> {
        let mut data = self.data.write();
        if data.row_index(&row.id).is_some() {
            return Err(ApiError::InvalidRequest(format!(
                "Row {} already exists in table {}",
                row.id, self.table_id
            )));
        }
        debug!(table_id = %self.table_id, row_id = %row.id, "Added row");
        data.rows.push(row);
        data.version += 1;
        Ok(())
    }

    /// Delete a row; rejected while any of its cells is generating.
    pub fn delete_row(&self, row_id: &str) -> Result<Row, ApiError> {
        let mut data = self.data.write();
        let index = data
            .row_index(row_id)
            .ok_or_else(|| ApiError::RowNotFound(row_id.to_string()))?;
        let busy = data
            .status
            .iter()
            .any(|(addr, s)| addr.row_id == row_id && matches!(s, CellStatus::Streaming(_)));
        if busy {
            return Err(ApiError::CellBusy(format!(
                "Row {} has cells under generation",
                row_id
            )));
        }
        data.status.retain(|addr, _| addr.row_id != row_id);
        data.version += 1;
        Ok(data.rows.remove(index))
    }

    pub fn row(&self, row_id: &str) -> Option<Row> {
        let data = self.data.read();
        data.row_index(row_id).map(|i| data.rows[i].clone())
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> Vec<Row> {
        self.data.read().rows.clone()
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.data.read().rows.iter().map(|r| r.id.clone()).collect()
    }

    /// Consistent copy of one cell's accumulated fields.
    pub fn cell(&self, address: &CellAddress) -> Option<Cell> {
        self.data.read().cell(address)
    }

    pub fn status(&self, address: &CellAddress) -> CellStatus {
        self.data.read().status(address)
    }

    pub fn is_streaming(&self, address: &CellAddress) -> bool {
        matches!(self.status(address), CellStatus::Streaming(_))
    }

    /// Whether any cell of the table is generating.
    pub fn has_active_sessions(&self) -> bool {
        !self.data.read().snapshots.is_empty()
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.data.read().snapshots.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Admit a session: check every target is idle, snapshot the targets,
    /// reset them to empty cells and mark them streaming. All or nothing.
    pub fn begin_streaming(
        &self,
        session_id: SessionId,
        targets: &[CellAddress],
    ) -> Result<TableSnapshot, ApiError> {
        let (snapshot, updates) = {
            let mut data = self.data.write();
            if data.snapshots.contains_key(&session_id) {
                return Err(ApiError::InvalidRequest(format!(
                    "Session {} already admitted",
                    session_id
                )));
            }
            for address in targets {
                data.check_address(address)?;
                match data.status(address) {
                    CellStatus::Idle => {}
                    CellStatus::Streaming(active) => {
                        warn!(
                            table_id = %self.table_id,
                            address = %address,
                            active = %active,
                            "Rejected session: target already generating"
                        );
                        return Err(ApiError::SessionConflict {
                            address: address.clone(),
                            active,
                        });
                    }
                    CellStatus::Editing => {
                        return Err(ApiError::CellBusy(format!(
                            "Cell {} is being edited",
                            address
                        )));
                    }
                }
            }

            let cells: Vec<(CellAddress, Option<Cell>)> = targets
                .iter()
                .map(|addr| (addr.clone(), data.cell(addr)))
                .collect();
            let snapshot = TableSnapshot { session_id, cells };

            let mut updates = Vec::with_capacity(targets.len());
            for address in targets {
                if let Some(i) = data.row_index(&address.row_id) {
                    let row = &mut data.rows[i];
                    row.cells.insert(address.column_id.clone(), Cell::default());
                    row.touch();
                }
                data.status
                    .insert(address.clone(), CellStatus::Streaming(session_id));
                updates.push(data.update(address));
            }
            data.snapshots.insert(session_id, snapshot.clone());
            info!(
                table_id = %self.table_id,
                session_id = %session_id,
                targets = targets.len(),
                "Began streaming"
            );
            (snapshot, updates)
        };
        self.subscribers.publish(updates);
        Ok(snapshot)
    }

    /// Apply a change to a streaming cell. Returns `false` (and changes
    /// nothing) when the cell is not owned by `session_id`, which is how
    /// frames arriving after a cancel or revert are discarded.
    pub fn apply_delta(
        &self,
        session_id: SessionId,
        address: &CellAddress,
        change: &CellChange,
    ) -> bool {
        let update = {
            let mut data = self.data.write();
            if data.status(address) != CellStatus::Streaming(session_id) {
                debug!(
                    session_id = %session_id,
                    address = %address,
                    "Discarded delta for cell not owned by session"
                );
                return false;
            }
            if matches!(change, CellChange::None) {
                return true;
            }
            let Some(i) = data.row_index(&address.row_id) else {
                return false;
            };
            let row = &mut data.rows[i];
            row.cells
                .entry(address.column_id.clone())
                .or_default()
                .apply(change);
            row.touch();
            data.update(address)
        };
        self.subscribers.publish(vec![update]);
        true
    }

    /// Finalize a session: keep the generated cells and clear streaming flags.
    pub fn commit(&self, session_id: SessionId) -> Result<(), ApiError> {
        let updates = {
            let mut data = self.data.write();
            let snapshot = data.snapshots.remove(&session_id).ok_or_else(|| {
                ApiError::InvalidRequest(format!("Session {} has no snapshot", session_id))
            })?;
            let mut updates = Vec::new();
            for (address, _) in &snapshot.cells {
                if data.status(address) == CellStatus::Streaming(session_id) {
                    data.status.remove(address);
                    updates.push(data.update(address));
                }
            }
            info!(table_id = %self.table_id, session_id = %session_id, "Committed session");
            updates
        };
        self.subscribers.publish(updates);
        Ok(())
    }

    /// Restore every target of a session to its snapshot atomically.
    pub fn revert(&self, session_id: SessionId) -> Result<Vec<CellAddress>, ApiError> {
        let (reverted, updates) = {
            let mut data = self.data.write();
            let snapshot = data.snapshots.remove(&session_id).ok_or_else(|| {
                ApiError::InvalidRequest(format!("Session {} has no snapshot", session_id))
            })?;
            let mut reverted = Vec::with_capacity(snapshot.cells.len());
            let mut updates = Vec::with_capacity(snapshot.cells.len());
            for (address, original) in snapshot.cells {
                if data.status(&address) != CellStatus::Streaming(session_id) {
                    continue;
                }
                data.status.remove(&address);
                if let Some(i) = data.row_index(&address.row_id) {
                    let row = &mut data.rows[i];
                    match original {
                        Some(cell) => {
                            row.cells.insert(address.column_id.clone(), cell);
                        }
                        None => {
                            row.cells.remove(&address.column_id);
                        }
                    }
                    row.touch();
                }
                updates.push(data.update(&address));
                reverted.push(address);
            }
            warn!(
                table_id = %self.table_id,
                session_id = %session_id,
                cells = reverted.len(),
                "Reverted session"
            );
            (reverted, updates)
        };
        self.subscribers.publish(updates);
        Ok(reverted)
    }

    /// Enter the user-editing state; rejected while the cell is generating.
    pub fn begin_edit(&self, address: &CellAddress) -> Result<(), ApiError> {
        let update = {
            let mut data = self.data.write();
            data.check_address(address)?;
            match data.status(address) {
                CellStatus::Streaming(active) => {
                    return Err(ApiError::CellBusy(format!(
                        "Cell {} is generating in {}",
                        address, active
                    )));
                }
                CellStatus::Editing => return Ok(()),
                CellStatus::Idle => {}
            }
            data.status.insert(address.clone(), CellStatus::Editing);
            data.update(address)
        };
        self.subscribers.publish(vec![update]);
        Ok(())
    }

    pub fn end_edit(&self, address: &CellAddress) {
        let update = {
            let mut data = self.data.write();
            if data.status(address) != CellStatus::Editing {
                return;
            }
            data.status.remove(address);
            data.update(address)
        };
        self.subscribers.publish(vec![update]);
    }

    /// Write a hand-edited value before the backing store confirms it.
    /// Returns the previous cell so the caller can `revert_cell` on failure.
    pub fn set_cell_optimistic(
        &self,
        address: &CellAddress,
        value: &str,
    ) -> Result<Cell, ApiError> {
        let (previous, update) = {
            let mut data = self.data.write();
            let i = data.check_address(address)?;
            if let CellStatus::Streaming(active) = data.status(address) {
                return Err(ApiError::CellBusy(format!(
                    "Cell {} is generating in {}",
                    address, active
                )));
            }
            let row = &mut data.rows[i];
            let cell = row.cells.entry(address.column_id.clone()).or_default();
            let previous = cell.clone();
            cell.value = value.to_string();
            cell.error = None;
            row.touch();
            (previous, data.update(address))
        };
        self.subscribers.publish(vec![update]);
        Ok(previous)
    }

    /// Undo a failed optimistic write.
    pub fn revert_cell(&self, address: &CellAddress, original: Cell) -> Result<(), ApiError> {
        let update = {
            let mut data = self.data.write();
            let i = data.check_address(address)?;
            if let CellStatus::Streaming(active) = data.status(address) {
                return Err(ApiError::CellBusy(format!(
                    "Cell {} is generating in {}",
                    address, active
                )));
            }
            let row = &mut data.rows[i];
            row.cells.insert(address.column_id.clone(), original);
            row.touch();
            data.update(address)
        };
        debug!(table_id = %self.table_id, address = %address, "Reverted optimistic edit");
        self.subscribers.publish(vec![update]);
        Ok(())
    }

    /// Register a callback for changes to one cell.
    pub fn subscribe(
        &self,
        address: CellAddress,
        callback: impl Fn(&CellUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        let callback: UpdateCallback = Arc::new(callback);
        self.subscribers.subscribe(address, callback)
    }
}
