//! Session state machine and progress bookkeeping.

use crate::error::{ApiError, CellError, StreamError};
use crate::types::{CellAddress, ColumnId, RowId, SessionId, TableId};
use std::collections::HashSet;

/// `pending → streaming → {completed | cancelled | failed}`
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Pending,
    Streaming,
    Completed,
    Cancelled,
    Failed(ApiError),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed(_) => "failed",
        }
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        match (self, next) {
            (SessionState::Pending, SessionState::Streaming) => true,
            (SessionState::Pending, SessionState::Cancelled | SessionState::Failed(_)) => true,
            (
                SessionState::Streaming,
                SessionState::Completed | SessionState::Cancelled | SessionState::Failed(_),
            ) => true,
            _ => false,
        }
    }
}

/// One in-flight generation request
#[derive(Debug, Clone)]
pub struct GenerationSession {
    pub id: SessionId,
    pub table_id: TableId,
    pub targets: Vec<CellAddress>,
    pub streaming: bool,
    pub state: SessionState,
}

impl GenerationSession {
    pub fn new(
        id: SessionId,
        table_id: TableId,
        targets: Vec<CellAddress>,
        streaming: bool,
    ) -> Self {
        Self {
            id,
            table_id,
            targets,
            streaming,
            state: SessionState::Pending,
        }
    }

    /// Distinct target rows, in first-seen order.
    pub fn target_row_ids(&self) -> Vec<RowId> {
        let mut seen = HashSet::new();
        self.targets
            .iter()
            .filter(|a| seen.insert(a.row_id.clone()))
            .map(|a| a.row_id.clone())
            .collect()
    }

    /// Distinct target columns, in first-seen order.
    pub fn target_column_ids(&self) -> Vec<ColumnId> {
        let mut seen = HashSet::new();
        self.targets
            .iter()
            .filter(|a| seen.insert(a.column_id.clone()))
            .map(|a| a.column_id.clone())
            .collect()
    }

    /// Move to `next` if legal; returns whether the state changed.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(&next) {
            return false;
        }
        self.state = next;
        true
    }
}

/// Tracks which targets have seen a terminal signal
#[derive(Debug, Clone)]
pub struct TerminalTracker {
    open: HashSet<CellAddress>,
    closed: bool,
}

impl TerminalTracker {
    pub fn new(targets: &[CellAddress]) -> Self {
        Self {
            open: targets.iter().cloned().collect(),
            closed: false,
        }
    }

    /// Mark one target terminal. Returns `false` if it already was.
    pub fn mark(&mut self, address: &CellAddress) -> bool {
        self.open.remove(address)
    }

    /// `[DONE]`: every target is terminal. Repeats are no-ops.
    pub fn mark_all(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.open.clear();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.open.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.open.len()
    }
}

/// Counters collected while a session runs
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub frames: usize,
    /// Frames that could not be decoded; these count toward the failure limit
    pub malformed_frames: usize,
    /// Well-formed events of an unknown kind
    pub skipped_events: usize,
    pub diagnostics: Vec<StreamError>,
    pub cell_errors: Vec<(CellAddress, CellError)>,
}

/// Final outcome handed to the caller of `wait`
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub table_id: TableId,
    pub state: SessionState,
    pub frames: usize,
    pub malformed_frames: usize,
    pub skipped_events: usize,
    pub diagnostics: Vec<StreamError>,
    pub cell_errors: Vec<(CellAddress, CellError)>,
    /// Cells restored from the snapshot (cancel or failure)
    pub reverted: Vec<CellAddress>,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// The error a failed or cancelled session ended with.
    pub fn error(&self) -> Option<ApiError> {
        match &self.state {
            SessionState::Failed(e) => Some(e.clone()),
            SessionState::Cancelled => Some(ApiError::Cancelled(self.session_id)),
            _ => None,
        }
    }
}
