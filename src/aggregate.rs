//! Cell Aggregator
//!
//! Routes classified events to the (row, column) they target within one
//! session and accumulates them into cell state in the table store.

use crate::error::CellError;
use crate::protocol::{ChatCompletion, ChatCompletionChunk, Event, ReferencesEvent};
use crate::table::{CellChange, CellDelta, TableStore};
use crate::types::{CellAddress, SessionId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-session aggregator writing into one table store
pub struct CellAggregator {
    session_id: SessionId,
    store: Arc<TableStore>,
    targets: Vec<CellAddress>,
}

impl CellAggregator {
    pub fn new(session_id: SessionId, store: Arc<TableStore>, targets: Vec<CellAddress>) -> Self {
        Self {
            session_id,
            store,
            targets,
        }
    }

    pub fn targets(&self) -> &[CellAddress] {
        &self.targets
    }

    /// Resolve the cell an event is addressed to.
    ///
    /// Routing fields narrow the candidates; the event is routable only if
    /// exactly one target remains. With no routing fields that means the
    /// session must have a single target.
    pub fn route(&self, event: &Event) -> Option<CellAddress> {
        let (row_id, column_id) = match event {
            Event::ContentDelta(chunk) => {
                (chunk.row_id.as_deref(), chunk.output_column_name.as_deref())
            }
            Event::References(refs) => {
                (refs.row_id.as_deref(), refs.output_column_name.as_deref())
            }
            Event::FullResult(result) => {
                (result.row_id.as_deref(), result.output_column_name.as_deref())
            }
            Event::DoneSentinel | Event::Malformed(_) => return None,
        };

        let mut candidates = self.targets.iter().filter(|addr| {
            row_id.map_or(true, |r| addr.row_id == r)
                && column_id.map_or(true, |c| addr.column_id == c)
        });
        let first = candidates.next()?;
        if candidates.next().is_some() {
            return None;
        }
        Some(first.clone())
    }

    /// Route and apply an event. `None` when the event addresses no cell.
    pub fn ingest(&self, event: &Event) -> Option<CellDelta> {
        if let Event::Malformed(frame) = event {
            warn!(
                session_id = %self.session_id,
                offset = frame.offset,
                error = %frame.error,
                "Dropped malformed frame"
            );
            return None;
        }
        if matches!(event, Event::DoneSentinel) {
            return None;
        }
        match self.route(event) {
            Some(address) => Some(self.apply(&address, event)),
            None => {
                warn!(
                    session_id = %self.session_id,
                    kind = event.kind(),
                    "Dropped event that matches no unique session target"
                );
                None
            }
        }
    }

    /// Compute the delta for `event` at `address` and write it to the store.
    pub fn apply(&self, address: &CellAddress, event: &Event) -> CellDelta {
        let delta = delta_for(address, event);
        if !delta.is_noop() {
            let applied = self.store.apply_delta(self.session_id, address, &delta.change);
            if !applied {
                debug!(
                    session_id = %self.session_id,
                    address = %address,
                    "Delta not applied; cell no longer owned by session"
                );
            }
        }
        delta
    }
}

/// Translate one event into the change it makes to a cell.
pub fn delta_for(address: &CellAddress, event: &Event) -> CellDelta {
    match event {
        Event::ContentDelta(chunk) => content_delta(address, chunk),
        Event::References(refs) => references_delta(address, refs),
        Event::FullResult(result) => full_result_delta(address, result),
        Event::DoneSentinel | Event::Malformed(_) => CellDelta::noop(address.clone()),
    }
}

fn content_delta(address: &CellAddress, chunk: &ChatCompletionChunk) -> CellDelta {
    if let Some(message) = chunk.error_message() {
        return CellDelta {
            address: address.clone(),
            change: CellChange::Error(CellError::backend(message)),
            terminal: true,
        };
    }

    let Some(choice) = chunk.primary_choice() else {
        return CellDelta::noop(address.clone());
    };
    let delta = &choice.delta;

    // Answer and reasoning fragments never share an increment.
    let change = match delta.content.as_deref() {
        Some(text) if !text.is_empty() => CellChange::AppendContent(text.to_string()),
        _ if delta.reasoning_content.is_some() || delta.reasoning_time.is_some() => {
            CellChange::AppendReasoning {
                content: delta.reasoning_content.clone(),
                time: delta.reasoning_time,
            }
        }
        _ => CellChange::None,
    };

    CellDelta {
        address: address.clone(),
        change,
        terminal: choice.finish_reason.is_some(),
    }
}

fn references_delta(address: &CellAddress, refs: &ReferencesEvent) -> CellDelta {
    CellDelta {
        address: address.clone(),
        change: CellChange::ReplaceReferences(refs.chunks.clone()),
        terminal: false,
    }
}

fn full_result_delta(address: &CellAddress, result: &ChatCompletion) -> CellDelta {
    if let Some(message) = result.error_message() {
        return CellDelta {
            address: address.clone(),
            change: CellChange::Error(CellError::backend(message)),
            terminal: true,
        };
    }

    let (value, reasoning_content) = match result.primary_choice() {
        Some(choice) => (
            choice.message.content.clone(),
            choice.message.reasoning_content.clone(),
        ),
        None => (String::new(), None),
    };
    CellDelta {
        address: address.clone(),
        change: CellChange::Assign {
            value,
            reasoning_content,
            references: result.references.as_ref().map(|r| r.chunks.clone()),
        },
        terminal: true,
    }
}
