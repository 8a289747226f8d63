//! Cell state and the incremental changes applied to it.

use crate::error::CellError;
use crate::protocol::Chunk;
use crate::types::CellAddress;
use serde::{Deserialize, Serialize};

/// A single table value, possibly under generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Seconds the backend spent reasoning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Chunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CellError>,
}

impl Cell {
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Apply one change in place.
    pub fn apply(&mut self, change: &CellChange) {
        match change {
            CellChange::None => {}
            CellChange::AppendContent(text) => self.value.push_str(text),
            CellChange::AppendReasoning { content, time } => {
                if let Some(text) = content {
                    self.reasoning_content
                        .get_or_insert_with(String::new)
                        .push_str(text);
                }
                if let Some(time) = time {
                    self.reasoning_time = Some(*time);
                }
            }
            CellChange::ReplaceReferences(chunks) => self.references = chunks.clone(),
            CellChange::Assign {
                value,
                reasoning_content,
                references,
            } => {
                self.value = value.clone();
                if let Some(reasoning) = reasoning_content {
                    self.reasoning_content = Some(reasoning.clone());
                }
                if let Some(chunks) = references {
                    self.references = chunks.clone();
                }
            }
            CellChange::Error(error) => self.error = Some(error.clone()),
        }
    }
}

/// Change to a single cell's accumulated fields
#[derive(Debug, Clone, PartialEq)]
pub enum CellChange {
    None,
    AppendContent(String),
    AppendReasoning {
        content: Option<String>,
        time: Option<f64>,
    },
    /// References arrive at most once per cell; a repeat overwrites.
    ReplaceReferences(Vec<Chunk>),
    /// Terminal assignment from a non-streaming result
    Assign {
        value: String,
        reasoning_content: Option<String>,
        references: Option<Vec<Chunk>>,
    },
    Error(CellError),
}

/// Change routed to a cell, plus whether it ends that cell's stream
#[derive(Debug, Clone, PartialEq)]
pub struct CellDelta {
    pub address: CellAddress,
    pub change: CellChange,
    pub terminal: bool,
}

impl CellDelta {
    pub fn noop(address: CellAddress) -> Self {
        Self {
            address,
            change: CellChange::None,
            terminal: false,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.change, CellChange::None) && !self.terminal
    }
}
