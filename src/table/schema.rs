//! Table schema: columns, generation config, and rows.

use super::cell::Cell;
use crate::types::{ColumnId, RowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnDtype {
    Str,
    Int,
    Float,
    Bool,
    Image,
    Audio,
    Document,
}

impl Default for ColumnDtype {
    fn default() -> Self {
        ColumnDtype::Str
    }
}

/// Retrieval parameters used to ground a generated column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagParams {
    /// Knowledge table to search
    pub table_id: String,
    #[serde(default = "default_k")]
    pub k: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranking_model: Option<String>,
    /// Query template; defaults to the resolved prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
}

fn default_k() -> u32 {
    3
}

/// Generation settings for an output column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenConfig {
    pub model: String,
    /// User message template with `${column}` placeholders
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_params: Option<RagParams>,
}

/// Schema for one table field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    #[serde(default)]
    pub dtype: ColumnDtype,
    #[serde(default, rename = "gen_config", skip_serializing_if = "Option::is_none")]
    pub gen_config: Option<GenConfig>,
}

impl Column {
    pub fn input(id: impl Into<ColumnId>) -> Self {
        Self {
            id: id.into(),
            dtype: ColumnDtype::Str,
            gen_config: None,
        }
    }

    pub fn output(id: impl Into<ColumnId>, gen_config: GenConfig) -> Self {
        Self {
            id: id.into(),
            dtype: ColumnDtype::Str,
            gen_config: Some(gen_config),
        }
    }

    pub fn is_generated(&self) -> bool {
        self.gen_config.is_some()
    }
}

/// A record of cells keyed by column id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(rename = "ID")]
    pub id: RowId,
    #[serde(default = "Utc::now", rename = "Updated at")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub cells: BTreeMap<ColumnId, Cell>,
}

impl Row {
    pub fn new(id: impl Into<RowId>) -> Self {
        Self {
            id: id.into(),
            updated_at: Utc::now(),
            cells: BTreeMap::new(),
        }
    }

    /// Builder-style helper to seed a cell value.
    pub fn with_value(mut self, column_id: impl Into<ColumnId>, value: impl Into<String>) -> Self {
        self.cells
            .insert(column_id.into(), Cell::with_value(value));
        self
    }

    pub fn value(&self, column_id: &str) -> Option<&str> {
        self.cells.get(column_id).map(|c| c.value.as_str())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
