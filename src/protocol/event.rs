//! Typed events and their wire payloads.
//!
//! Every frame is classified exactly once into [`Event`]; downstream code
//! matches on the union exhaustively instead of inspecting `object` strings.

use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const OBJECT_CHUNK: &str = "chat.completion.chunk";
pub const OBJECT_REFERENCES: &str = "chat.references";
pub const OBJECT_COMPLETION: &str = "chat.completion";

/// A classified, validated frame
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ContentDelta(ChatCompletionChunk),
    References(ReferencesEvent),
    FullResult(ChatCompletion),
    DoneSentinel,
    Malformed(MalformedFrame),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ContentDelta(_) => "content_delta",
            Event::References(_) => "references",
            Event::FullResult(_) => "full_result",
            Event::DoneSentinel => "done",
            Event::Malformed(_) => "malformed",
        }
    }
}

/// A frame that could not be turned into a usable event
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedFrame {
    pub offset: u64,
    pub error: StreamError,
}

/// Token usage reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Incremental message fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Seconds spent reasoning so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: DeltaMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// `chat.completion.chunk`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_column_name: Option<String>,
    /// Server-side error scoped to the addressed cell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ChatCompletionChunk {
    /// The choice that feeds the cell (index 0).
    pub fn primary_choice(&self) -> Option<&ChunkChoice> {
        self.choices.iter().find(|c| c.index == 0)
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.primary_choice()
            .and_then(|c| c.finish_reason.as_deref())
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(error_text)
    }
}

/// One retrieval result used to ground an answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// `chat.references`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferencesEvent {
    #[serde(default = "references_object")]
    pub object: String,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub search_query: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_column_name: Option<String>,
}

fn references_object() -> String {
    OBJECT_REFERENCES.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub message: ChatMessage,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// `chat.completion`, the non-streaming result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: String,
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ReferencesEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ChatCompletion {
    pub fn primary_choice(&self) -> Option<&CompletionChoice> {
        self.choices.iter().find(|c| c.index == 0)
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(error_text)
    }
}

/// Render an embedded error payload (`"text"` or `{"message": ...}`) as text.
fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("detail"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}
