//! Shared fixtures: a small table, SSE frame builders, and polling helpers.

use gentable::session::{ScriptedBackend, SessionConfig, SessionManager};
use gentable::table::{Column, GenConfig, Row, TableRegistry, TableStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const TABLE: &str = "t";

pub fn gen_config() -> GenConfig {
    GenConfig {
        model: "test-model".to_string(),
        prompt: "Answer: ${q}".to_string(),
        system_prompt: None,
        temperature: None,
        max_tokens: None,
        rag_params: None,
    }
}

/// Table `t` with input column `q`, output columns `a` and `b`, and rows
/// `r1..=r3`. `r1:a` and `r2:a` start with values `old-1` and `old-2`.
pub fn table() -> (Arc<TableRegistry>, Arc<TableStore>) {
    let registry = Arc::new(TableRegistry::new());
    let store = registry.init(
        TABLE,
        vec![
            Column::input("q"),
            Column::output("a", gen_config()),
            Column::output("b", gen_config()),
        ],
    );
    store
        .add_row(Row::new("r1").with_value("q", "one").with_value("a", "old-1"))
        .unwrap();
    store
        .add_row(Row::new("r2").with_value("q", "two").with_value("a", "old-2"))
        .unwrap();
    store.add_row(Row::new("r3").with_value("q", "three")).unwrap();
    (registry, store)
}

pub fn config() -> SessionConfig {
    SessionConfig {
        retry_delay_ms: 1,
        idle_timeout_ms: Some(5_000),
        ..SessionConfig::default()
    }
}

pub fn manager(
    registry: &Arc<TableRegistry>,
    backend: &Arc<ScriptedBackend>,
    config: SessionConfig,
) -> SessionManager {
    SessionManager::new(Arc::clone(registry), backend.clone(), config)
}

pub fn frame(payload: &serde_json::Value) -> String {
    format!("data: {}\n\n", payload)
}

pub fn chunk(content: &str) -> String {
    frame(&json!({
        "object": "chat.completion.chunk",
        "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": null }]
    }))
}

pub fn routed_chunk(row: &str, column: &str, content: &str, finish: Option<&str>) -> String {
    frame(&json!({
        "object": "chat.completion.chunk",
        "row_id": row,
        "output_column_name": column,
        "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": finish }]
    }))
}

pub fn stop() -> String {
    frame(&json!({
        "object": "chat.completion.chunk",
        "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }]
    }))
}

pub fn done() -> String {
    "data: [DONE]\n\n".to_string()
}

pub fn completion(content: &str) -> serde_json::Value {
    json!({
        "object": "chat.completion",
        "id": "cmpl-1",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

/// Poll until `check` holds; panics after about two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}
