//! Event Classifier & Validator
//!
//! Parses a frame's JSON, dispatches on the `object` discriminant, and
//! validates the payload shape. Nothing here fails: every problem becomes
//! an [`Event::Malformed`] that the caller may drop.

use super::decoder::{Frame, FramePayload};
use super::event::{
    ChatCompletion, ChatCompletionChunk, Event, MalformedFrame, ReferencesEvent, OBJECT_CHUNK,
    OBJECT_COMPLETION, OBJECT_REFERENCES,
};
use crate::error::StreamError;
use serde_json::Value;
use tracing::debug;

/// Classify one decoded frame.
pub fn classify(frame: &Frame) -> Event {
    match &frame.payload {
        FramePayload::Done => Event::DoneSentinel,
        FramePayload::Malformed(error) => malformed(frame.offset, error.clone()),
        FramePayload::Data(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => classify_value(value, text, frame.offset),
            Err(e) => malformed(
                frame.offset,
                StreamError::FrameParse {
                    reason: e.to_string(),
                    raw: text.clone(),
                },
            ),
        },
    }
}

/// Classify a complete non-streaming body. The body is either one
/// `chat.completion` object or an array of them, one per target.
pub fn classify_body(text: &str) -> Vec<Event> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| {
                let raw = item.to_string();
                classify_value(item, &raw, 0)
            })
            .collect(),
        Ok(value) => vec![classify_value(value, text, 0)],
        Err(e) => vec![malformed(
            0,
            StreamError::FrameParse {
                reason: e.to_string(),
                raw: text.to_string(),
            },
        )],
    }
}

fn classify_value(value: Value, raw: &str, offset: u64) -> Event {
    let kind = value
        .get("object")
        .and_then(Value::as_str)
        .map(str::to_string);

    let result = match kind.as_deref() {
        Some(OBJECT_CHUNK) => {
            serde_json::from_value::<ChatCompletionChunk>(value).map(Event::ContentDelta)
        }
        Some(OBJECT_REFERENCES) => {
            serde_json::from_value::<ReferencesEvent>(value).map(Event::References)
        }
        Some(OBJECT_COMPLETION) => {
            serde_json::from_value::<ChatCompletion>(value).map(Event::FullResult)
        }
        _ => {
            return malformed(
                offset,
                StreamError::UnexpectedEventKind {
                    kind,
                    raw: raw.to_string(),
                },
            );
        }
    };

    result.unwrap_or_else(|e| {
        malformed(
            offset,
            StreamError::FrameParse {
                reason: format!("invalid {} payload: {}", kind.as_deref().unwrap_or("?"), e),
                raw: raw.to_string(),
            },
        )
    })
}

fn malformed(offset: u64, error: StreamError) -> Event {
    debug!(offset, error = %error, "Classified malformed frame");
    Event::Malformed(MalformedFrame { offset, error })
}
