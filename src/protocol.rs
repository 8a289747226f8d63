//! Streaming Generation Protocol
//!
//! Leaf components of the generation pipeline: the frame decoder for the
//! text-stream framing and the classifier that turns frames into typed events.

pub mod classify;
pub mod decoder;
pub mod event;

pub use classify::{classify, classify_body};
pub use decoder::{Frame, FrameDecoder, FramePayload, DEFAULT_MAX_FRAME_BYTES};
pub use event::{
    ChatCompletion, ChatCompletionChunk, ChatMessage, Chunk, ChunkChoice, CompletionChoice,
    DeltaMessage, Event, MalformedFrame, ReferencesEvent, Usage,
};
