//! Generation sessions
//!
//! Session lifecycle, the transports and backends that feed it, and session
//! tuning.

pub mod backend;
pub mod config;
pub mod manager;
pub mod state;
pub mod transport;

pub use backend::{CellPrompt, GenerationBackend, GenerationRequest, ReplayBackend, ScriptedBackend};
pub use config::SessionConfig;
pub use manager::{SessionHandle, SessionManager, SessionRequest};
pub use state::{GenerationSession, SessionReport, SessionState, SessionStats, TerminalTracker};
pub use transport::{channel, ChannelTransport, StreamTransport, Transport, TransportFeed};
