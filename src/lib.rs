//! Gentable: Streaming Generation for Table Cells
//!
//! Decodes an incrementally delivered generation stream, classifies each
//! event, routes it to the table cell it targets, and reconciles the result
//! with a concurrently edited table store under failure, cancellation, and
//! retry.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod logging;
pub mod prompt;
pub mod protocol;
pub mod provider;
pub mod session;
pub mod table;
pub mod tooling;
pub mod types;

pub use aggregate::CellAggregator;
pub use error::{ApiError, CellError, ErrorKind, StreamError};
pub use session::{SessionHandle, SessionManager, SessionReport, SessionRequest, SessionState};
pub use table::{Cell, CellStatus, CellUpdate, TableRegistry, TableStore};
pub use types::{CellAddress, SessionId};
