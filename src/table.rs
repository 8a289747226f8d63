//! Table State Store
//!
//! Pure table data plus generation state: cells, schema, the per-table store
//! with optimistic mutation and snapshot/revert, subscriptions, and the
//! registry that owns one store per table.

pub mod cell;
pub mod registry;
pub mod schema;
pub mod store;
pub mod subscription;

pub use cell::{Cell, CellChange, CellDelta};
pub use registry::TableRegistry;
pub use schema::{Column, ColumnDtype, GenConfig, RagParams, Row};
pub use store::{TableSnapshot, TableStore};
pub use subscription::{CellStatus, CellUpdate, Subscription};
