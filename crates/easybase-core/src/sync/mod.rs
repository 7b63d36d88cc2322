//! Dual-write propagation from the record store to the search index

mod engine;
mod handle;
mod operation;
mod outbox;
mod queue;
mod stats;

pub use engine::SyncEngine;
pub use handle::SyncHandle;
pub use operation::{SyncKind, SyncOperation};
pub use outbox::SyncOutbox;
pub use queue::{QueueStats, SyncQueue};
pub use stats::{SyncStats, SyncStatsSnapshot};
