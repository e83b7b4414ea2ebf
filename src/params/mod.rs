//! # Parameter Module
//!
//! Vehicle parameter catalog, loss-tolerant download and confirmed writes.

pub mod sync;
pub mod table;
pub mod write;

pub use sync::{ParamLedger, ParamSync, SyncCommand, SyncSummary};
pub use table::{ParamEntry, ParamTable, ParamType};
pub use write::PendingWrite;

use serde::Serialize;

/// Outcome of a bulk write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Confirmed by echo
    pub success: usize,
    /// Never confirmed
    pub failed: usize,
    /// Not in the vehicle's catalog; never sent
    pub skipped: usize,
}
