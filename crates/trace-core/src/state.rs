//! Shared sync state types published to interfaces.

use serde::Serialize;

/// Outward-facing status of the sync engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
    Conflict,
}

/// Snapshot of the sync engine published on every status change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncSnapshot {
    pub status: SyncStatus,
    /// Unix ms of the last successful sync; survives later failures.
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
    /// Entry ids with a network commit currently in flight.
    pub in_flight: Vec<String>,
}

impl SyncSnapshot {
    pub fn is_busy(&self) -> bool {
        !self.in_flight.is_empty()
    }
}
