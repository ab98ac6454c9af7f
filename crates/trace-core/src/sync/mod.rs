//! Sync engine: reconciles local entries with their encrypted remote files.
//!
//! Every network attempt is bounded by [`SyncOptions::timeout`] and at most
//! one commit per entry is in flight; a second request for a busy entry gets
//! a `Busy` outcome instead of queuing.
//!
//! [`SyncOptions::timeout`]: crate::config::SyncOptions

mod auto;
mod bulk;
mod conflict;
mod engine;
mod fingerprint;
mod metadata;

pub use auto::{AutoSync, AutoSyncOutcome};
pub use bulk::{BulkItem, BulkItemStatus, BulkPullSummary, BulkPushSummary, FailedItem};
pub use conflict::{ConflictState, Resolution, ResolveOutcome};
pub use engine::SyncEngine;
pub use fingerprint::{fingerprint, record_fingerprint, same_content};
pub use metadata::METADATA_PATH;

use chrono::{SecondsFormat, Utc};

use crate::models::EntryId;

/// Result of pushing one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Content is blank; no network call was made.
    NothingToSync,
    /// Content matches the baseline already on the remote.
    UpToDate,
    /// A commit for this entry is already in flight.
    Busy,
    /// The remote now holds this content at `sha`.
    Pushed { sha: String, metadata_synced: bool },
    /// The remote moved since the baseline.
    Conflict(Box<ConflictState>),
}

/// Result of pulling one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    NotFound,
    UpToDate,
    /// Local content was replaced with the remote version.
    Updated,
    /// The entry did not exist locally and was created.
    Inserted,
    Busy,
    /// Local content changed since the baseline; nothing was overwritten.
    Conflict(Box<ConflictState>),
}

pub(crate) fn commit_message(id: &EntryId) -> String {
    let stamp = commit_timestamp();
    match id {
        EntryId::Daily(_) => format!("chore: diary {} @ {stamp}", id.date()),
        EntryId::Summary(year) => format!("chore: yearly summary {year} @ {stamp}"),
    }
}

pub(crate) fn metadata_commit_message() -> String {
    format!("chore: metadata @ {}", commit_timestamp())
}

fn commit_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_messages_name_the_entry() {
        let daily = commit_message(&EntryId::daily("2024-03-05").unwrap());
        assert!(daily.starts_with("chore: diary 2024-03-05 @ "));
        assert!(daily.ends_with('Z'));

        let summary = commit_message(&EntryId::Summary(2023));
        assert!(summary.starts_with("chore: yearly summary 2023 @ "));

        assert!(metadata_commit_message().starts_with("chore: metadata @ "));
    }
}
