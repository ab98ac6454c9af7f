//! Sync baseline model

use serde::{Deserialize, Serialize};

use super::EntryId;

pub const SYNC_BASELINE_KEY_PREFIX: &str = "sync-baseline:";

/// Last state both sides agreed on for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBaseline {
    pub entry_id: EntryId,
    pub fingerprint: String,
    /// Unix ms of the push or pull that established this baseline
    pub synced_at: i64,
    /// Version token the remote reported at `synced_at`
    pub remote_sha: Option<String>,
}

impl SyncBaseline {
    pub fn storage_key(entry_id: &EntryId) -> String {
        format!("{SYNC_BASELINE_KEY_PREFIX}{entry_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_uses_prefix() {
        let id = EntryId::daily("2024-01-01").unwrap();
        assert_eq!(
            SyncBaseline::storage_key(&id),
            "sync-baseline:daily:2024-01-01"
        );
    }
}
