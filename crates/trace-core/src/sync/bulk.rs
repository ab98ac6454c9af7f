//! Whole-diary push and pull. One entry's failure never aborts the batch.

use serde::Serialize;

use super::engine::SyncEngine;
use super::fingerprint::record_fingerprint;
use super::{PushOutcome, METADATA_PATH};
use crate::crypto::{decrypt, DataKey};
use crate::models::{DiaryRecord, EntryId, MetadataEntry, SyncBaseline};
use crate::remote::ContentsApi;
use crate::util::now_ms;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkItemStatus {
    Pushed,
    UpToDate,
    Skipped,
    Conflicted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItem {
    pub entry_id: String,
    pub status: BulkItemStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkPushSummary {
    pub total: usize,
    pub pushed: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub conflicted: usize,
    pub failed: usize,
    pub items: Vec<BulkItem>,
}

impl BulkPushSummary {
    fn record(&mut self, id: &EntryId, status: BulkItemStatus, reason: Option<String>) {
        match status {
            BulkItemStatus::Pushed => self.pushed += 1,
            BulkItemStatus::UpToDate => self.up_to_date += 1,
            BulkItemStatus::Skipped => self.skipped += 1,
            BulkItemStatus::Conflicted => self.conflicted += 1,
            BulkItemStatus::Failed => self.failed += 1,
        }
        self.items.push(BulkItem {
            entry_id: id.to_string(),
            status,
            reason,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub entry_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkPullSummary {
    /// Entries listed in the remote index.
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub conflicted: usize,
    pub failed: usize,
    /// Files fetched and decrypted.
    pub downloaded: usize,
    pub conflicts: Vec<String>,
    pub failed_items: Vec<FailedItem>,
    /// The remote has no metadata index yet.
    pub metadata_missing: bool,
}

impl BulkPullSummary {
    fn fail(&mut self, entry_id: impl Into<String>, reason: impl Into<String>) {
        self.failed += 1;
        self.failed_items.push(FailedItem {
            entry_id: entry_id.into(),
            reason: reason.into(),
        });
    }
}

enum PullItem {
    Inserted,
    Updated,
    Skipped,
    Conflicted,
}

impl<R: ContentsApi> SyncEngine<R> {
    /// Push every local entry.
    pub async fn push_all(&self) -> Result<BulkPushSummary> {
        self.key()?;
        let records = self.store().list_all().await?;
        let mut summary = BulkPushSummary {
            total: records.len(),
            ..BulkPushSummary::default()
        };

        for record in records {
            let id = record.id;
            match self.push(&id).await {
                Ok(PushOutcome::Pushed { .. }) => {
                    summary.record(&id, BulkItemStatus::Pushed, None);
                }
                Ok(PushOutcome::UpToDate) => {
                    summary.record(&id, BulkItemStatus::UpToDate, None);
                }
                Ok(PushOutcome::NothingToSync) => {
                    summary.record(&id, BulkItemStatus::Skipped, Some("empty".to_string()));
                }
                Ok(PushOutcome::Busy) => {
                    summary.record(
                        &id,
                        BulkItemStatus::Skipped,
                        Some("already uploading".to_string()),
                    );
                }
                Ok(PushOutcome::Conflict(_)) => {
                    summary.record(&id, BulkItemStatus::Conflicted, None);
                }
                Err(error) if error.is_storage() => return Err(error),
                Err(error) => {
                    summary.record(&id, BulkItemStatus::Failed, Some(error.to_string()));
                }
            }
        }

        tracing::info!(
            total = summary.total,
            pushed = summary.pushed,
            failed = summary.failed,
            "Bulk push finished"
        );
        Ok(summary)
    }

    /// Pull every entry listed in the remote metadata index.
    ///
    /// Local records at least as new as the index entry are skipped; locally
    /// edited records are reported as conflicts and left untouched.
    pub async fn pull_all(&self) -> Result<BulkPullSummary> {
        let key = self.key()?;
        let Some((metadata, _)) = self.read_metadata(&key).await? else {
            tracing::info!("No {METADATA_PATH} on the remote; nothing to pull");
            return Ok(BulkPullSummary {
                metadata_missing: true,
                ..BulkPullSummary::default()
            });
        };
        self.store().save_cached_metadata(&metadata).await?;

        let mut summary = BulkPullSummary {
            total: metadata.entries.len(),
            ..BulkPullSummary::default()
        };
        for entry in &metadata.entries {
            let Some(id) = entry.entry_id() else {
                tracing::warn!("Skipping malformed index entry {}", entry.filename);
                summary.fail(entry.filename.clone(), "malformed index entry");
                continue;
            };
            let Some(_guard) = self.begin(id) else {
                summary.skipped += 1;
                continue;
            };

            match self.pull_listed(&id, entry, &key).await {
                Ok(PullItem::Inserted) => {
                    summary.inserted += 1;
                    summary.downloaded += 1;
                }
                Ok(PullItem::Updated) => {
                    summary.updated += 1;
                    summary.downloaded += 1;
                }
                Ok(PullItem::Skipped) => summary.skipped += 1,
                Ok(PullItem::Conflicted) => {
                    summary.conflicted += 1;
                    summary.conflicts.push(id.to_string());
                }
                Err(error) if error.is_storage() => return Err(error),
                Err(error) => summary.fail(id.to_string(), error.to_string()),
            }
        }

        if summary.failed == 0 {
            self.mark_success(now_ms()).await?;
        } else {
            self.mark_error(&Error::Network(format!(
                "{} of {} entries failed to download",
                summary.failed, summary.total
            )));
        }
        tracing::info!(
            total = summary.total,
            downloaded = summary.downloaded,
            conflicted = summary.conflicted,
            failed = summary.failed,
            "Bulk pull finished"
        );
        Ok(summary)
    }

    async fn pull_listed(
        &self,
        id: &EntryId,
        entry: &MetadataEntry,
        key: &DataKey,
    ) -> Result<PullItem> {
        let remote_modified = entry.modified_at_ms();
        let local = self.store().get(id).await?;

        if let Some(local) = &local {
            if remote_modified <= local.modified_at {
                return Ok(PullItem::Skipped);
            }
            let baseline = self.store().baseline(id).await?;
            let dirty = baseline.is_none_or(|baseline| {
                local.modified_at > baseline.synced_at
                    || record_fingerprint(local) != baseline.fingerprint
            });
            if dirty {
                tracing::info!("Not overwriting locally edited {id}");
                return Ok(PullItem::Conflicted);
            }
        }

        let file = self
            .fetch(&id.remote_path())
            .await?
            .filter(|file| !file.content.trim().is_empty())
            .ok_or_else(|| Error::NotFound(format!("remote file {}", id.remote_path())))?;
        let content = decrypt(&file.content, key)
            .map_err(|_| Error::Auth(format!("{} does not decrypt with this key", id.remote_path())))?;

        let (record, outcome) = match local {
            Some(mut record) => {
                record.set_content(content, remote_modified);
                (record, PullItem::Updated)
            }
            None => {
                let mut record = DiaryRecord::new(*id, content, remote_modified);
                record.created_at = entry.created_at.timestamp_millis().min(remote_modified);
                (record, PullItem::Inserted)
            }
        };
        self.store().put(&record).await?;
        self.store()
            .save_baseline(&SyncBaseline {
                entry_id: *id,
                fingerprint: record_fingerprint(&record),
                synced_at: remote_modified,
                remote_sha: Some(file.sha),
            })
            .await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SyncOptions;
    use crate::crypto::encrypt;
    use crate::models::Metadata;
    use crate::remote::{InjectedFailure, MemoryContents};
    use crate::services::LocalStore;
    use crate::state::SyncStatus;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn key() -> DataKey {
        DataKey::from_bytes([5u8; 32])
    }

    fn day(date: &str) -> EntryId {
        EntryId::daily(date).unwrap()
    }

    async fn engine(remote: &MemoryContents) -> SyncEngine<MemoryContents> {
        let store = LocalStore::open_in_memory().await.unwrap();
        SyncEngine::new(
            Arc::new(remote.clone()),
            store,
            Arc::new(key()),
            SyncOptions::default(),
        )
        .await
        .unwrap()
    }

    /// Seed the remote as another device would: files plus an index.
    fn seed(remote: &MemoryContents, entries: &[(&str, &str, i64)]) {
        let mut metadata = Metadata::empty(Utc::now());
        for (date, content, modified_at) in entries {
            let record = DiaryRecord::new(day(date), *content, *modified_at);
            metadata.upsert(&record, Utc::now());
            remote.insert_file(&record.filename(), encrypt(content, &key()).unwrap());
        }
        let json = serde_json::to_string(&metadata).unwrap();
        remote.insert_file(METADATA_PATH, encrypt(&json, &key()).unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_all_records_each_entry() {
        let remote = MemoryContents::new();
        let engine = engine(&remote).await;
        engine.store().set_content(&day("2024-01-01"), "one").await.unwrap();
        engine.store().set_content(&day("2024-01-02"), "   ").await.unwrap();
        engine.store().set_content(&day("2024-01-03"), "three").await.unwrap();
        engine.push(&day("2024-01-03")).await.unwrap();
        engine.store().set_content(&day("2024-01-04"), "four").await.unwrap();
        remote.fail_next_put(InjectedFailure::Unauthorized);

        let summary = engine.push_all().await.unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.up_to_date, 1);
        assert_eq!(summary.pushed, 1);
        assert_eq!(summary.items[0].status, BulkItemStatus::Failed);
        assert_eq!(summary.items[3].status, BulkItemStatus::Pushed);
        assert!(remote.file("2024-01-04.md.enc").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_all_without_index() {
        let remote = MemoryContents::new();
        let engine = engine(&remote).await;
        let summary = engine.pull_all().await.unwrap();
        assert!(summary.metadata_missing);
        assert_eq!(summary.total, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_all_inserts_and_reports_failures() {
        let remote = MemoryContents::new();
        seed(
            &remote,
            &[
                ("2024-01-01", "one", 1_000),
                ("2024-01-02", "two", 2_000),
                ("2024-01-03", "three", 3_000),
            ],
        );
        remote.remove_file("2024-01-03.md.enc");
        let engine = engine(&remote).await;

        let summary = engine.pull_all().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_items[0].entry_id, "daily:2024-01-03");
        assert_eq!(engine.snapshot().status, SyncStatus::Error);

        let record = engine.store().get(&day("2024-01-02")).await.unwrap().unwrap();
        assert_eq!(record.content, "two");
        assert_eq!(record.modified_at, 2_000);

        let again = engine.pull_all().await.unwrap();
        assert_eq!(again.skipped, 2);
        assert_eq!(again.downloaded, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_all_counts_malformed_index_entries() {
        let remote = MemoryContents::new();
        seed(&remote, &[("2024-01-01", "one", 1_000)]);
        let raw = decrypt(&remote.file(METADATA_PATH).unwrap().content, &key()).unwrap();
        let mut metadata: Metadata = serde_json::from_str(&raw).unwrap();
        let mut broken = metadata.entries[0].clone();
        broken.date = "2023-02-30".to_string();
        broken.filename = "2023-02-30.md.enc".to_string();
        metadata.entries.push(broken);
        let json = serde_json::to_string(&metadata).unwrap();
        remote.insert_file(METADATA_PATH, encrypt(&json, &key()).unwrap());
        let engine = engine(&remote).await;

        let summary = engine.pull_all().await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.total,
            summary.inserted
                + summary.updated
                + summary.skipped
                + summary.conflicted
                + summary.failed
        );
        assert_eq!(summary.failed_items[0].entry_id, "2023-02-30.md.enc");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_all_never_overwrites_local_edits() {
        let remote = MemoryContents::new();
        seed(&remote, &[("2024-01-01", "v1", 1_000)]);
        let engine = engine(&remote).await;
        engine.pull_all().await.unwrap();

        let edited = engine
            .store()
            .set_content(&day("2024-01-01"), "edited offline")
            .await
            .unwrap();
        let newer = Utc.timestamp_millis_opt(edited.modified_at + 60_000).unwrap();
        let mut metadata = engine.store().cached_metadata().await.unwrap().unwrap();
        metadata.entries[0].modified_at = newer;
        let json = serde_json::to_string(&metadata).unwrap();
        remote.insert_file(METADATA_PATH, encrypt(&json, &key()).unwrap());
        remote.insert_file("2024-01-01.md.enc", encrypt("v2", &key()).unwrap());

        let summary = engine.pull_all().await.unwrap();
        assert_eq!(summary.conflicted, 1);
        assert_eq!(summary.conflicts, vec!["daily:2024-01-01".to_string()]);
        assert_eq!(
            engine.store().get(&day("2024-01-01")).await.unwrap().unwrap().content,
            "edited offline"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_all_updates_clean_records() {
        let remote = MemoryContents::new();
        seed(&remote, &[("2024-01-01", "v1", 1_000)]);
        let engine = engine(&remote).await;
        engine.pull_all().await.unwrap();

        seed(&remote, &[("2024-01-01", "v2", 5_000)]);
        let summary = engine.pull_all().await.unwrap();
        assert_eq!(summary.updated, 1);
        let record = engine.store().get(&day("2024-01-01")).await.unwrap().unwrap();
        assert_eq!(record.content, "v2");
        assert_eq!(record.modified_at, 5_000);
        assert_eq!(engine.snapshot().status, SyncStatus::Success);
    }
}
