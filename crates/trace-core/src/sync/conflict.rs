//! Conflict detection and resolution.
//!
//! A conflict is opened when the remote rejects a write because its version
//! moved. Remote content is only surfaced after it decrypts with the active
//! key; otherwise the conflict stays blocked until the diary is unlocked.

use super::engine::SyncEngine;
use super::fingerprint::{record_fingerprint, same_content};
use super::{commit_message, PushOutcome};
use crate::crypto::{decrypt, encrypt, DataKey};
use crate::models::{DiaryRecord, EntryId};
use crate::remote::{ContentsApi, PutRequest};
use crate::util::now_ms;
use crate::{Error, Result};

/// Both sides of a diverged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictState {
    pub entry_id: EntryId,
    pub local_content: String,
    /// `None` while the remote copy could not be decrypted.
    pub remote_content: Option<String>,
    /// Remote version the resolution will write against.
    pub remote_sha: String,
    /// Editable merge text, seeded with the remote content.
    pub merge_buffer: String,
}

impl ConflictState {
    pub(crate) fn new(
        local: &DiaryRecord,
        remote_content: Option<String>,
        remote_sha: String,
    ) -> Self {
        Self {
            entry_id: local.id,
            local_content: local.content.clone(),
            merge_buffer: remote_content.clone().unwrap_or_default(),
            remote_content,
            remote_sha,
        }
    }

    pub const fn is_blocked(&self) -> bool {
        self.remote_content.is_none()
    }
}

/// How to settle a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Re-push the local draft over the fetched remote version.
    KeepLocal,
    /// Replace the local copy with the fetched remote content.
    KeepRemote,
    /// Push the given text as the new content of both sides.
    Merge(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The remote accepted the resolved content at `sha`.
    Pushed { sha: String, metadata_synced: bool },
    /// Local content now equals the remote copy.
    TookRemote,
    Busy,
    /// Another writer moved the remote again during resolution.
    Conflict(Box<ConflictState>),
}

impl<R: ContentsApi> SyncEngine<R> {
    /// Fetch the remote copy after a rejected write and decide what it means.
    ///
    /// Identical content adopts the remote sha as the new baseline; a missing
    /// file is recreated once; anything else opens a conflict.
    pub(crate) async fn detect_conflict(
        &self,
        record: &DiaryRecord,
        key: &DataKey,
    ) -> Result<PushOutcome> {
        let path = record.filename();
        let Some(file) = self.fetch(&path).await? else {
            tracing::info!("Remote copy of {} vanished; recreating it", record.id);
            let request = PutRequest {
                path,
                content: encrypt(&record.content, key)?,
                message: commit_message(&record.id),
                sha: None,
            };
            let sha = self.put(request).await?;
            return self
                .complete_push(record, &record_fingerprint(record), sha, key)
                .await;
        };

        let Ok(remote_content) = decrypt(&file.content, key) else {
            tracing::warn!("Remote copy of {} does not decrypt; conflict blocked", record.id);
            return Ok(PushOutcome::Conflict(Box::new(ConflictState::new(
                record, None, file.sha,
            ))));
        };

        if same_content(&record.content, &remote_content) {
            tracing::info!("Remote copy of {} already matches; adopting {}", record.id, file.sha);
            return self
                .complete_push(record, &record_fingerprint(record), file.sha, key)
                .await;
        }

        Ok(PushOutcome::Conflict(Box::new(ConflictState::new(
            record,
            Some(remote_content),
            file.sha,
        ))))
    }

    /// Re-detect the conflict for `id` from the current local and remote
    /// copies. `None` when the two sides agree or the remote has no copy.
    pub async fn conflict_for(&self, id: &EntryId) -> Result<Option<ConflictState>> {
        let key = self.key()?;
        let local = self
            .store()
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("diary {id}")))?;
        let Some(file) = self.fetch(&id.remote_path()).await? else {
            return Ok(None);
        };
        let remote_content = decrypt(&file.content, &key).ok();
        if remote_content
            .as_deref()
            .is_some_and(|remote| same_content(&local.content, remote))
        {
            return Ok(None);
        }
        Ok(Some(ConflictState::new(&local, remote_content, file.sha)))
    }

    /// Apply a resolution. A race with another remote write re-opens the
    /// conflict instead of failing.
    pub async fn resolve(
        &self,
        conflict: &ConflictState,
        resolution: Resolution,
    ) -> Result<ResolveOutcome> {
        let key = self.key()?;
        let Some(remote_content) = conflict.remote_content.as_deref() else {
            return Err(Error::Auth(
                "Conflict is blocked until the master password is re-entered".to_string(),
            ));
        };
        if let Resolution::Merge(text) = &resolution {
            if text.trim().is_empty() {
                return Err(Error::Validation("Merged text must not be empty".to_string()));
            }
        }
        let id = conflict.entry_id;

        let Some(_guard) = self.begin(id) else {
            return Ok(ResolveOutcome::Busy);
        };

        let result = match resolution {
            Resolution::KeepRemote => self.keep_remote(conflict, remote_content).await,
            Resolution::KeepLocal => {
                let record = match self.store().get(&id).await? {
                    Some(record) => record,
                    None => {
                        self.store()
                            .set_content(&id, &conflict.local_content)
                            .await?
                    }
                };
                self.push_resolution(&record, &conflict.remote_sha, &key).await
            }
            Resolution::Merge(text) => {
                let record = self.store().set_content(&id, &text).await?;
                self.push_resolution(&record, &conflict.remote_sha, &key).await
            }
        };
        self.report(&id, &result, |outcome| {
            matches!(outcome, ResolveOutcome::Conflict(_))
        });
        result
    }

    async fn keep_remote(
        &self,
        conflict: &ConflictState,
        remote_content: &str,
    ) -> Result<ResolveOutcome> {
        let id = conflict.entry_id;
        let record = match self.store().get(&id).await? {
            Some(record) if record.content == remote_content => record,
            _ => self.store().set_content(&id, remote_content).await?,
        };
        self.save_pulled_baseline(&record, &conflict.remote_sha).await?;
        self.mark_success(now_ms()).await?;
        tracing::info!("Kept remote copy of {id}");
        Ok(ResolveOutcome::TookRemote)
    }

    /// Single write against the fetched remote sha.
    async fn push_resolution(
        &self,
        record: &DiaryRecord,
        remote_sha: &str,
        key: &DataKey,
    ) -> Result<ResolveOutcome> {
        let request = PutRequest {
            path: record.filename(),
            content: encrypt(&record.content, key)?,
            message: commit_message(&record.id),
            sha: Some(remote_sha.to_string()),
        };
        match self.put(request).await {
            Ok(sha) => {
                let outcome = self
                    .complete_push(record, &record_fingerprint(record), sha, key)
                    .await?;
                Ok(into_resolve_outcome(outcome))
            }
            Err(Error::Conflict(message)) => {
                tracing::info!("Resolution of {} raced another write: {message}", record.id);
                let outcome = self.detect_conflict(record, key).await?;
                Ok(into_resolve_outcome(outcome))
            }
            Err(error) => Err(error),
        }
    }
}

fn into_resolve_outcome(outcome: PushOutcome) -> ResolveOutcome {
    match outcome {
        PushOutcome::Pushed {
            sha,
            metadata_synced,
        } => ResolveOutcome::Pushed {
            sha,
            metadata_synced,
        },
        PushOutcome::Conflict(state) => ResolveOutcome::Conflict(state),
        PushOutcome::Busy => ResolveOutcome::Busy,
        PushOutcome::NothingToSync | PushOutcome::UpToDate => ResolveOutcome::TookRemote,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SyncOptions;
    use crate::remote::MemoryContents;
    use crate::services::LocalStore;
    use crate::state::SyncStatus;
    use pretty_assertions::assert_eq;

    const PATH: &str = "2024-06-01.md.enc";

    fn key() -> DataKey {
        DataKey::from_bytes([4u8; 32])
    }

    fn id() -> EntryId {
        EntryId::daily("2024-06-01").unwrap()
    }

    async fn diverged() -> (SyncEngine<MemoryContents>, MemoryContents, ConflictState) {
        let remote = MemoryContents::new();
        let store = LocalStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::new(
            Arc::new(remote.clone()),
            store,
            Arc::new(key()),
            SyncOptions::default(),
        )
        .await
        .unwrap();

        engine.store().set_content(&id(), "base").await.unwrap();
        engine.push(&id()).await.unwrap();
        engine.store().set_content(&id(), "local A").await.unwrap();
        remote.insert_file(PATH, encrypt("remote B", &key()).unwrap());

        let PushOutcome::Conflict(conflict) = engine.push(&id()).await.unwrap() else {
            panic!("expected a conflict");
        };
        (engine, remote, *conflict)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflict_exposes_both_sides() {
        let (engine, remote, conflict) = diverged().await;
        assert_eq!(conflict.local_content, "local A");
        assert_eq!(conflict.remote_content.as_deref(), Some("remote B"));
        assert_eq!(conflict.merge_buffer, "remote B");
        assert_eq!(conflict.remote_sha, remote.file(PATH).unwrap().sha);
        assert_eq!(engine.snapshot().status, SyncStatus::Conflict);

        let redetected = engine.conflict_for(&id()).await.unwrap().unwrap();
        assert_eq!(redetected, conflict);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_local_overwrites_remote() {
        let (engine, remote, conflict) = diverged().await;
        let outcome = engine.resolve(&conflict, Resolution::KeepLocal).await.unwrap();
        let ResolveOutcome::Pushed { sha, .. } = outcome else {
            panic!("expected a push, got {outcome:?}");
        };
        let file = remote.file(PATH).unwrap();
        assert_eq!(file.sha, sha);
        assert_eq!(decrypt(&file.content, &key()).unwrap(), "local A");
        assert_eq!(engine.snapshot().status, SyncStatus::Success);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_remote_is_idempotent() {
        let (engine, remote, conflict) = diverged().await;
        let puts = remote.total_puts();

        for _ in 0..2 {
            assert_eq!(
                engine.resolve(&conflict, Resolution::KeepRemote).await.unwrap(),
                ResolveOutcome::TookRemote
            );
            let local = engine.store().get(&id()).await.unwrap().unwrap();
            assert_eq!(local.content, "remote B");
        }
        assert_eq!(remote.total_puts(), puts);

        let baseline = engine.store().baseline(&id()).await.unwrap().unwrap();
        assert_eq!(baseline.remote_sha.as_deref(), Some(conflict.remote_sha.as_str()));
        assert_eq!(engine.push(&id()).await.unwrap(), PushOutcome::UpToDate);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn racing_resolution_reopens_conflict() {
        let (engine, remote, conflict) = diverged().await;
        remote.insert_file(PATH, encrypt("remote C", &key()).unwrap());

        let outcome = engine
            .resolve(&conflict, Resolution::Merge("A+B".to_string()))
            .await
            .unwrap();
        let ResolveOutcome::Conflict(next) = outcome else {
            panic!("expected a new conflict, got {outcome:?}");
        };
        assert_eq!(next.local_content, "A+B");
        assert_eq!(next.remote_content.as_deref(), Some("remote C"));
        assert_ne!(next.remote_sha, conflict.remote_sha);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undecryptable_remote_blocks_resolution() {
        let (engine, remote, _) = diverged().await;
        let foreign = DataKey::from_bytes([8u8; 32]);
        remote.insert_file(PATH, encrypt("someone else", &foreign).unwrap());

        let conflict = engine.conflict_for(&id()).await.unwrap().unwrap();
        assert!(conflict.is_blocked());
        assert_eq!(conflict.merge_buffer, "");
        assert!(matches!(
            engine.resolve(&conflict, Resolution::KeepLocal).await,
            Err(Error::Auth(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_merge_is_rejected() {
        let (engine, _, conflict) = diverged().await;
        assert!(matches!(
            engine
                .resolve(&conflict, Resolution::Merge("  ".to_string()))
                .await,
            Err(Error::Validation(_))
        ));
        assert!(!engine.is_in_flight(&id()));
    }
}
