//! Shared local store used by the session and sync layers.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    Database, DiaryIndex, DiaryRepository, Direction, IndexQuery, KeyValueRepository, KvTable,
    LibSqlDiaryRepository, LibSqlKeyValueRepository,
};
use crate::models::{AppConfig, DiaryRecord, EntryId, LockState, Metadata, SyncBaseline};
use crate::util::now_ms;
use crate::Result;

const CONFIG_KEY: &str = "app";
const METADATA_KEY: &str = "metadata";
const LOCK_STATE_KEY: &str = "auth:lock-state";
const LAST_SYNCED_AT_KEY: &str = "sync:last-synced-at";

/// Thread-safe local store. Every write is durable before it returns.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!("Opening local store at {}", db_path.display());
        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&std::path::Path> {
        self.db_path.as_deref()
    }

    // -----------------------------------------------------------------------
    // Diaries
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: &EntryId) -> Result<Option<DiaryRecord>> {
        let db = self.db.lock().await;
        LibSqlDiaryRepository::new(db.connection()).get(id).await
    }

    pub async fn put(&self, record: &DiaryRecord) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlDiaryRepository::new(db.connection()).put(record).await
    }

    pub async fn list_by_index(
        &self,
        index: DiaryIndex,
        query: &IndexQuery,
        direction: Direction,
        limit: Option<usize>,
    ) -> Result<Vec<DiaryRecord>> {
        let db = self.db.lock().await;
        LibSqlDiaryRepository::new(db.connection())
            .list_by_index(index, query, direction, limit)
            .await
    }

    /// Every diary, ordered by date.
    pub async fn list_all(&self) -> Result<Vec<DiaryRecord>> {
        self.list_by_index(DiaryIndex::Date, &IndexQuery::All, Direction::Asc, None)
            .await
    }

    /// Write new content for an entry, creating it if needed.
    ///
    /// The lock is held across read and write so concurrent edits of the same
    /// entry apply in call order; the last write wins.
    pub async fn set_content(&self, id: &EntryId, content: &str) -> Result<DiaryRecord> {
        let db = self.db.lock().await;
        let repo = LibSqlDiaryRepository::new(db.connection());
        let now = now_ms();

        let record = match repo.get(id).await? {
            Some(mut record) => {
                record.set_content(content, now);
                record
            }
            None => DiaryRecord::new(*id, content, now),
        };
        repo.put(&record).await?;
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Config and lock state
    // -----------------------------------------------------------------------

    pub async fn load_config(&self) -> Result<Option<AppConfig>> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection(), KvTable::Config)
            .get_json(CONFIG_KEY)
            .await
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection(), KvTable::Config)
            .set_json(CONFIG_KEY, config)
            .await
    }

    /// Persisted lock state; a store without one is locked.
    pub async fn lock_state(&self) -> Result<LockState> {
        let db = self.db.lock().await;
        let state = LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata)
            .get_json(LOCK_STATE_KEY)
            .await?;
        Ok(state.unwrap_or(LockState::Locked))
    }

    pub async fn save_lock_state(&self, state: LockState) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata)
            .set_json(LOCK_STATE_KEY, &state)
            .await
    }

    // -----------------------------------------------------------------------
    // Sync bookkeeping
    // -----------------------------------------------------------------------

    pub async fn baseline(&self, id: &EntryId) -> Result<Option<SyncBaseline>> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata)
            .get_json(&SyncBaseline::storage_key(id))
            .await
    }

    pub async fn save_baseline(&self, baseline: &SyncBaseline) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata)
            .set_json(&SyncBaseline::storage_key(&baseline.entry_id), baseline)
            .await
    }

    pub async fn last_synced_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata)
            .get_json(LAST_SYNCED_AT_KEY)
            .await
    }

    pub async fn set_last_synced_at(&self, at_ms: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata)
            .set_json(LAST_SYNCED_AT_KEY, &at_ms)
            .await
    }

    /// Plaintext copy of the last remote metadata index seen.
    pub async fn cached_metadata(&self) -> Result<Option<Metadata>> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata)
            .get_json(METADATA_KEY)
            .await
    }

    pub async fn save_cached_metadata(&self, metadata: &Metadata) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata)
            .set_json(METADATA_KEY, metadata)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::models::ms_to_datetime;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn day(date: &str) -> EntryId {
        EntryId::daily(date).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_content_is_readable_immediately() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let id = day("2024-06-01");

        for content in ["first", "", "第三版\n多行"] {
            store.set_content(&id, content).await.unwrap();
            let loaded = store.get(&id).await.unwrap().unwrap();
            assert_eq!(loaded.content, content);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_content_keeps_created_at() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let id = day("2024-06-01");

        let first = store.set_content(&id, "a").await.unwrap();
        let second = store.set_content(&id, "ab").await.unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert!(second.modified_at >= first.modified_at);
        assert_eq!(second.word_count, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_edits_are_last_write_wins() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let id = day("2024-06-02");

        let mut handles = Vec::new();
        for n in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set_content(&id, &format!("v{n}")).await.unwrap()
            }));
        }
        let mut last_written = Vec::new();
        for handle in handles {
            last_written.push(handle.await.unwrap());
        }

        let stored = store.get(&id).await.unwrap().unwrap();
        let newest = last_written
            .iter()
            .max_by_key(|record| record.modified_at)
            .unwrap();
        assert_eq!(stored.modified_at, newest.modified_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn config_and_lock_state_roundtrip() {
        let store = LocalStore::open_in_memory().await.unwrap();
        assert!(store.load_config().await.unwrap().is_none());
        assert_eq!(store.lock_state().await.unwrap(), LockState::Locked);

        let config = AppConfig {
            owner: "alice".to_string(),
            repo: "diary".to_string(),
            branch: "master".to_string(),
            kdf_params: KdfParams::generate(1_000),
            encrypted_token: Some("ct".to_string()),
            token_cipher_version: 1,
            password_hash: "h".to_string(),
            password_expiry: 42,
        };
        store.save_config(&config).await.unwrap();
        store
            .save_lock_state(LockState::Unlocked { expires_at: 42 })
            .await
            .unwrap();

        assert_eq!(store.load_config().await.unwrap(), Some(config));
        assert_eq!(
            store.lock_state().await.unwrap(),
            LockState::Unlocked { expires_at: 42 }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn baselines_and_sync_bookkeeping() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let id = day("2024-06-03");
        assert!(store.baseline(&id).await.unwrap().is_none());

        let baseline = SyncBaseline {
            entry_id: id,
            fingerprint: "v1:00000000:0".to_string(),
            synced_at: 5,
            remote_sha: Some("sha-1".to_string()),
        };
        store.save_baseline(&baseline).await.unwrap();
        assert_eq!(store.baseline(&id).await.unwrap(), Some(baseline));

        store.set_last_synced_at(99).await.unwrap();
        assert_eq!(store.last_synced_at().await.unwrap(), Some(99));

        let metadata = Metadata::empty(ms_to_datetime(0).unwrap());
        store.save_cached_metadata(&metadata).await.unwrap();
        assert_eq!(store.cached_metadata().await.unwrap(), Some(metadata));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn on_disk_store_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("trace.db");
        let id = day("2024-06-04");

        {
            let store = LocalStore::open_path(&path).await.unwrap();
            store.set_content(&id, "persisted").await.unwrap();
            store.set_last_synced_at(7).await.unwrap();
        }

        let store = LocalStore::open_path(&path).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().unwrap().content, "persisted");
        assert_eq!(store.last_synced_at().await.unwrap(), Some(7));
    }
}
