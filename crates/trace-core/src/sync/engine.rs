//! Single-entry push/pull with single-flight and timeout guards.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use super::conflict::ConflictState;
use super::fingerprint::{record_fingerprint, same_content};
use super::{commit_message, PullOutcome, PushOutcome};
use crate::auth::KeyProvider;
use crate::config::SyncOptions;
use crate::crypto::{decrypt, encrypt, DataKey};
use crate::models::{DiaryRecord, EntryId, SyncBaseline};
use crate::remote::{ContentsApi, PutRequest, RemoteFile, RemoteResult};
use crate::services::LocalStore;
use crate::state::{SyncSnapshot, SyncStatus};
use crate::util::now_ms;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Flights {
    active: HashMap<EntryId, u64>,
    next_generation: u64,
}

/// Holds an entry's single-flight slot; released on drop.
pub(crate) struct FlightGuard {
    flights: Arc<Mutex<Flights>>,
    status: Arc<watch::Sender<SyncSnapshot>>,
    id: EntryId,
    generation: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights.active.get(&self.id) == Some(&self.generation) {
            flights.active.remove(&self.id);
        }
        let in_flight = in_flight_ids(&flights);
        drop(flights);
        self.status.send_modify(|snapshot| snapshot.in_flight = in_flight);
    }
}

fn in_flight_ids(flights: &Flights) -> Vec<String> {
    let mut ids: Vec<EntryId> = flights.active.keys().copied().collect();
    ids.sort();
    ids.iter().map(ToString::to_string).collect()
}

/// Reconciles local entries with the remote. Cheap to clone.
pub struct SyncEngine<R: ContentsApi> {
    remote: Arc<R>,
    store: LocalStore,
    keys: Arc<dyn KeyProvider>,
    options: SyncOptions,
    status: Arc<watch::Sender<SyncSnapshot>>,
    flights: Arc<Mutex<Flights>>,
}

impl<R: ContentsApi> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            store: self.store.clone(),
            keys: Arc::clone(&self.keys),
            options: self.options.clone(),
            status: Arc::clone(&self.status),
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<R: ContentsApi> SyncEngine<R> {
    /// Build an engine; the last successful sync time is restored from the store.
    pub async fn new(
        remote: Arc<R>,
        store: LocalStore,
        keys: Arc<dyn KeyProvider>,
        options: SyncOptions,
    ) -> Result<Self> {
        let snapshot = SyncSnapshot {
            last_synced_at: store.last_synced_at().await?,
            ..SyncSnapshot::default()
        };
        let (status, _) = watch::channel(snapshot);
        Ok(Self {
            remote,
            store,
            keys,
            options,
            status: Arc::new(status),
            flights: Arc::new(Mutex::new(Flights::default())),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.status.borrow().clone()
    }

    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn is_in_flight(&self, id: &EntryId) -> bool {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .contains_key(id)
    }

    pub(crate) fn key(&self) -> Result<DataKey> {
        self.keys
            .data_key()
            .ok_or_else(|| Error::Auth("Diary is locked; unlock to sync".to_string()))
    }

    /// Claim the entry's single-flight slot, or `None` when it is busy.
    pub(crate) fn begin(&self, id: EntryId) -> Option<FlightGuard> {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights.active.contains_key(&id) {
            return None;
        }
        flights.next_generation += 1;
        let generation = flights.next_generation;
        flights.active.insert(id, generation);
        let in_flight = in_flight_ids(&flights);
        drop(flights);

        self.status.send_modify(|snapshot| {
            snapshot.status = SyncStatus::Syncing;
            snapshot.in_flight = in_flight;
        });
        Some(FlightGuard {
            flights: Arc::clone(&self.flights),
            status: Arc::clone(&self.status),
            id,
            generation,
        })
    }

    /// Run a remote call on its own task, bounded by the sync timeout.
    ///
    /// On timeout the task is left to finish in the background and its result
    /// is dropped.
    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = RemoteResult<T>> + Send + 'static,
    {
        let handle = tokio::spawn(call);
        match tokio::time::timeout(self.options.timeout, handle).await {
            Ok(Ok(Err(error))) if error.is_unauthorized() => {
                self.keys.credentials_rejected();
                Err(error.into())
            }
            Ok(Ok(result)) => result.map_err(Error::from),
            Ok(Err(error)) => Err(Error::Network(format!("remote task failed: {error}"))),
            Err(_) => {
                tracing::warn!(
                    "Remote call exceeded {:?}; abandoning it",
                    self.options.timeout
                );
                Err(Error::Timeout(self.options.timeout))
            }
        }
    }

    pub(crate) async fn fetch(&self, path: &str) -> Result<Option<RemoteFile>> {
        let remote = Arc::clone(&self.remote);
        let path = path.to_string();
        self.bounded(async move { remote.get_file(&path).await })
            .await
    }

    pub(crate) async fn put(&self, request: PutRequest) -> Result<String> {
        let remote = Arc::clone(&self.remote);
        self.bounded(async move { remote.put_file(request).await })
            .await
    }

    pub(crate) fn mark_error(&self, error: &Error) {
        let message = error.to_string();
        tracing::warn!("Sync failed: {message}");
        self.status.send_modify(|snapshot| {
            snapshot.status = SyncStatus::Error;
            snapshot.last_error = Some(message);
        });
    }

    pub(crate) fn mark_conflict(&self, id: &EntryId) {
        tracing::info!("Sync conflict on {id}");
        self.status.send_modify(|snapshot| {
            snapshot.status = SyncStatus::Conflict;
            snapshot.last_error = Some(format!("Version conflict on {id}"));
        });
    }

    fn mark_idle(&self) {
        self.status.send_if_modified(|snapshot| {
            if snapshot.status == SyncStatus::Syncing {
                snapshot.status = SyncStatus::Idle;
                return true;
            }
            false
        });
    }

    /// Record a successful sync. `last_synced_at` only ever moves forward.
    pub(crate) async fn mark_success(&self, at_ms: i64) -> Result<()> {
        self.store.set_last_synced_at(at_ms).await?;
        self.status.send_modify(|snapshot| {
            snapshot.status = SyncStatus::Success;
            snapshot.last_error = None;
            let latest = snapshot.last_synced_at.map_or(at_ms, |prev| prev.max(at_ms));
            snapshot.last_synced_at = Some(latest);
        });
        Ok(())
    }

    /// Publish the outcome of a guarded operation.
    pub(crate) fn report<T>(
        &self,
        id: &EntryId,
        result: &Result<T>,
        is_conflict: impl Fn(&T) -> bool,
    ) {
        match result {
            Ok(value) if is_conflict(value) => self.mark_conflict(id),
            Ok(_) => {}
            Err(error) => self.mark_error(error),
        }
    }

    /// Push one entry. Manual syncs call this directly; auto-sync calls it
    /// after the debounce. Both share the same single-flight slot.
    pub async fn push(&self, id: &EntryId) -> Result<PushOutcome> {
        let key = self.key()?;
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("diary {id}")))?;
        if record.is_blank() {
            tracing::debug!("Nothing to sync for {id}");
            return Ok(PushOutcome::NothingToSync);
        }

        let fingerprint = record_fingerprint(&record);
        let baseline = self.store.baseline(id).await?;
        let synced = baseline.as_ref().is_some_and(|baseline| {
            baseline.fingerprint == fingerprint && baseline.remote_sha.is_some()
        });
        if synced {
            return Ok(PushOutcome::UpToDate);
        }

        let Some(_guard) = self.begin(*id) else {
            tracing::debug!("Push for {id} skipped; already uploading");
            return Ok(PushOutcome::Busy);
        };

        let expected_sha = baseline.and_then(|baseline| baseline.remote_sha);
        let result = self.commit(&record, &fingerprint, expected_sha, &key).await;
        self.report(id, &result, |outcome| {
            matches!(outcome, PushOutcome::Conflict(_))
        });
        result
    }

    async fn commit(
        &self,
        record: &DiaryRecord,
        fingerprint: &str,
        expected_sha: Option<String>,
        key: &DataKey,
    ) -> Result<PushOutcome> {
        let request = PutRequest {
            path: record.filename(),
            content: encrypt(&record.content, key)?,
            message: commit_message(&record.id),
            sha: expected_sha,
        };
        match self.put(request).await {
            Ok(sha) => self.complete_push(record, fingerprint, sha, key).await,
            Err(Error::Conflict(message)) => {
                tracing::info!("Push of {} rejected: {message}", record.id);
                self.detect_conflict(record, key).await
            }
            Err(error) => Err(error),
        }
    }

    /// Bookkeeping after the remote accepted `record` at `sha`: baseline,
    /// then the metadata index, then the last-sync time.
    pub(crate) async fn complete_push(
        &self,
        record: &DiaryRecord,
        fingerprint: &str,
        sha: String,
        key: &DataKey,
    ) -> Result<PushOutcome> {
        let now = now_ms();
        self.store
            .save_baseline(&SyncBaseline {
                entry_id: record.id,
                fingerprint: fingerprint.to_string(),
                synced_at: now,
                remote_sha: Some(sha.clone()),
            })
            .await?;

        let metadata_synced = match self.sync_metadata(record, key).await {
            Ok(()) => true,
            Err(error) if error.is_storage() => return Err(error),
            Err(error) => {
                tracing::warn!("Diary {} synced but metadata index was not: {error}", record.id);
                false
            }
        };

        self.mark_success(now).await?;
        tracing::info!("Pushed {} at {sha}", record.id);
        Ok(PushOutcome::Pushed {
            sha,
            metadata_synced,
        })
    }

    /// Pull one entry from the remote.
    pub async fn pull(&self, id: &EntryId) -> Result<PullOutcome> {
        let key = self.key()?;
        let Some(_guard) = self.begin(*id) else {
            return Ok(PullOutcome::Busy);
        };

        let result = self.pull_guarded(id, &key).await;
        self.report(id, &result, |outcome| {
            matches!(outcome, PullOutcome::Conflict(_))
        });
        match &result {
            Ok(PullOutcome::UpToDate | PullOutcome::Updated | PullOutcome::Inserted) => {
                self.mark_success(now_ms()).await?;
            }
            Ok(PullOutcome::NotFound) => self.mark_idle(),
            _ => {}
        }
        result
    }

    async fn pull_guarded(&self, id: &EntryId, key: &DataKey) -> Result<PullOutcome> {
        let Some(file) = self.fetch(&id.remote_path()).await? else {
            return Ok(PullOutcome::NotFound);
        };
        let baseline = self.store.baseline(id).await?;
        if baseline
            .as_ref()
            .and_then(|baseline| baseline.remote_sha.as_deref())
            == Some(file.sha.as_str())
        {
            return Ok(PullOutcome::UpToDate);
        }

        let remote_content = decrypt(&file.content, key).map_err(|_| {
            Error::Auth(format!("Remote copy of {id} does not decrypt with this key"))
        })?;

        let Some(local) = self.store.get(id).await? else {
            let record = DiaryRecord::new(*id, remote_content, now_ms());
            self.store.put(&record).await?;
            self.save_pulled_baseline(&record, &file.sha).await?;
            tracing::info!("Pulled new entry {id}");
            return Ok(PullOutcome::Inserted);
        };

        if same_content(&local.content, &remote_content) {
            self.save_pulled_baseline(&local, &file.sha).await?;
            return Ok(PullOutcome::UpToDate);
        }

        let clean = baseline.is_some_and(|baseline| baseline.fingerprint == record_fingerprint(&local));
        if !clean {
            return Ok(PullOutcome::Conflict(Box::new(ConflictState::new(
                &local,
                Some(remote_content),
                file.sha,
            ))));
        }

        let record = self.store.set_content(id, &remote_content).await?;
        self.save_pulled_baseline(&record, &file.sha).await?;
        tracing::info!("Pulled update for {id}");
        Ok(PullOutcome::Updated)
    }

    pub(crate) async fn save_pulled_baseline(&self, record: &DiaryRecord, sha: &str) -> Result<()> {
        self.store
            .save_baseline(&SyncBaseline {
                entry_id: record.id,
                fingerprint: record_fingerprint(record),
                synced_at: now_ms(),
                remote_sha: Some(sha.to_string()),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::remote::{InjectedFailure, MemoryContents};
    use pretty_assertions::assert_eq;

    fn key() -> DataKey {
        DataKey::from_bytes([7u8; 32])
    }

    fn day(date: &str) -> EntryId {
        EntryId::daily(date).unwrap()
    }

    async fn engine_with(options: SyncOptions) -> (SyncEngine<MemoryContents>, MemoryContents) {
        let remote = MemoryContents::new();
        let store = LocalStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::new(Arc::new(remote.clone()), store, Arc::new(key()), options)
            .await
            .unwrap();
        (engine, remote)
    }

    async fn engine() -> (SyncEngine<MemoryContents>, MemoryContents) {
        engine_with(SyncOptions::default()).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blank_entry_is_not_pushed() {
        let (engine, remote) = engine().await;
        let id = day("2024-01-01");
        engine.store().set_content(&id, "  \n ").await.unwrap();

        assert_eq!(engine.push(&id).await.unwrap(), PushOutcome::NothingToSync);
        assert_eq!(remote.total_puts(), 0);
        assert_eq!(engine.snapshot().status, SyncStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_creates_file_baseline_and_metadata() {
        let (engine, remote) = engine().await;
        let id = day("2024-01-01");
        engine.store().set_content(&id, "first entry").await.unwrap();

        let PushOutcome::Pushed {
            sha,
            metadata_synced,
        } = engine.push(&id).await.unwrap()
        else {
            panic!("expected a push");
        };
        assert!(metadata_synced);

        let file = remote.file("2024-01-01.md.enc").unwrap();
        assert_eq!(file.sha, sha);
        assert!(!file.content.contains("first entry"));
        assert_eq!(decrypt(&file.content, &key()).unwrap(), "first entry");

        let baseline = engine.store().baseline(&id).await.unwrap().unwrap();
        assert_eq!(baseline.remote_sha, Some(sha));
        assert!(remote.file(crate::sync::METADATA_PATH).is_some());

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, SyncStatus::Success);
        assert!(snapshot.last_synced_at.is_some());
        assert!(!snapshot.is_busy());

        assert_eq!(engine.push(&id).await.unwrap(), PushOutcome::UpToDate);
        assert_eq!(remote.put_count("2024-01-01.md.enc"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn locked_engine_refuses_to_push() {
        struct Locked;
        impl KeyProvider for Locked {
            fn data_key(&self) -> Option<DataKey> {
                None
            }
        }
        let store = LocalStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::new(
            Arc::new(MemoryContents::new()),
            store,
            Arc::new(Locked),
            SyncOptions::default(),
        )
        .await
        .unwrap();
        let id = day("2024-01-01");
        engine.store().set_content(&id, "text").await.unwrap();

        assert!(matches!(engine.push(&id).await, Err(Error::Auth(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn network_failure_keeps_last_synced_at() {
        let (engine, remote) = engine().await;
        let id = day("2024-01-01");
        engine.store().set_content(&id, "one").await.unwrap();
        engine.push(&id).await.unwrap();
        let synced_at = engine.snapshot().last_synced_at;

        engine.store().set_content(&id, "two").await.unwrap();
        remote.fail_next_put(InjectedFailure::Network);
        let error = engine.push(&id).await.unwrap_err();
        assert!(error.is_retryable());

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, SyncStatus::Error);
        assert_eq!(snapshot.last_synced_at, synced_at);
        assert!(!snapshot.is_busy());
        assert_eq!(engine.store().last_synced_at().await.unwrap(), synced_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_releases_the_slot() {
        let timeout = Duration::from_millis(100);
        let (engine, remote) = engine_with(SyncOptions::default().with_timeout(timeout)).await;
        let id = day("2024-01-01");
        engine.store().set_content(&id, "slow").await.unwrap();
        remote.set_put_delay(Some(Duration::from_secs(2)));

        let started = Instant::now();
        let error = engine.push(&id).await.unwrap_err();
        assert!(matches!(error, Error::Timeout(_)));
        assert!(started.elapsed() < timeout + Duration::from_millis(500));

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, SyncStatus::Error);
        assert!(snapshot.last_error.unwrap().contains("sync timeout"));
        assert!(!engine.is_in_flight(&id));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_completion_is_absorbed_on_next_push() {
        let timeout = Duration::from_millis(100);
        let (engine, remote) = engine_with(SyncOptions::default().with_timeout(timeout)).await;
        let id = day("2024-01-01");
        engine.store().set_content(&id, "slow").await.unwrap();
        remote.set_put_delay(Some(Duration::from_millis(300)));
        assert!(engine.push(&id).await.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        remote.set_put_delay(None);
        assert!(remote.file("2024-01-01.md.enc").is_some());

        let outcome = engine.push(&id).await.unwrap();
        assert!(matches!(outcome, PushOutcome::Pushed { .. }), "{outcome:?}");
        let baseline = engine.store().baseline(&id).await.unwrap().unwrap();
        assert_eq!(
            baseline.remote_sha,
            remote.file("2024-01-01.md.enc").map(|file| file.sha)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_inserts_updates_and_detects_divergence() {
        let (engine, remote) = engine().await;
        let id = day("2024-02-02");
        assert_eq!(engine.pull(&id).await.unwrap(), PullOutcome::NotFound);

        remote.insert_file("2024-02-02.md.enc", encrypt("from phone", &key()).unwrap());
        assert_eq!(engine.pull(&id).await.unwrap(), PullOutcome::Inserted);
        assert_eq!(
            engine.store().get(&id).await.unwrap().unwrap().content,
            "from phone"
        );
        assert_eq!(engine.pull(&id).await.unwrap(), PullOutcome::UpToDate);

        remote.insert_file("2024-02-02.md.enc", encrypt("edited on phone", &key()).unwrap());
        assert_eq!(engine.pull(&id).await.unwrap(), PullOutcome::Updated);
        assert_eq!(
            engine.store().get(&id).await.unwrap().unwrap().content,
            "edited on phone"
        );

        engine.store().set_content(&id, "edited here").await.unwrap();
        remote.insert_file("2024-02-02.md.enc", encrypt("edited there", &key()).unwrap());
        let PullOutcome::Conflict(conflict) = engine.pull(&id).await.unwrap() else {
            panic!("expected a conflict");
        };
        assert_eq!(conflict.local_content, "edited here");
        assert_eq!(conflict.remote_content.as_deref(), Some("edited there"));
        assert_eq!(
            engine.store().get(&id).await.unwrap().unwrap().content,
            "edited here"
        );
        assert_eq!(engine.snapshot().status, SyncStatus::Conflict);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_push_adopts_identical_remote() {
        let (engine, remote) = engine().await;
        let id = day("2024-03-03");
        let sha = remote.insert_file("2024-03-03.md.enc", encrypt("same text\n", &key()).unwrap());
        engine.store().set_content(&id, "same text  \r\n").await.unwrap();

        let outcome = engine.push(&id).await.unwrap();
        assert!(
            matches!(&outcome, PushOutcome::Pushed { sha: pushed, .. } if *pushed == sha),
            "{outcome:?}"
        );
        assert_eq!(remote.file("2024-03-03.md.enc").unwrap().sha, sha);
    }
}
