//! Debounced auto-sync with per-entry schedule tickets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::engine::SyncEngine;
use super::PushOutcome;
use crate::models::EntryId;
use crate::remote::ContentsApi;

/// What a scheduled auto-sync ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSyncOutcome {
    /// A newer edit rescheduled the push before the timer fired.
    Superseded,
    /// A push for the entry was already in flight.
    Busy,
    Completed(PushOutcome),
    /// The push failed; it is not retried until the next edit or manual sync.
    Failed(String),
}

/// Latest schedule ticket per entry. Tickets come from one counter so an
/// entry that is forgotten and scheduled again never reuses an old ticket.
#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    latest: HashMap<EntryId, u64>,
}

/// Schedules a push a quiet period after the latest edit of each entry.
pub struct AutoSync<R: ContentsApi> {
    engine: SyncEngine<R>,
    debounce: Duration,
    tickets: Arc<Mutex<Tickets>>,
}

impl<R: ContentsApi> Clone for AutoSync<R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            debounce: self.debounce,
            tickets: Arc::clone(&self.tickets),
        }
    }
}

impl<R: ContentsApi> AutoSync<R> {
    pub fn new(engine: SyncEngine<R>) -> Self {
        let debounce = engine.options().debounce;
        Self {
            engine,
            debounce,
            tickets: Arc::new(Mutex::new(Tickets::default())),
        }
    }

    pub const fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    fn tickets(&self) -> MutexGuard<'_, Tickets> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self, id: EntryId) -> u64 {
        let mut tickets = self.tickets();
        tickets.next += 1;
        let ticket = tickets.next;
        tickets.latest.insert(id, ticket);
        ticket
    }

    fn is_current(&self, id: &EntryId, ticket: u64) -> bool {
        self.tickets().latest.get(id) == Some(&ticket)
    }

    /// Drop the entry once its latest scheduled run is done.
    fn finish(&self, id: &EntryId, ticket: u64) {
        let mut tickets = self.tickets();
        if tickets.latest.get(id) == Some(&ticket) {
            tickets.latest.remove(id);
        }
    }

    /// Entries with a pending or running auto-sync.
    pub fn pending(&self) -> usize {
        self.tickets().latest.len()
    }

    /// Call after every local edit. Restarts the entry's quiet period.
    pub fn schedule(&self, id: EntryId) -> JoinHandle<AutoSyncOutcome> {
        let ticket = self.bump(id);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            if !this.is_current(&id, ticket) {
                return AutoSyncOutcome::Superseded;
            }
            let outcome = this.run(&id).await;
            this.finish(&id, ticket);
            outcome
        })
    }

    /// Manual sync: cancel any pending timer for the entry and push now.
    pub async fn sync_now(&self, id: EntryId) -> AutoSyncOutcome {
        let ticket = self.bump(id);
        let outcome = self.run(&id).await;
        self.finish(&id, ticket);
        outcome
    }

    async fn run(&self, id: &EntryId) -> AutoSyncOutcome {
        match self.engine.push(id).await {
            Ok(PushOutcome::Busy) => {
                tracing::debug!("Auto-sync for {id} coalesced; upload in progress");
                AutoSyncOutcome::Busy
            }
            Ok(outcome) => AutoSyncOutcome::Completed(outcome),
            Err(error) => {
                tracing::warn!("Auto-sync for {id} failed: {error}");
                AutoSyncOutcome::Failed(error.to_string())
            }
        }
    }
}
