//! Remote metadata index model.
//!
//! The index mirrors every entry that has ever been pushed and is stored
//! remotely as a single encrypted JSON document with camelCase keys.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{DiaryRecord, EntryId, EntryKind};

pub const METADATA_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub version: String,
    pub last_sync: DateTime<Utc>,
    pub entries: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub filename: String,
    pub word_count: u32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl MetadataEntry {
    /// Entry id, or `None` when the entry is inconsistent.
    pub fn entry_id(&self) -> Option<EntryId> {
        match self.kind {
            EntryKind::Daily => EntryId::daily(&self.date).ok(),
            EntryKind::YearlySummary => self.year.and_then(|year| EntryId::summary(year).ok()),
        }
    }

    pub fn modified_at_ms(&self) -> i64 {
        self.modified_at.timestamp_millis()
    }
}

impl Metadata {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: METADATA_VERSION.to_string(),
            last_sync: now,
            entries: Vec::new(),
        }
    }

    /// Parse an index, dropping unreadable entries instead of failing.
    ///
    /// Entries that read but name no valid entry id are kept so they survive
    /// a rewrite; bulk pull reports them as failures.
    pub fn parse_lenient(raw: &str, now: DateTime<Utc>) -> Self {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
            return Self::empty(now);
        };

        let version = value
            .get("version")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|version| !version.is_empty())
            .unwrap_or(METADATA_VERSION)
            .to_string();
        let last_sync = value
            .get("lastSync")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
            .unwrap_or(now);
        let entries = value
            .get("entries")
            .and_then(serde_json::Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        serde_json::from_value::<MetadataEntry>(entry.clone()).ok()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            version,
            last_sync,
            entries,
        }
    }

    pub fn find(&self, id: &EntryId) -> Option<&MetadataEntry> {
        self.entries
            .iter()
            .find(|entry| entry.entry_id().as_ref() == Some(id))
    }

    /// Insert or replace the entry describing `record`, keeping its first
    /// `createdAt`.
    pub fn upsert(&mut self, record: &DiaryRecord, now: DateTime<Utc>) {
        let modified_at = ms_to_datetime(record.modified_at).unwrap_or(now);
        let existing = self
            .entries
            .iter()
            .position(|entry| entry.entry_id().as_ref() == Some(&record.id));

        let created_at = existing.map_or_else(
            || ms_to_datetime(record.created_at).unwrap_or(modified_at),
            |index| self.entries[index].created_at,
        );
        let next = MetadataEntry {
            kind: record.kind(),
            date: record.date(),
            year: record.summary_year(),
            filename: record.filename(),
            word_count: record.word_count,
            created_at,
            modified_at,
        };

        match existing {
            Some(index) => self.entries[index] = next,
            None => self.entries.push(next),
        }
        if self.version.trim().is_empty() {
            self.version = METADATA_VERSION.to_string();
        }
        self.last_sync = now;
    }
}

pub fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
