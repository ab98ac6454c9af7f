//! Diary record model

use serde::{Deserialize, Serialize};

use super::{EntryId, EntryKind};
use crate::util::{count_visible_chars, now_ms};

/// A diary entry in the local store. Content is plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryRecord {
    pub id: EntryId,
    pub content: String,
    /// Non-whitespace character count
    pub word_count: u32,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local edit timestamp (Unix ms)
    pub modified_at: i64,
}

impl DiaryRecord {
    /// Create a record with the given content at `now_ms`.
    pub fn new(id: EntryId, content: impl Into<String>, now_ms: i64) -> Self {
        let content = content.into();
        Self {
            id,
            word_count: count_visible_chars(&content),
            content,
            created_at: now_ms,
            modified_at: now_ms,
        }
    }

    /// Daily entry for `date` (`YYYY-MM-DD`), timestamped now.
    pub fn daily(date: &str, content: impl Into<String>) -> crate::Result<Self> {
        Ok(Self::new(EntryId::daily(date)?, content, now_ms()))
    }

    /// Yearly summary for `year`, timestamped now.
    pub fn yearly_summary(year: i32, content: impl Into<String>) -> crate::Result<Self> {
        Ok(Self::new(EntryId::summary(year)?, content, now_ms()))
    }

    /// Replace the content, refreshing word count and modification time.
    pub fn set_content(&mut self, content: impl Into<String>, now_ms: i64) {
        self.content = content.into();
        self.word_count = count_visible_chars(&self.content);
        self.modified_at = now_ms.max(self.created_at);
    }

    pub const fn kind(&self) -> EntryKind {
        self.id.kind()
    }

    pub fn date(&self) -> String {
        self.id.date()
    }

    /// Year for yearly summaries; `None` for daily entries.
    pub const fn summary_year(&self) -> Option<i32> {
        match self.id {
            EntryId::Summary(year) => Some(year),
            EntryId::Daily(_) => None,
        }
    }

    pub fn filename(&self) -> String {
        self.id.remote_path()
    }

    /// True when there is nothing worth pushing.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_counts_words() {
        let id = EntryId::daily("2024-05-01").unwrap();
        let record = DiaryRecord::new(id, "hello world", 1_000);
        assert_eq!(record.word_count, 10);
        assert_eq!(record.created_at, 1_000);
        assert_eq!(record.modified_at, 1_000);
        assert_eq!(record.filename(), "2024-05-01.md.enc");
        assert_eq!(record.summary_year(), None);
    }

    #[test]
    fn set_content_updates_modified_at() {
        let mut record = DiaryRecord::new(EntryId::Summary(2024), "a", 1_000);
        record.set_content("abc", 2_000);
        assert_eq!(record.word_count, 3);
        assert_eq!(record.modified_at, 2_000);
        assert_eq!(record.created_at, 1_000);
        assert_eq!(record.summary_year(), Some(2024));
    }

    #[test]
    fn constructors_validate_ids() {
        let daily = DiaryRecord::daily("2024-02-29", "leap").unwrap();
        assert_eq!(daily.date(), "2024-02-29");
        assert_eq!(daily.created_at, daily.modified_at);

        let summary = DiaryRecord::yearly_summary(2023, "review").unwrap();
        assert_eq!(summary.date(), "2023-12-31");
        assert_eq!(summary.filename(), "2023-summary.md.enc");

        assert!(DiaryRecord::daily("2023-02-29", "x").is_err());
        assert!(DiaryRecord::yearly_summary(99, "x").is_err());
    }

    #[test]
    fn blank_detection_trims() {
        let record = DiaryRecord::new(EntryId::Summary(2024), " \n\t ", 1);
        assert!(record.is_blank());
    }
}
