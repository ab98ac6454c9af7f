//! Data models for Trace

mod baseline;
mod config;
mod diary;
mod entry;
mod metadata;

pub use baseline::{SyncBaseline, SYNC_BASELINE_KEY_PREFIX};
pub use config::{AppConfig, LockState};
pub use diary::DiaryRecord;
pub use entry::{EntryId, EntryKind};
pub use metadata::{ms_to_datetime, Metadata, MetadataEntry, METADATA_VERSION};
