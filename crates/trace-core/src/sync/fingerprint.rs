//! Content fingerprints for dirty detection.
//!
//! Format: `v1:{fnv1a32 hex}:{length}`, hashed over the UTF-16 code units of
//! `"{scope}\n{normalized content}"` so fingerprints written by other clients
//! of the same repository compare equal.

use crate::models::{DiaryRecord, EntryId};
use crate::util::normalize_content;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub fn fingerprint(id: &EntryId, content: &str) -> String {
    let normalized = normalize_content(content);
    let input = format!("{}\n{normalized}", id.fingerprint_scope());
    let hash = input
        .encode_utf16()
        .fold(FNV_OFFSET_BASIS, |hash, unit| {
            (hash ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
        });
    format!("v1:{hash:08x}:{}", normalized.encode_utf16().count())
}

pub fn record_fingerprint(record: &DiaryRecord) -> String {
    fingerprint(&record.id, &record.content)
}

/// True when two texts differ only by line endings or trailing blanks.
pub fn same_content(left: &str, right: &str) -> bool {
    normalize_content(left) == normalize_content(right)
}
