//! Remote metadata index maintenance.

use chrono::Utc;

use super::engine::SyncEngine;
use super::metadata_commit_message;
use crate::crypto::{decrypt, encrypt, DataKey};
use crate::models::{DiaryRecord, Metadata};
use crate::remote::{ContentsApi, PutRequest};
use crate::{Error, Result};

pub const METADATA_PATH: &str = "metadata.json.enc";

impl<R: ContentsApi> SyncEngine<R> {
    /// Read the remote index, or `None` when it does not exist yet.
    ///
    /// Returns the decrypted index and the sha it was read at.
    pub(crate) async fn read_metadata(
        &self,
        key: &DataKey,
    ) -> Result<Option<(Metadata, String)>> {
        let Some(file) = self.fetch(METADATA_PATH).await? else {
            return Ok(None);
        };
        if file.content.trim().is_empty() {
            return Ok(Some((Metadata::empty(Utc::now()), file.sha)));
        }
        let plaintext = decrypt(&file.content, key).map_err(|_| {
            Error::Auth("Remote metadata index does not decrypt with this key".to_string())
        })?;
        Ok(Some((Metadata::parse_lenient(&plaintext, Utc::now()), file.sha)))
    }

    /// Upsert `record` into the remote index.
    ///
    /// Read-modify-write against the index sha; a sha mismatch re-reads and
    /// retries up to `metadata_retries` more times. The plaintext result is
    /// cached locally.
    pub(crate) async fn sync_metadata(&self, record: &DiaryRecord, key: &DataKey) -> Result<()> {
        let mut attempt = 0;
        loop {
            let current = self.read_metadata(key).await?;
            let (mut metadata, sha) = match current {
                Some((metadata, sha)) => (metadata, Some(sha)),
                None => (Metadata::empty(Utc::now()), None),
            };
            metadata.upsert(record, Utc::now());

            let request = PutRequest {
                path: METADATA_PATH.to_string(),
                content: encrypt(&serde_json::to_string(&metadata)?, key)?,
                message: metadata_commit_message(),
                sha,
            };
            match self.put(request).await {
                Ok(_) => {
                    self.store().save_cached_metadata(&metadata).await?;
                    return Ok(());
                }
                Err(error) if error.is_conflict() && attempt < self.options().metadata_retries => {
                    attempt += 1;
                    tracing::debug!("Metadata index moved; retry {attempt}");
                }
                Err(error) => return Err(error),
            }
        }
    }
}
