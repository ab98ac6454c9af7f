//! Key/value repository over the `config` and `metadata` tables

use crate::error::Result;
use libsql::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key/value tables in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvTable {
    Config,
    Metadata,
}

impl KvTable {
    const fn name(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Metadata => "metadata",
        }
    }
}

/// Trait for key/value storage operations (async)
#[allow(async_fn_in_trait)]
pub trait KeyValueRepository {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    async fn set_raw(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, in key order
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, &raw).await
    }
}

/// libSQL implementation of `KeyValueRepository`
pub struct LibSqlKeyValueRepository<'a> {
    conn: &'a Connection,
    table: KvTable,
}

impl<'a> LibSqlKeyValueRepository<'a> {
    /// Create a new repository over one of the key/value tables
    pub const fn new(conn: &'a Connection, table: KvTable) -> Self {
        Self { conn, table }
    }
}

impl KeyValueRepository for LibSqlKeyValueRepository<'_> {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let sql = format!("SELECT value FROM {} WHERE key = ?", self.table.name());
        let mut rows = self.conn.query(&sql, [key]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get::<String>(0)?))
        } else {
            Ok(None)
        }
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES (?, ?)",
            self.table.name()
        );
        self.conn.execute(&sql, [key, value]).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE key = ?", self.table.name());
        self.conn.execute(&sql, [key]).await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT key FROM {} WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
            self.table.name()
        );
        let mut rows = self.conn.query(&sql, [prefix]).await?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(row.get::<String>(0)?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_key_is_none() {
        let db = setup().await;
        let repo = LibSqlKeyValueRepository::new(db.connection(), KvTable::Config);
        assert_eq!(repo.get_raw("app").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_json_roundtrip_and_delete() {
        let db = setup().await;
        let repo = LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata);
        let sample = Sample {
            name: "x".to_string(),
            count: 3,
        };

        repo.set_json("sample", &sample).await.unwrap();
        assert_eq!(repo.get_json::<Sample>("sample").await.unwrap(), Some(sample));

        repo.delete("sample").await.unwrap();
        assert_eq!(repo.get_json::<Sample>("sample").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tables_are_separate() {
        let db = setup().await;
        let config = LibSqlKeyValueRepository::new(db.connection(), KvTable::Config);
        let metadata = LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata);

        config.set_raw("shared", "config").await.unwrap();
        metadata.set_raw("shared", "metadata").await.unwrap();
        assert_eq!(config.get_raw("shared").await.unwrap().unwrap(), "config");
        assert_eq!(
            metadata.get_raw("shared").await.unwrap().unwrap(),
            "metadata"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keys_with_prefix() {
        let db = setup().await;
        let repo = LibSqlKeyValueRepository::new(db.connection(), KvTable::Metadata);
        repo.set_raw("sync-baseline:b", "1").await.unwrap();
        repo.set_raw("sync-baseline:a", "1").await.unwrap();
        repo.set_raw("auth:lock-state", "1").await.unwrap();

        let keys = repo.keys_with_prefix("sync-baseline:").await.unwrap();
        assert_eq!(keys, vec!["sync-baseline:a", "sync-baseline:b"]);
    }
}
