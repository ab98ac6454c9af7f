//! Diary repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{DiaryRecord, EntryId, EntryKind};
use libsql::params::Params;
use libsql::{Connection, Row, Value};

/// Secondary indexes on the diaries table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiaryIndex {
    Type,
    Date,
    Year,
    CreatedAt,
    ModifiedAt,
}

impl DiaryIndex {
    const fn column(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Date => "date",
            Self::Year => "year",
            Self::CreatedAt => "created_at",
            Self::ModifiedAt => "modified_at",
        }
    }
}

/// Key value for an index query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    Text(String),
    Integer(i64),
}

impl From<IndexValue> for Value {
    fn from(value: IndexValue) -> Self {
        match value {
            IndexValue::Text(text) => Self::Text(text),
            IndexValue::Integer(number) => Self::Integer(number),
        }
    }
}

impl From<EntryKind> for IndexValue {
    fn from(kind: EntryKind) -> Self {
        Self::Text(kind.as_str().to_string())
    }
}

/// Key range for [`DiaryRepository::list_by_index`]. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    All,
    Eq(IndexValue),
    Range {
        lower: Option<IndexValue>,
        upper: Option<IndexValue>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Trait for diary storage operations (async)
#[allow(async_fn_in_trait)]
pub trait DiaryRepository {
    /// Get a diary by id
    async fn get(&self, id: &EntryId) -> Result<Option<DiaryRecord>>;

    /// Insert or replace a diary
    async fn put(&self, record: &DiaryRecord) -> Result<()>;

    /// List diaries whose index key matches `query`, ordered by that key
    async fn list_by_index(
        &self,
        index: DiaryIndex,
        query: &IndexQuery,
        direction: Direction,
        limit: Option<usize>,
    ) -> Result<Vec<DiaryRecord>>;
}

/// libSQL implementation of `DiaryRepository`
pub struct LibSqlDiaryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlDiaryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_record(row: &Row) -> Result<DiaryRecord> {
        let raw_id: String = row.get(0)?;
        let id = raw_id
            .parse::<EntryId>()
            .map_err(|_| Error::Storage(format!("corrupt diary id in store: {raw_id}")))?;
        let word_count: i64 = row.get(2)?;
        Ok(DiaryRecord {
            id,
            content: row.get(1)?,
            word_count: u32::try_from(word_count).unwrap_or(0),
            created_at: row.get(3)?,
            modified_at: row.get(4)?,
        })
    }
}

impl DiaryRepository for LibSqlDiaryRepository<'_> {
    async fn get(&self, id: &EntryId) -> Result<Option<DiaryRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, content, word_count, created_at, modified_at
                 FROM diaries WHERE id = ?",
                [id.to_string()],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_record(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn put(&self, record: &DiaryRecord) -> Result<()> {
        let year = record
            .summary_year()
            .map_or(Value::Null, |year| Value::Integer(i64::from(year)));
        self.conn
            .execute(
                "INSERT OR REPLACE INTO diaries
                    (id, type, date, year, filename, content, word_count, created_at, modified_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    record.id.to_string(),
                    record.kind().as_str(),
                    record.date(),
                    year,
                    record.filename(),
                    record.content.as_str(),
                    i64::from(record.word_count),
                    record.created_at,
                    record.modified_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_by_index(
        &self,
        index: DiaryIndex,
        query: &IndexQuery,
        direction: Direction,
        limit: Option<usize>,
    ) -> Result<Vec<DiaryRecord>> {
        let column = index.column();
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        match query {
            IndexQuery::All => {}
            IndexQuery::Eq(value) => {
                clauses.push(format!("{column} = ?"));
                values.push(value.clone().into());
            }
            IndexQuery::Range { lower, upper } => {
                if let Some(lower) = lower {
                    clauses.push(format!("{column} >= ?"));
                    values.push(lower.clone().into());
                }
                if let Some(upper) = upper {
                    clauses.push(format!("{column} <= ?"));
                    values.push(upper.clone().into());
                }
            }
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let dir = direction.sql();
        values.push(Value::Integer(limit.map_or(-1, |limit| limit as i64)));

        let sql = format!(
            "SELECT id, content, word_count, created_at, modified_at
             FROM diaries {where_clause}
             ORDER BY {column} {dir}, id {dir}
             LIMIT ?"
        );
        let mut rows = self.conn.query(&sql, Params::Positional(values)).await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::row_to_record(&row)?);
        }
        Ok(records)
    }
}
