//! Database layer for Trace

mod connection;
mod diary_repository;
mod kv_repository;
mod migrations;

pub use connection::Database;
pub use diary_repository::{
    DiaryIndex, DiaryRepository, Direction, IndexQuery, IndexValue, LibSqlDiaryRepository,
};
pub use kv_repository::{KeyValueRepository, KvTable, LibSqlKeyValueRepository};
