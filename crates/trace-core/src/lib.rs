//! trace-core - Core library for Trace
//!
//! This crate contains the encryption layer, the local diary store, the
//! session state machine and the sync engine that backs diary entries up to a
//! git-hosting contents API. Interfaces (CLI) drive it through
//! [`services::LocalStore`], [`auth::SessionManager`] and [`sync::SyncEngine`].

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{DiaryRecord, EntryId, EntryKind};
