//! Remote content client for a git-hosting contents API.
//!
//! Files are addressed by path on one branch and versioned by an opaque
//! `sha`; a write carrying a stale `sha` is rejected as a conflict.

mod github;
mod memory;
mod repo_ref;

pub use github::GitHubContentsClient;
pub use memory::{InjectedFailure, MemoryContents};
pub use repo_ref::RepoRef;

use std::fmt;
use std::future::Future;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// A file as read from the remote. `content` is the decoded file text.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    pub sha: String,
}

impl fmt::Debug for RemoteFile {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteFile")
            .field("content_len", &self.content.len())
            .field("sha", &self.sha)
            .finish()
    }
}

/// Create or update one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub path: String,
    pub content: String,
    pub message: String,
    /// Expected current version; `None` creates the file.
    pub sha: Option<String>,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote unreachable: {0}")]
    Transport(String),
    #[error("Remote API error: {message}")]
    Api { status: u16, message: String },
    #[error("Remote rejected credentials: {0}")]
    Unauthorized(String),
    #[error("Remote version conflict: {0}")]
    Conflict(String),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl RemoteError {
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Read/write access to the repository contents.
///
/// Futures are `Send` so callers can detach a request and bound it with a
/// timeout.
pub trait ContentsApi: Send + Sync + 'static {
    /// Read a file; `None` when it does not exist.
    fn get_file(&self, path: &str) -> impl Future<Output = RemoteResult<Option<RemoteFile>>> + Send;

    /// Write a file and return its new `sha`.
    fn put_file(&self, request: PutRequest) -> impl Future<Output = RemoteResult<String>> + Send;

    /// Confirm the token can see the repository.
    fn check_access(&self) -> impl Future<Output = RemoteResult<()>> + Send;
}

/// Classify a failed response into a [`RemoteError`].
pub(crate) fn classify_failure(status: StatusCode, message: String) -> RemoteError {
    let code = status.as_u16();
    if code == 401 || code == 403 {
        return RemoteError::Unauthorized(message);
    }
    if looks_like_sha_mismatch(code, &message) || looks_like_file_exists(code, &message) {
        return RemoteError::Conflict(message);
    }
    RemoteError::Api {
        status: code,
        message,
    }
}

fn looks_like_sha_mismatch(status: u16, message: &str) -> bool {
    if status == 409 {
        return true;
    }
    let normalized = message.to_ascii_lowercase();
    normalized.contains("sha")
        && ["mismatch", "not match", "does not match", "wasn't supplied"]
            .iter()
            .any(|needle| normalized.contains(needle))
}

fn looks_like_file_exists(status: u16, message: &str) -> bool {
    if !matches!(status, 400 | 409 | 422) {
        return false;
    }
    let normalized = message.to_ascii_lowercase();
    ["already exists", "file exists"]
        .iter()
        .any(|needle| normalized.contains(needle))
}

pub(crate) fn looks_like_missing_branch(status: StatusCode, message: &str) -> bool {
    if !matches!(status.as_u16(), 400 | 404 | 422) {
        return false;
    }
    let normalized = message.to_ascii_lowercase();
    let mentions_branch = normalized.contains("branch") || normalized.contains("ref");
    let indicates_missing = ["not exist", "not found", "no commit found", "unknown", "invalid"]
        .iter()
        .any(|needle| normalized.contains(needle));
    mentions_branch && indicates_missing
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
}

pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = crate::util::compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
