use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] trace_core::Error),
    #[error(transparent)]
    Remote(#[from] trace_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No diary content provided")]
    EmptyContent,
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Diary is not set up. Run `trace setup --repo <owner/repo>` first.")]
    NotConfigured,
    #[error("Stored access token is unusable ({0}). Run `trace token refresh`.")]
    NeedsTokenRefresh(String),
    #[error("No conflict for {0}: local and remote copies agree")]
    NoConflict(String),
    #[error("{0}")]
    Prompt(String),
}
