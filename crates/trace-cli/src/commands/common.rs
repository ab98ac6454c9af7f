use std::env;
use std::io::{self, BufRead, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::Serialize;
use trace_core::auth::{
    AccessVerifier, AuthState, KeyProvider, RefreshReason, Session, SessionManager,
};
use trace_core::config::{RemoteSettings, SessionOptions, SyncOptions};
use trace_core::models::AppConfig;
use trace_core::remote::{ContentsApi, GitHubContentsClient, RemoteResult, RepoRef};
use trace_core::services::LocalStore;
use trace_core::sync::{PullOutcome, PushOutcome, ResolveOutcome, SyncEngine};
use trace_core::{DiaryRecord, EntryId};
use zeroize::Zeroizing;

use crate::error::CliError;

pub const PASSWORD_ENV: &str = "TRACE_PASSWORD";
pub const TOKEN_ENV: &str = "TRACE_TOKEN";

/// Store, session and remote settings for one CLI invocation.
///
/// Each process starts locked; commands that need the key unlock first.
pub struct Workspace {
    store: LocalStore,
    session: Arc<SessionManager>,
    settings: RemoteSettings,
}

impl Workspace {
    pub async fn open(db_path: &Path, api_base: Option<String>) -> Result<Self, CliError> {
        let settings = RemoteSettings::from_override(api_base)?;
        let store = LocalStore::open_path(db_path).await?;
        let session = Arc::new(SessionManager::new(
            store.clone(),
            SessionOptions::default(),
        ));
        Ok(Self {
            store,
            session,
            settings,
        })
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub const fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    pub async fn config(&self) -> Result<AppConfig, CliError> {
        self.store.load_config().await?.ok_or(CliError::NotConfigured)
    }

    pub fn verifier(&self) -> GitHubVerifier {
        GitHubVerifier {
            settings: self.settings.clone(),
        }
    }

    /// Unlock with the master password from the environment or a prompt.
    pub async fn unlock(&self) -> Result<Session, CliError> {
        self.unlock_with(&SkipCheck).await
    }

    pub async fn unlock_with<V: AccessVerifier>(&self, verifier: &V) -> Result<Session, CliError> {
        if self.session.bootstrap().await? == AuthState::NeedsSetup {
            return Err(CliError::NotConfigured);
        }
        let password = read_secret(PASSWORD_ENV, "Master password: ")?;
        match self.session.unlock_with(&password, verifier).await? {
            AuthState::NeedsTokenRefresh(reason) => {
                Err(CliError::NeedsTokenRefresh(refresh_reason_label(reason).to_string()))
            }
            _ => self.session.session().ok_or_else(|| {
                CliError::Prompt("Diary is still locked after unlock".to_string())
            }),
        }
    }

    /// Fails with a refresh prompt once a sync has seen the token refused.
    pub fn ensure_token_accepted(&self) -> Result<(), CliError> {
        match self.session.state() {
            AuthState::NeedsTokenRefresh(reason) => {
                Err(CliError::NeedsTokenRefresh(refresh_reason_label(reason).to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Unlock and build a sync engine against the configured repository.
    pub async fn engine(&self) -> Result<SyncEngine<GitHubContentsClient>, CliError> {
        let session = self.unlock().await?;
        let config = self.config().await?;
        let client = contents_client(&self.settings, &config, session.token())?;
        let keys: Arc<dyn KeyProvider> = self.session.clone();
        Ok(SyncEngine::new(
            Arc::new(client),
            self.store.clone(),
            keys,
            SyncOptions::default(),
        )
        .await?)
    }
}

pub fn contents_client(
    settings: &RemoteSettings,
    config: &AppConfig,
    token: &str,
) -> RemoteResult<GitHubContentsClient> {
    let repo = RepoRef {
        owner: config.owner.clone(),
        repo: config.repo.clone(),
    };
    GitHubContentsClient::new(settings, repo, Some(config.branch.clone()), token)
}

/// Confirms the token against the repository before unlocking.
pub struct GitHubVerifier {
    settings: RemoteSettings,
}

impl AccessVerifier for GitHubVerifier {
    async fn verify(&self, config: &AppConfig, token: &str) -> RemoteResult<()> {
        contents_client(&self.settings, config, token)?
            .check_access()
            .await
    }
}

struct SkipCheck;

impl AccessVerifier for SkipCheck {
    async fn verify(&self, _config: &AppConfig, _token: &str) -> RemoteResult<()> {
        Ok(())
    }
}

/// Map a sync failure to the error shown to the user.
pub fn sync_error(error: trace_core::Error) -> CliError {
    if error.is_unauthorized() {
        return CliError::NeedsTokenRefresh(
            refresh_reason_label(RefreshReason::TokenInvalid).to_string(),
        );
    }
    error.into()
}

pub const fn refresh_reason_label(reason: RefreshReason) -> &'static str {
    match reason {
        RefreshReason::DecryptFailed => "token does not decrypt",
        RefreshReason::TokenInvalid => "remote rejected the token",
        RefreshReason::MissingToken => "no token stored",
    }
}

/// Read a secret from `env_name`, else prompt without echo.
pub fn read_secret(env_name: &str, prompt: &str) -> Result<Zeroizing<String>, CliError> {
    if let Some(value) = env::var(env_name)
        .ok()
        .filter(|value| !value.trim().is_empty())
    {
        return Ok(Zeroizing::new(value));
    }

    let value = if io::stdin().is_terminal() {
        rpassword::prompt_password(prompt)?
    } else {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_string()
    };
    if value.is_empty() {
        return Err(CliError::Prompt(format!(
            "No value given; set {env_name} or enter it at the prompt"
        )));
    }
    Ok(Zeroizing::new(value))
}

/// Prompt for a new master password twice when interactive.
pub fn read_new_password() -> Result<Zeroizing<String>, CliError> {
    let password = read_secret(PASSWORD_ENV, "New master password: ")?;
    if env::var_os(PASSWORD_ENV).is_none() && io::stdin().is_terminal() {
        let confirm = Zeroizing::new(rpassword::prompt_password("Repeat master password: ")?);
        if confirm != password {
            return Err(CliError::Prompt("Passwords do not match".to_string()));
        }
    }
    Ok(password)
}

pub fn parse_entry_id(value: &str) -> Result<EntryId, CliError> {
    Ok(EntryId::parse_loose(value)?)
}

pub fn resolve_entry_content(
    content_parts: &[String],
    initial: &str,
) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input(initial)? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

fn capture_editor_input(initial_content: &str) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = temp_entry_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(CliError::EditorFailed("empty EDITOR command".into()));
    };

    let status = Command::new(program).args(parts).arg(file_path).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        )))
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn temp_entry_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("trace-entry-{}-{now}.md", std::process::id()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("TRACE_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("trace-diary").join("trace.db"))
        .ok_or_else(|| CliError::Prompt("Failed to resolve data directory; pass --db-path".into()))
}

pub fn resolve_api_base(cli_api_base: Option<String>) -> Option<String> {
    cli_api_base.or_else(|| env::var("TRACE_API_BASE").ok())
}

#[derive(Debug, Serialize)]
pub struct EntryListItem {
    pub id: String,
    pub preview: String,
    pub word_count: u32,
    pub created_at: i64,
    pub modified_at: i64,
    pub relative_time: String,
}

pub fn entry_to_list_item(record: &DiaryRecord) -> EntryListItem {
    let now_ms = Utc::now().timestamp_millis();
    EntryListItem {
        id: record.id.to_string(),
        preview: entry_preview(&record.content, 80),
        word_count: record.word_count,
        created_at: record.created_at,
        modified_at: record.modified_at,
        relative_time: format_relative_time(record.modified_at, now_ms),
    }
}

pub fn format_entry_lines(records: &[DiaryRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = record.id.to_string();
            let preview = entry_preview(&record.content, 40);
            let relative_time = format_relative_time(record.modified_at, now_ms);
            format!(
                "{id:<16}  {preview:<40}  {:>5} chars  {relative_time}",
                record.word_count
            )
        })
        .collect()
}

pub fn entry_preview(content: &str, max_chars: usize) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

pub fn describe_push(id: &EntryId, outcome: &PushOutcome) -> String {
    match outcome {
        PushOutcome::NothingToSync => format!("Nothing to sync for {id}"),
        PushOutcome::UpToDate => format!("{id} is up to date"),
        PushOutcome::Busy => format!("{id} is already uploading"),
        PushOutcome::Pushed {
            sha,
            metadata_synced: true,
        } => format!("Pushed {id} ({})", short_sha(sha)),
        PushOutcome::Pushed {
            sha,
            metadata_synced: false,
        } => format!(
            "Pushed {id} ({}); the remote index was not updated",
            short_sha(sha)
        ),
        PushOutcome::Conflict(_) => {
            format!("Conflict on {id}; run `trace conflict show {id}`")
        }
    }
}

pub fn describe_pull(id: &EntryId, outcome: &PullOutcome) -> String {
    match outcome {
        PullOutcome::NotFound => format!("{id} has no remote copy"),
        PullOutcome::UpToDate => format!("{id} is up to date"),
        PullOutcome::Updated => format!("Updated {id} from the remote"),
        PullOutcome::Inserted => format!("Downloaded {id}"),
        PullOutcome::Busy => format!("{id} is already syncing"),
        PullOutcome::Conflict(_) => {
            format!("Conflict on {id}; run `trace conflict show {id}`")
        }
    }
}

pub fn describe_resolve(id: &EntryId, outcome: &ResolveOutcome) -> String {
    match outcome {
        ResolveOutcome::Pushed { sha, .. } => format!("Resolved {id} ({})", short_sha(sha)),
        ResolveOutcome::TookRemote => format!("Resolved {id} with the remote copy"),
        ResolveOutcome::Busy => format!("{id} is already syncing"),
        ResolveOutcome::Conflict(_) => {
            format!("The remote copy of {id} changed again; run `trace conflict show {id}`")
        }
    }
}
