use serde::Serialize;
use trace_core::auth::{AuthState, SetupRequest};
use trace_core::models::{AppConfig, LockState};
use trace_core::remote::{ContentsApi, GitHubContentsClient, RepoRef};

use crate::cli::TokenCommands;
use crate::commands::common::{
    format_timestamp, read_new_password, read_secret, Workspace, PASSWORD_ENV, TOKEN_ENV,
};
use crate::error::CliError;

pub async fn run_setup(
    workspace: &Workspace,
    repository: String,
    branch: Option<String>,
) -> Result<(), CliError> {
    if workspace.store().load_config().await?.is_some() {
        println!("Diary is already set up. Use `trace unlock` or `trace token refresh`.");
        return Ok(());
    }

    let repo = RepoRef::parse(&repository)?;
    let token = read_secret(TOKEN_ENV, "Access token: ")?;
    let client = GitHubContentsClient::new(
        workspace.settings(),
        repo.clone(),
        branch.clone(),
        token.as_str(),
    )?;
    match client.check_access().await {
        Ok(()) => {}
        Err(error) if error.is_unauthorized() => return Err(error.into()),
        Err(error) => tracing::warn!("Could not reach the repository, continuing: {error}"),
    }

    let password = read_new_password()?;
    let session = workspace
        .session()
        .setup(SetupRequest {
            repository,
            branch,
            token: token.to_string(),
            password: password.to_string(),
        })
        .await?;
    println!(
        "Configured {}/{}; unlocked until {}",
        repo.owner,
        repo.repo,
        format_timestamp(session.expires_at())
    );
    Ok(())
}

pub async fn run_unlock(workspace: &Workspace) -> Result<(), CliError> {
    let session = workspace.unlock_with(&workspace.verifier()).await?;
    println!("Unlocked until {}", format_timestamp(session.expires_at()));
    Ok(())
}

pub async fn run_lock(workspace: &Workspace) -> Result<(), CliError> {
    workspace.config().await?;
    workspace.session().lock_now().await?;
    println!("Locked");
    Ok(())
}

pub async fn run_token(workspace: &Workspace, command: TokenCommands) -> Result<(), CliError> {
    match command {
        TokenCommands::Refresh => {
            workspace.config().await?;
            let token = read_secret(TOKEN_ENV, "New access token: ")?;
            let password = read_secret(PASSWORD_ENV, "Master password: ")?;
            let session = workspace
                .session()
                .refresh_token(&token, Some(password.as_str()))
                .await?;
            println!(
                "Access token updated; unlocked until {}",
                format_timestamp(session.expires_at())
            );
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub auth: AuthState,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub unlocked_until: Option<i64>,
    pub last_synced_at: Option<i64>,
    pub local_entries: usize,
    pub indexed_entries: Option<usize>,
}

pub async fn collect_status(workspace: &Workspace) -> Result<StatusReport, CliError> {
    let auth = workspace.session().bootstrap().await?;
    let config = workspace.store().load_config().await?;
    let unlocked_until = match workspace.store().lock_state().await? {
        LockState::Unlocked { expires_at } if auth != AuthState::NeedsSetup => Some(expires_at),
        _ => None,
    };

    Ok(StatusReport {
        auth,
        repository: config.as_ref().map(AppConfig::repository),
        branch: config.map(|config| config.branch),
        unlocked_until,
        last_synced_at: workspace.store().last_synced_at().await?,
        local_entries: workspace.store().list_all().await?.len(),
        indexed_entries: workspace
            .store()
            .cached_metadata()
            .await?
            .map(|metadata| metadata.entries.len()),
    })
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let mut lines = vec![format!("State:        {}", report.auth.label())];
    if let (Some(repository), Some(branch)) = (&report.repository, &report.branch) {
        lines.push(format!("Repository:   {repository} ({branch})"));
    }
    if let Some(until) = report.unlocked_until {
        lines.push(format!("Unlocked:     until {}", format_timestamp(until)));
    }
    lines.push(format!(
        "Last sync:    {}",
        report
            .last_synced_at
            .map_or_else(|| "never".to_string(), format_timestamp)
    ));
    lines.push(format!("Entries:      {} local", report.local_entries));
    if let Some(indexed) = report.indexed_entries {
        lines.push(format!("Remote index: {indexed} entries (cached)"));
    }
    lines
}

pub async fn run_status(workspace: &Workspace, as_json: bool) -> Result<(), CliError> {
    let report = collect_status(workspace).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}
