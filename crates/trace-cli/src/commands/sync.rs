use trace_core::sync::{BulkItemStatus, BulkPullSummary, BulkPushSummary};

use crate::cli::SyncCommands;
use crate::commands::common::{
    describe_pull, describe_push, parse_entry_id, sync_error, Workspace,
};
use crate::error::CliError;

pub async fn run_sync(workspace: &Workspace, command: SyncCommands) -> Result<(), CliError> {
    match command {
        SyncCommands::Push { id } => {
            let id = parse_entry_id(&id)?;
            let engine = workspace.engine().await?;
            let outcome = engine.push(&id).await.map_err(sync_error)?;
            println!("{}", describe_push(&id, &outcome));
        }
        SyncCommands::Pull { id } => {
            let id = parse_entry_id(&id)?;
            let engine = workspace.engine().await?;
            let outcome = engine.pull(&id).await.map_err(sync_error)?;
            println!("{}", describe_pull(&id, &outcome));
        }
        SyncCommands::All { json } => {
            let engine = workspace.engine().await?;
            let summary = engine.push_all().await.map_err(sync_error)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for line in format_push_summary(&summary) {
                    println!("{line}");
                }
            }
        }
        SyncCommands::PullAll { json } => {
            let engine = workspace.engine().await?;
            let summary = engine.pull_all().await.map_err(sync_error)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for line in format_pull_summary(&summary) {
                    println!("{line}");
                }
            }
        }
    }
    workspace.ensure_token_accepted()
}

pub fn format_push_summary(summary: &BulkPushSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "{} entries: {} pushed, {} up to date, {} skipped, {} conflicted, {} failed",
        summary.total,
        summary.pushed,
        summary.up_to_date,
        summary.skipped,
        summary.conflicted,
        summary.failed
    )];
    for item in &summary.items {
        let label = match item.status {
            BulkItemStatus::Conflicted => "conflict",
            BulkItemStatus::Failed => "failed",
            _ => continue,
        };
        let reason = item.reason.as_deref().unwrap_or("");
        lines.push(format!("  {label:<8} {}  {reason}", item.entry_id));
    }
    lines
}

pub fn format_pull_summary(summary: &BulkPullSummary) -> Vec<String> {
    if summary.metadata_missing {
        return vec!["Remote index not found; nothing to pull".to_string()];
    }
    let mut lines = vec![format!(
        "{} entries: {} downloaded ({} new, {} updated), {} skipped, {} conflicted, {} failed",
        summary.total,
        summary.downloaded,
        summary.inserted,
        summary.updated,
        summary.skipped,
        summary.conflicted,
        summary.failed
    )];
    for id in &summary.conflicts {
        lines.push(format!("  conflict {id}  local edits kept"));
    }
    for failed in &summary.failed_items {
        lines.push(format!("  failed   {}  {}", failed.entry_id, failed.reason));
    }
    lines
}
