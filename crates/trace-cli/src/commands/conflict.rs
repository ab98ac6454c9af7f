use std::path::PathBuf;

use trace_core::sync::{ConflictState, Resolution};

use crate::cli::ConflictCommands;
use crate::commands::common::{
    describe_resolve, normalize_content, parse_entry_id, sync_error, Workspace,
};
use crate::error::CliError;

pub async fn run_conflict(workspace: &Workspace, command: ConflictCommands) -> Result<(), CliError> {
    match command {
        ConflictCommands::Show { id } => {
            let id = parse_entry_id(&id)?;
            let engine = workspace.engine().await?;
            match engine.conflict_for(&id).await.map_err(sync_error)? {
                Some(conflict) => {
                    for line in format_conflict(&conflict) {
                        println!("{line}");
                    }
                }
                None => println!("No conflict for {id}"),
            }
        }
        ConflictCommands::Resolve {
            id,
            keep_local,
            keep_remote,
            merge_file,
        } => {
            let id = parse_entry_id(&id)?;
            let resolution = resolution_from_flags(keep_local, keep_remote, merge_file)?;
            let engine = workspace.engine().await?;
            let conflict = engine
                .conflict_for(&id)
                .await
                .map_err(sync_error)?
                .ok_or_else(|| CliError::NoConflict(id.to_string()))?;
            let outcome = engine
                .resolve(&conflict, resolution)
                .await
                .map_err(sync_error)?;
            println!("{}", describe_resolve(&id, &outcome));
        }
    }
    Ok(())
}

pub fn resolution_from_flags(
    keep_local: bool,
    keep_remote: bool,
    merge_file: Option<PathBuf>,
) -> Result<Resolution, CliError> {
    match (keep_local, keep_remote, merge_file) {
        (true, false, None) => Ok(Resolution::KeepLocal),
        (false, true, None) => Ok(Resolution::KeepRemote),
        (false, false, Some(path)) => {
            let text = std::fs::read_to_string(&path)?;
            normalize_content(&text)
                .map(Resolution::Merge)
                .ok_or(CliError::EmptyContent)
        }
        _ => Err(CliError::Prompt(
            "Choose exactly one of --keep-local, --keep-remote or --merge-file".to_string(),
        )),
    }
}

pub fn format_conflict(conflict: &ConflictState) -> Vec<String> {
    let mut lines = vec![
        format!("Conflict on {}", conflict.entry_id),
        String::new(),
        "--- local".to_string(),
        conflict.local_content.clone(),
        String::new(),
    ];
    match &conflict.remote_content {
        Some(remote) => {
            lines.push("--- remote".to_string());
            lines.push(remote.clone());
        }
        None => {
            lines.push("--- remote (does not decrypt with this password)".to_string());
        }
    }
    lines
}
