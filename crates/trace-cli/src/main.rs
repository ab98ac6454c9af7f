//! Trace CLI - write diary entries and back them up to a git repository
//!
//! Entries are saved locally first; sync commands push or pull them through
//! the repository contents API, encrypted with the master password.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::{run_lock, run_setup, run_status, run_token, run_unlock};
use crate::commands::common::{resolve_api_base, resolve_db_path, Workspace};
use crate::commands::completions::run_completions;
use crate::commands::conflict::run_conflict;
use crate::commands::entries::{run_list, run_show, run_summary, run_write};
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "trace_core=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path)?;
    let workspace = Workspace::open(&db_path, resolve_api_base(cli.api_base)).await?;

    match cli.command {
        Commands::Setup { repo, branch } => run_setup(&workspace, repo, branch).await?,
        Commands::Unlock => run_unlock(&workspace).await?,
        Commands::Lock => run_lock(&workspace).await?,
        Commands::Status { json } => run_status(&workspace, json).await?,
        Commands::Token { command } => run_token(&workspace, command).await?,
        Commands::Write {
            date,
            content,
            sync,
        } => run_write(&workspace, &date, &content, sync).await?,
        Commands::Summary {
            year,
            content,
            sync,
        } => run_summary(&workspace, year, &content, sync).await?,
        Commands::Show { id } => run_show(&workspace, &id).await?,
        Commands::List { kind, limit, json } => run_list(&workspace, kind, limit, json).await?,
        Commands::Sync { command } => run_sync(&workspace, command).await?,
        Commands::Conflict { command } => run_conflict(&workspace, command).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
