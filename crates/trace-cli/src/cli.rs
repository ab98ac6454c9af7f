use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "trace")]
#[command(about = "Offline-first diary with encrypted backup to a git repository")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Contents API base URL (defaults to https://api.github.com)
    #[arg(long, global = true, value_name = "URL")]
    pub api_base: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure the backup repository, access token and master password
    Setup {
        /// `owner/repo` or repository URL
        #[arg(long, value_name = "REPO")]
        repo: String,
        /// Branch to commit to
        #[arg(long, value_name = "NAME")]
        branch: Option<String>,
    },
    /// Check the master password and the stored access token
    Unlock,
    /// Require the master password again
    Lock,
    /// Show setup, lock and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the stored access token
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Write the diary for a day
    Write {
        /// Day as YYYY-MM-DD
        date: String,
        /// Diary content (stdin or $EDITOR when omitted)
        content: Vec<String>,
        /// Push to the remote right after saving
        #[arg(long)]
        sync: bool,
    },
    /// Write the summary for a year
    Summary {
        /// Year as YYYY
        year: i32,
        /// Summary content (stdin or $EDITOR when omitted)
        content: Vec<String>,
        /// Push to the remote right after saving
        #[arg(long)]
        sync: bool,
    },
    /// Print one entry
    Show {
        /// Entry id (`daily:YYYY-MM-DD`, `summary:YYYY`, or a bare date/year)
        id: String,
    },
    /// List local entries, newest first
    List {
        /// Only list one kind of entry
        #[arg(long = "type", value_enum)]
        kind: Option<EntryTypeArg>,
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push or pull entries
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Inspect and resolve diverged entries
    Conflict {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum EntryTypeArg {
    Daily,
    Summary,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Store a new access token (read from TRACE_TOKEN or prompted)
    Refresh,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Push one entry
    Push {
        /// Entry id
        id: String,
    },
    /// Pull one entry
    Pull {
        /// Entry id
        id: String,
    },
    /// Push every local entry
    All {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download every entry listed in the remote index
    PullAll {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// Show both sides of a diverged entry
    Show {
        /// Entry id
        id: String,
    },
    /// Settle a diverged entry
    #[command(group(
        ArgGroup::new("resolution")
            .required(true)
            .args(["keep_local", "keep_remote", "merge_file"])
    ))]
    Resolve {
        /// Entry id
        id: String,
        /// Overwrite the remote copy with the local one
        #[arg(long)]
        keep_local: bool,
        /// Replace the local copy with the remote one
        #[arg(long)]
        keep_remote: bool,
        /// Push the contents of this file as the merged entry
        #[arg(long, value_name = "PATH")]
        merge_file: Option<PathBuf>,
    },
}
