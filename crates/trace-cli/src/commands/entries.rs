use trace_core::db::{DiaryIndex, Direction, IndexQuery, IndexValue};
use trace_core::{EntryId, EntryKind};

use crate::cli::EntryTypeArg;
use crate::commands::common::{
    describe_push, entry_to_list_item, format_entry_lines, format_timestamp, parse_entry_id,
    resolve_entry_content, sync_error, EntryListItem, Workspace,
};
use crate::error::CliError;

pub async fn run_write(
    workspace: &Workspace,
    date: &str,
    content_parts: &[String],
    sync: bool,
) -> Result<(), CliError> {
    let id = EntryId::daily(date.trim())?;
    save_entry(workspace, id, content_parts, sync).await
}

pub async fn run_summary(
    workspace: &Workspace,
    year: i32,
    content_parts: &[String],
    sync: bool,
) -> Result<(), CliError> {
    let id = EntryId::summary(year)?;
    save_entry(workspace, id, content_parts, sync).await
}

async fn save_entry(
    workspace: &Workspace,
    id: EntryId,
    content_parts: &[String],
    sync: bool,
) -> Result<(), CliError> {
    let existing = workspace.store().get(&id).await?;
    let initial = existing.as_ref().map_or("", |record| record.content.as_str());
    let content = resolve_entry_content(content_parts, initial)?;

    if existing.is_some_and(|record| record.content == content) {
        println!("{id} unchanged");
    } else {
        let record = workspace.store().set_content(&id, &content).await?;
        println!("Saved {id} ({} chars)", record.word_count);
    }

    if sync {
        let engine = workspace.engine().await?;
        let outcome = engine.push(&id).await.map_err(sync_error)?;
        println!("{}", describe_push(&id, &outcome));
    }
    Ok(())
}

pub async fn run_show(workspace: &Workspace, id: &str) -> Result<(), CliError> {
    let id = parse_entry_id(id)?;
    let record = workspace
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| trace_core::Error::NotFound(format!("diary {id}")))?;
    let baseline = workspace.store().baseline(&id).await?;

    println!("# {id}");
    println!(
        "created {}  modified {}  {} chars",
        format_timestamp(record.created_at),
        format_timestamp(record.modified_at),
        record.word_count
    );
    match baseline {
        Some(baseline) => println!("last synced {}", format_timestamp(baseline.synced_at)),
        None => println!("never synced"),
    }
    println!();
    println!("{}", record.content);
    Ok(())
}

pub async fn run_list(
    workspace: &Workspace,
    kind: Option<EntryTypeArg>,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let (index, query) = match kind {
        Some(kind) => (
            DiaryIndex::Type,
            IndexQuery::Eq(IndexValue::from(entry_kind(kind))),
        ),
        None => (DiaryIndex::Date, IndexQuery::All),
    };
    let mut records = workspace
        .store()
        .list_by_index(index, &query, Direction::Desc, None)
        .await?;
    records.sort_by(|left, right| right.id.cmp(&left.id));
    records.truncate(limit);

    if as_json {
        let items = records
            .iter()
            .map(entry_to_list_item)
            .collect::<Vec<EntryListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if records.is_empty() {
        println!("No entries yet.");
    } else {
        for line in format_entry_lines(&records) {
            println!("{line}");
        }
    }
    Ok(())
}

pub const fn entry_kind(kind: EntryTypeArg) -> EntryKind {
    match kind {
        EntryTypeArg::Daily => EntryKind::Daily,
        EntryTypeArg::Summary => EntryKind::YearlySummary,
    }
}
