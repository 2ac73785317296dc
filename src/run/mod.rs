pub mod artifacts;
mod r#loop;
mod transitions;

pub use r#loop::{RunJournal, SyncContext, SyncSummary, sync_rows};

use crate::config::{SyncConfig, load_config};
use crate::index::uid::Dhis2UidGenerator;
use crate::index::{EventIndex, IndexError, load_index, save_index};
use crate::journal::store::{JournalStore, RunRow};
use crate::journal::{EventRow, NewEvent};
use crate::logging::ndjson;
use crate::mapping::{load_mapping_table, load_org_units};
use crate::source::{SourceRow, parse_rows};
use crate::storage::{ObjectStore, StoreErrorCode};
use crate::tracker::HttpTrackerClient;
use crate::tracker::job::{PollPolicy, SystemClock};
use anyhow::{Context, Result, anyhow};
use artifacts::ArtifactWriter;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RUNS_LIST_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct SyncCommand {
    pub config: PathBuf,
    pub state_db: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub init_index: bool,
}

pub fn default_state_db() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("kobo-dhis2-sync").join("journal.db");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("kobo-dhis2-sync")
            .join("journal.db");
    }
    PathBuf::from(".kobo-dhis2-sync/journal.db")
}

pub fn execute_sync(cmd: SyncCommand) -> Result<SyncSummary> {
    let cfg = load_config(&cmd.config)?;
    let mapping = load_mapping_table(&cfg.mapping.data_elements)?;
    let org_units = load_org_units(&cfg.mapping.org_units)?;
    let program = resolve_program(&cfg, mapping.program_id.as_deref())?;
    tracing::info!(
        data_elements = mapping.data_elements.len(),
        org_units = org_units.len(),
        program = program.as_str(),
        program_name = mapping.program_name.as_deref().unwrap_or("-"),
        "mappings loaded"
    );

    let source_store = cfg.source.store.open(cfg.sync.request_timeout)?;
    let index_store = cfg.index.store.open(cfg.sync.request_timeout)?;
    let source_key = source_store.describe(&cfg.source.blob);

    let db = cmd.state_db.clone().unwrap_or_else(default_state_db);
    let journal_store = JournalStore::open(&db)?;
    let run_id = Uuid::new_v4().to_string();
    journal_store.create_run(&RunRow {
        id: run_id.clone(),
        started_at: Utc::now().to_rfc3339(),
        finished_at: None,
        source_key: source_key.clone(),
        source_sha256: String::new(),
        status: "running".to_string(),
        summary_json: None,
    })?;
    let journal = RunJournal {
        store: &journal_store,
        run_id: &run_id,
        ndjson_log: cmd.log.as_deref(),
    };
    append_event(
        &journal_store,
        &run_id,
        &NewEvent::simple(
            "run_started",
            json!({
                "config": cmd.config,
                "source": source_key,
                "index": index_store.describe(&cfg.index.blob),
                "import_mode": cfg.dhis2.import_mode.as_str()
            }),
        ),
        journal.ndjson_log,
    )?;

    let source = read_source(source_store.as_ref(), &cfg.source.blob, cfg.source.delimiter);
    let rows = match source {
        Ok((rows, source_sha256)) => {
            journal_store.set_source_sha256(&run_id, &source_sha256)?;
            tracing::info!(
                rows = rows.len(),
                sha256 = source_sha256.as_str(),
                "source downloaded"
            );
            rows
        }
        Err(err) => {
            fail_run(&journal, &err)?;
            return Err(err);
        }
    };

    let mut index = match load_index(index_store.as_ref(), &cfg.index.blob, cmd.init_index) {
        Ok(index) => index,
        Err(err) => {
            let missing = matches!(
                &err,
                IndexError::Store { source, .. } if source.code == StoreErrorCode::NotFound
            );
            let mut err = anyhow::Error::new(err);
            if missing {
                err = err.context("event index missing; rerun with --init-index to start an empty one");
            }
            fail_run(&journal, &err)?;
            return Err(err);
        }
    };
    tracing::info!(entries = index.len(), "event index loaded");

    let outcome = run_rows(&cfg, &mapping, &org_units, &program, &rows, &mut index, &journal);
    let saved = save_index(index_store.as_ref(), &cfg.index.blob, &index)
        .with_context(|| format!("save event index {}", index_store.describe(&cfg.index.blob)));

    let summary = match (outcome, saved) {
        (Ok(summary), Ok(())) => summary,
        (Err(err), saved) => {
            if let Err(save_err) = saved {
                tracing::error!(error = %save_err, "event index not saved after failed run");
            }
            fail_run(&journal, &err)?;
            return Err(err);
        }
        (Ok(_), Err(err)) => {
            fail_run(&journal, &err)?;
            return Err(err);
        }
    };

    let summary_json = serde_json::to_value(summary)?;
    journal_store.finish_run(&run_id, "completed", &summary_json)?;
    append_event(
        &journal_store,
        &run_id,
        &NewEvent::simple("run_completed", summary_json),
        journal.ndjson_log,
    )?;
    tracing::info!(
        uploaded = summary.uploaded,
        pending = summary.pending(),
        deleted = summary.deleted,
        "sync finished"
    );
    println!("Run {run_id} completed: {}", render_summary(&summary));
    Ok(summary)
}

fn run_rows(
    cfg: &SyncConfig,
    mapping: &crate::mapping::MappingTable,
    org_units: &crate::mapping::OrgUnitMapping,
    program: &str,
    rows: &[SourceRow],
    index: &mut EventIndex,
    journal: &RunJournal<'_>,
) -> Result<SyncSummary> {
    let client = HttpTrackerClient::new(
        &cfg.dhis2.server,
        &cfg.dhis2.user,
        &cfg.dhis2.password,
        cfg.dhis2.import_mode,
        cfg.sync.request_timeout,
    )?;
    let artifacts = cfg
        .sync
        .artifacts_dir
        .as_deref()
        .map(ArtifactWriter::new)
        .transpose()?;
    let clock = SystemClock::default();
    let ctx = SyncContext {
        mapping,
        org_units,
        program,
        import_mode: cfg.dhis2.import_mode,
        client: &client,
        clock: &clock,
        poll: PollPolicy {
            interval: cfg.sync.poll_interval,
            max_wait: cfg.sync.max_wait,
        },
        artifacts: artifacts.as_ref(),
    };
    let mut ids = Dhis2UidGenerator::default();
    sync_rows(&ctx, index, &mut ids, rows, journal)
}

fn read_source(
    store: &dyn ObjectStore,
    blob: &str,
    delimiter: u8,
) -> Result<(Vec<SourceRow>, String)> {
    let extract = store
        .get(blob)
        .with_context(|| format!("download source {}", store.describe(blob)))?;
    let rows = parse_rows(&extract, delimiter)
        .with_context(|| format!("parse source {}", store.describe(blob)))?;
    Ok((rows, sha256_hex(&extract)))
}

fn resolve_program(cfg: &SyncConfig, mapping_program: Option<&str>) -> Result<String> {
    cfg.dhis2
        .program
        .clone()
        .or_else(|| {
            mapping_program
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string)
        })
        .ok_or_else(|| {
            anyhow!("no program id: set `[dhis2].program` or `program_id` in the mapping table")
        })
}

fn fail_run(journal: &RunJournal<'_>, err: &anyhow::Error) -> Result<()> {
    let payload = json!({"error": format!("{err:#}")});
    journal
        .store
        .finish_run(journal.run_id, "failed", &payload)?;
    append_event(
        journal.store,
        journal.run_id,
        &NewEvent::simple("run_failed", payload),
        journal.ndjson_log,
    )?;
    Ok(())
}

pub fn list_runs(state_db: Option<PathBuf>) -> Result<()> {
    let store = JournalStore::open(&state_db.unwrap_or_else(default_state_db))?;
    let runs = store.list_runs(RUNS_LIST_LIMIT)?;
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {}  {:<9}  {}",
            run.id,
            run.started_at,
            run.status,
            run.summary_json
                .as_ref()
                .and_then(|s| serde_json::from_value::<SyncSummary>(s.clone()).ok())
                .map(|s| render_summary(&s))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub fn inspect_run(run_id: &str, state_db: Option<PathBuf>) -> Result<()> {
    let store = JournalStore::open(&state_db.unwrap_or_else(default_state_db))?;
    let run = store
        .get_run(run_id)?
        .ok_or_else(|| anyhow!("run not found: {run_id}"))?;
    let events = store.list_events(run_id)?;

    println!("run_id: {}", run.id);
    println!("status: {}", run.status);
    println!("started_at: {}", run.started_at);
    println!("finished_at: {}", run.finished_at.as_deref().unwrap_or("-"));
    println!("source: {}", run.source_key);
    println!("source_sha256: {}", run.source_sha256);
    if let Some(summary) = run.summary_json.as_ref() {
        println!("summary: {summary}");
    }

    let problems: Vec<&EventRow> = events
        .iter()
        .filter(|ev| {
            matches!(
                ev.event_type.as_str(),
                "row_skipped" | "row_build_failed" | "event_rejected" | "event_failed"
            )
        })
        .collect();
    if !problems.is_empty() {
        println!("pending_rows:");
        for ev in problems {
            println!(
                "  - {} uuid={} uid={} reason={}",
                ev.event_type,
                ev.source_uuid.as_deref().unwrap_or("-"),
                ev.event_uid.as_deref().unwrap_or("-"),
                problem_reason(&ev.payload_json)
            );
        }
    }

    let deleted: Vec<&str> = events
        .iter()
        .filter(|ev| ev.event_type == "entry_deleted")
        .filter_map(|ev| ev.source_uuid.as_deref())
        .collect();
    if !deleted.is_empty() {
        println!("flagged_deleted: {}", deleted.join(", "));
    }

    let duplicates: Vec<String> = events
        .iter()
        .filter(|ev| ev.event_type == "row_duplicate_uuid")
        .map(|ev| {
            format!(
                "{}@{}",
                ev.source_uuid.as_deref().unwrap_or("-"),
                ev.payload_json.get("row").and_then(|r| r.as_u64()).unwrap_or(0)
            )
        })
        .collect();
    if !duplicates.is_empty() {
        println!("duplicate_rows: {}", duplicates.join(", "));
    }
    Ok(())
}

fn problem_reason(payload: &serde_json::Value) -> String {
    if let Some(reason) = payload.get("reason").and_then(|r| r.as_str()) {
        return reason.to_string();
    }
    match payload.get("report") {
        Some(report) => format!(
            "import status {}",
            report.get("status").and_then(|s| s.as_str()).unwrap_or("unknown")
        ),
        None => payload.to_string(),
    }
}

fn render_summary(s: &SyncSummary) -> String {
    format!(
        "rows={} uploaded={} already_uploaded={} validated={} skipped={} build_failed={} rejected={} failed={} deleted={} missing_uuid={} duplicate_uuid={}",
        s.rows,
        s.uploaded,
        s.already_uploaded,
        s.validated,
        s.skipped,
        s.build_failed,
        s.rejected,
        s.failed,
        s.deleted,
        s.missing_uuid,
        s.duplicate_uuid
    )
}

pub(crate) fn append_event(
    store: &JournalStore,
    run_id: &str,
    ev: &NewEvent,
    ndjson_log: Option<&Path>,
) -> Result<Option<EventRow>> {
    let terminal = store.terminal_event(run_id)?;
    transitions::validate_transition(terminal.as_deref(), ev)?;
    let seq = store.append_event(run_id, ev)?;
    if let Some(seq) = seq {
        let inserted = store
            .get_event(seq)?
            .ok_or_else(|| anyhow!("event sequence {seq} was not readable"))?;
        if let Some(path) = ndjson_log {
            ndjson::mirror_event(path, &inserted)?;
        }
        Ok(Some(inserted))
    } else {
        Ok(None)
    }
}

pub(crate) fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}
