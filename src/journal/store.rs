use crate::journal::{EventRow, NewEvent, schema};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub source_key: String,
    pub source_sha256: String,
    pub status: String,
    pub summary_json: Option<Value>,
}

pub const TERMINAL_EVENTS: [&str; 2] = ["run_completed", "run_failed"];

pub struct JournalStore {
    conn: Connection,
}

impl JournalStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create journal parent dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn create_run(&self, row: &RunRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO runs (id, started_at, finished_at, source_key, source_sha256, status, summary_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id,
                row.started_at,
                row.finished_at,
                row.source_key,
                row.source_sha256,
                row.status,
                row.summary_json.as_ref().map(|v| v.to_string())
            ],
        )?;
        Ok(())
    }

    pub fn set_source_sha256(&self, run_id: &str, sha256: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET source_sha256 = ?2 WHERE id = ?1",
            params![run_id, sha256],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: &str, status: &str, summary: &Value) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET status = ?2, finished_at = ?3, summary_json = ?4 WHERE id = ?1",
            params![run_id, status, Utc::now().to_rfc3339(), summary.to_string()],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRow>> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, source_key, source_sha256, status, summary_json FROM runs WHERE id = ?1",
                params![run_id],
                map_run_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, source_key, source_sha256, status, summary_json
             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], map_run_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn append_event(&self, run_id: &str, event: &NewEvent) -> Result<Option<i64>> {
        let ts = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO events (run_id, ts, event_type, source_uuid, event_uid, payload_json, dedupe_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                ts,
                event.event_type,
                event.source_uuid,
                event.event_uid,
                event.payload_json.to_string(),
                event.dedupe_key
            ],
        )?;
        let seq = if inserted == 0 {
            None
        } else {
            Some(tx.last_insert_rowid())
        };
        tx.commit()?;
        Ok(seq)
    }

    pub fn get_event(&self, seq: i64) -> Result<Option<EventRow>> {
        self.conn
            .query_row(
                "SELECT seq, run_id, ts, event_type, source_uuid, event_uid, payload_json, dedupe_key
                 FROM events WHERE seq = ?1",
                params![seq],
                map_event_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_events(&self, run_id: &str) -> Result<Vec<EventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, run_id, ts, event_type, source_uuid, event_uid, payload_json, dedupe_key
             FROM events WHERE run_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], map_event_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every journaled event for one source record, across runs.
    pub fn history_for_source(&self, source_uuid: &str) -> Result<Vec<EventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, run_id, ts, event_type, source_uuid, event_uid, payload_json, dedupe_key
             FROM events WHERE source_uuid = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![source_uuid], map_event_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn terminal_event(&self, run_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT event_type FROM events WHERE run_id = ?1 AND event_type IN (?2, ?3) ORDER BY seq ASC LIMIT 1",
                params![run_id, TERMINAL_EVENTS[0], TERMINAL_EVENTS[1]],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(Into::into)
    }
}

fn map_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    let summary: Option<String> = row.get(6)?;
    Ok(RunRow {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        source_key: row.get(3)?,
        source_sha256: row.get(4)?,
        status: row.get(5)?,
        summary_json: summary.map(|s| serde_json::from_str(&s).unwrap_or(Value::Null)),
    })
}

fn map_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    let payload_str: String = row.get(6)?;
    Ok(EventRow {
        seq: row.get(0)?,
        run_id: row.get(1)?,
        ts: row.get(2)?,
        event_type: row.get(3)?,
        source_uuid: row.get(4)?,
        event_uid: row.get(5)?,
        payload_json: serde_json::from_str(&payload_str).unwrap_or(Value::Null),
        dedupe_key: row.get(7)?,
    })
}
