use rusqlite::{Connection, Result};

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            source_key TEXT NOT NULL,
            source_sha256 TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('running','completed','failed')),
            summary_json TEXT
        );

        CREATE TABLE IF NOT EXISTS events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(id),
            ts TEXT NOT NULL,
            event_type TEXT NOT NULL,
            source_uuid TEXT,
            event_uid TEXT,
            payload_json TEXT NOT NULL,
            dedupe_key TEXT,
            FOREIGN KEY(run_id) REFERENCES runs(id)
        );

        CREATE INDEX IF NOT EXISTS idx_events_run_seq ON events(run_id, seq);
        CREATE INDEX IF NOT EXISTS idx_events_source_seq ON events(source_uuid, seq);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_run_dedupe ON events(run_id, dedupe_key) WHERE dedupe_key IS NOT NULL;
        ",
    )?;

    Ok(())
}
