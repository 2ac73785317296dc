use crate::journal::EventRow;
use anyhow::{Context, Result};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

pub fn mirror_event(path: &Path, ev: &EventRow) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open event log {}", path.display()))?;
    let line = json!({
        "seq": ev.seq,
        "ts": ev.ts,
        "event": ev.event_type,
        "source_uuid": ev.source_uuid,
        "event_uid": ev.event_uid
    });
    writeln!(f, "{}", line)?;
    Ok(())
}
