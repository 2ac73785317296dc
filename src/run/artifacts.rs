use crate::events::EventPayload;
use crate::json::to_pretty_bytes;
use anyhow::{Context, Result};
use chrono::Local;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    date: String,
}

impl ArtifactWriter {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create artifacts dir {}", dir.display()))?;
        Ok(Self::with_date(dir, &Local::now().format("%Y-%m-%d").to_string()))
    }

    pub fn with_date(dir: &Path, date: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            date: date.to_string(),
        }
    }

    pub fn payload_path(&self, source_uuid: &str, event_uid: &str) -> PathBuf {
        self.dir
            .join(format!("{}__{source_uuid}_{event_uid}.json", self.date))
    }

    pub fn report_path(&self, source_uuid: &str, event_uid: &str) -> PathBuf {
        self.dir.join(format!(
            "{}__{source_uuid}_{event_uid}__response_event_payload.json",
            self.date
        ))
    }

    pub fn write_payload(&self, source_uuid: &str, payload: &EventPayload) -> Result<PathBuf> {
        // Through Value so object keys come out sorted.
        let value = serde_json::to_value(payload)?;
        let path = self.payload_path(source_uuid, &payload.event);
        write_json(&path, &value)?;
        Ok(path)
    }

    pub fn write_report(&self, source_uuid: &str, event_uid: &str, report: &Value) -> Result<PathBuf> {
        let path = self.report_path(source_uuid, event_uid);
        write_json(&path, report)?;
        Ok(path)
    }
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let bytes = to_pretty_bytes(value)?;
    std::fs::write(path, bytes).with_context(|| format!("write artifact {}", path.display()))
}
