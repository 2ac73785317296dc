use crate::journal::NewEvent;
use crate::journal::store::TERMINAL_EVENTS;
use anyhow::{Result, bail};

const ROW_EVENTS: [&str; 10] = [
    "row_skipped",
    "row_duplicate_uuid",
    "row_build_failed",
    "row_already_uploaded",
    "event_submitted",
    "event_uploaded",
    "event_validated",
    "event_rejected",
    "event_failed",
    "entry_deleted",
];

pub fn validate_transition(terminal: Option<&str>, next: &NewEvent) -> Result<()> {
    let is_terminal = TERMINAL_EVENTS.contains(&next.event_type.as_str());

    if let Some(existing) = terminal {
        if is_terminal {
            bail!("invalid transition: run terminal event already exists ({existing})")
        }
        bail!("invalid transition: run already terminal ({existing})")
    }

    if ROW_EVENTS.contains(&next.event_type.as_str()) && next.source_uuid.is_none() {
        bail!("{} missing source_uuid", next.event_type)
    }

    if next.event_type == "run_started" && !next.payload_json.is_object() {
        bail!("run_started requires an object payload")
    }

    Ok(())
}
