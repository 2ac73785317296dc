use crate::events::builder::{BuildOutcome, build_event};
use crate::index::EventIndex;
use crate::index::uid::UidGenerator;
use crate::journal::NewEvent;
use crate::journal::store::JournalStore;
use crate::mapping::{MappingTable, OrgUnitMapping};
use crate::run::append_event;
use crate::run::artifacts::ArtifactWriter;
use crate::source::{SourceRow, UUID_COLUMN};
use crate::tracker::job::{Clock, JobOutcome, PollPolicy, poll_until_complete, submit};
use crate::tracker::{ImportMode, TrackerClient};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;

pub struct SyncContext<'a> {
    pub mapping: &'a MappingTable,
    pub org_units: &'a OrgUnitMapping,
    pub program: &'a str,
    pub import_mode: ImportMode,
    pub client: &'a dyn TrackerClient,
    pub clock: &'a dyn Clock,
    pub poll: PollPolicy,
    pub artifacts: Option<&'a ArtifactWriter>,
}

pub struct RunJournal<'a> {
    pub store: &'a JournalStore,
    pub run_id: &'a str,
    pub ndjson_log: Option<&'a Path>,
}

impl RunJournal<'_> {
    fn record(&self, ev: NewEvent) -> Result<()> {
        append_event(self.store, self.run_id, &ev, self.ndjson_log)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSummary {
    pub rows: usize,
    pub missing_uuid: usize,
    pub duplicate_uuid: usize,
    pub already_uploaded: usize,
    pub uploaded: usize,
    pub validated: usize,
    pub skipped: usize,
    pub build_failed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub deleted: usize,
}

impl SyncSummary {
    pub fn pending(&self) -> usize {
        self.skipped + self.build_failed + self.rejected + self.failed + self.validated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    AlreadyUploaded,
    Uploaded,
    Validated,
    Skipped,
    BuildFailed,
    Rejected,
    Failed,
}

pub fn sync_rows(
    ctx: &SyncContext<'_>,
    index: &mut EventIndex,
    ids: &mut dyn UidGenerator,
    rows: &[SourceRow],
    journal: &RunJournal<'_>,
) -> Result<SyncSummary> {
    let mut summary = SyncSummary {
        rows: rows.len(),
        ..SyncSummary::default()
    };
    let mut seen = HashSet::new();

    for (line, row) in rows.iter().enumerate() {
        let Some(source_uuid) = row.source_uuid() else {
            tracing::warn!(row = line + 1, "row has no {UUID_COLUMN}; skipping");
            summary.missing_uuid += 1;
            continue;
        };
        if !seen.insert(source_uuid.to_string()) {
            tracing::warn!(
                row = line + 1,
                source_uuid,
                "{UUID_COLUMN} repeats an earlier row; skipping"
            );
            let event_uid = index
                .get(source_uuid)
                .map(|e| e.event_uid.clone())
                .unwrap_or_default();
            journal.record(NewEvent {
                dedupe_key: Some(format!("row_duplicate_uuid:{source_uuid}:{}", line + 1)),
                ..NewEvent::for_row(
                    "row_duplicate_uuid",
                    source_uuid,
                    &event_uid,
                    json!({"row": line + 1}),
                )
            })?;
            summary.duplicate_uuid += 1;
            continue;
        }

        let (entry, created) = index.get_or_create(source_uuid, ids)?;
        let event_uid = entry.event_uid.clone();
        let uploaded = entry.uploaded;

        let span = tracing::info_span!("row", source_uuid, event_uid = event_uid.as_str());
        let _entered = span.enter();
        if created {
            tracing::debug!("assigned new event uid");
        }

        let outcome = if uploaded {
            tracing::debug!("already uploaded");
            journal.record(NewEvent::for_row(
                "row_already_uploaded",
                source_uuid,
                &event_uid,
                json!({}),
            ))?;
            RowOutcome::AlreadyUploaded
        } else {
            process_row(ctx, index, row, source_uuid, &event_uid, journal)?
        };

        match outcome {
            RowOutcome::AlreadyUploaded => summary.already_uploaded += 1,
            RowOutcome::Uploaded => summary.uploaded += 1,
            RowOutcome::Validated => summary.validated += 1,
            RowOutcome::Skipped => summary.skipped += 1,
            RowOutcome::BuildFailed => summary.build_failed += 1,
            RowOutcome::Rejected => summary.rejected += 1,
            RowOutcome::Failed => summary.failed += 1,
        }
    }

    let flagged = index.reconcile_deleted(&seen);
    for source_uuid in &flagged {
        let event_uid = index
            .get(source_uuid)
            .map(|e| e.event_uid.clone())
            .unwrap_or_default();
        tracing::warn!(
            source_uuid = source_uuid.as_str(),
            event_uid = event_uid.as_str(),
            "record no longer in source; flagged deleted"
        );
        journal.record(NewEvent::for_row(
            "entry_deleted",
            source_uuid,
            &event_uid,
            json!({}),
        ))?;
    }
    summary.deleted = flagged.len();

    Ok(summary)
}

fn process_row(
    ctx: &SyncContext<'_>,
    index: &mut EventIndex,
    row: &SourceRow,
    source_uuid: &str,
    event_uid: &str,
    journal: &RunJournal<'_>,
) -> Result<RowOutcome> {
    let payload = match build_event(row, ctx.mapping, ctx.org_units, ctx.program, event_uid) {
        Ok(BuildOutcome::Ready(payload)) => payload,
        Ok(BuildOutcome::Skip(signal)) => {
            tracing::warn!(
                facility = signal.facility.as_deref().unwrap_or("NA"),
                "skipping row: {}",
                signal.reason.as_str()
            );
            journal.record(NewEvent::for_row(
                "row_skipped",
                source_uuid,
                event_uid,
                json!({"reason": signal.reason.as_str(), "facility": signal.facility}),
            ))?;
            return Ok(RowOutcome::Skipped);
        }
        Err(err) => {
            tracing::error!(error = %err, "cannot build event");
            journal.record(NewEvent::for_row(
                "row_build_failed",
                source_uuid,
                event_uid,
                json!({"reason": err.to_string()}),
            ))?;
            return Ok(RowOutcome::BuildFailed);
        }
    };

    if let Some(artifacts) = ctx.artifacts {
        if let Err(err) = artifacts.write_payload(source_uuid, &payload) {
            tracing::warn!(error = %err, "could not write payload artifact");
        }
    }

    let mut submission = match submit(ctx.client, std::slice::from_ref(&payload)) {
        Ok(submission) => submission,
        Err(err) => {
            tracing::error!(error = %err, "submission failed");
            journal.record(NewEvent::for_row(
                "event_failed",
                source_uuid,
                event_uid,
                json!({"stage": "submit", "reason": err.to_string()}),
            ))?;
            return Ok(RowOutcome::Failed);
        }
    };
    tracing::info!(job = submission.handle().as_str(), "event submitted");
    journal.record(NewEvent::for_row(
        "event_submitted",
        source_uuid,
        event_uid,
        json!({"job": submission.handle().as_str(), "import_mode": ctx.import_mode.as_str()}),
    ))?;

    let outcome = match poll_until_complete(ctx.client, ctx.clock, ctx.poll, &mut submission) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(error = %err, checks = submission.status_checks(), "job polling failed");
            journal.record(NewEvent::for_row(
                "event_failed",
                source_uuid,
                event_uid,
                json!({
                    "stage": "poll",
                    "reason": err.to_string(),
                    "checks": submission.status_checks()
                }),
            ))?;
            return Ok(RowOutcome::Failed);
        }
    };

    if let Some(artifacts) = ctx.artifacts {
        if let Err(err) = artifacts.write_report(source_uuid, event_uid, outcome.report()) {
            tracing::warn!(error = %err, "could not write report artifact");
        }
    }

    match outcome {
        JobOutcome::CompletedOk(_) if ctx.import_mode == ImportMode::Validate => {
            tracing::info!("event validated; not marked uploaded");
            journal.record(NewEvent::for_row(
                "event_validated",
                source_uuid,
                event_uid,
                json!({"checks": submission.status_checks()}),
            ))?;
            Ok(RowOutcome::Validated)
        }
        JobOutcome::CompletedOk(_) => {
            index.mark_uploaded(source_uuid)?;
            tracing::info!("event uploaded");
            journal.record(NewEvent::for_row(
                "event_uploaded",
                source_uuid,
                event_uid,
                json!({"checks": submission.status_checks()}),
            ))?;
            Ok(RowOutcome::Uploaded)
        }
        JobOutcome::CompletedError(report) => {
            tracing::error!(report = %report, "import report is not OK");
            journal.record(NewEvent::for_row(
                "event_rejected",
                source_uuid,
                event_uid,
                json!({"report": report}),
            ))?;
            Ok(RowOutcome::Rejected)
        }
    }
}
