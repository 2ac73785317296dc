use kobo_dhis2_sync::index::uid::UidGenerator;
use kobo_dhis2_sync::index::{EventIndex, EventIndexEntry};
use kobo_dhis2_sync::journal::store::{JournalStore, RunRow};
use kobo_dhis2_sync::mapping::{MappingTable, OrgUnitMapping, parse_mapping_table, parse_org_units};
use kobo_dhis2_sync::run::artifacts::ArtifactWriter;
use kobo_dhis2_sync::run::{RunJournal, SyncContext, SyncSummary, sync_rows};
use kobo_dhis2_sync::source::SourceRow;
use kobo_dhis2_sync::tracker::job::{ManualClock, PollPolicy};
use kobo_dhis2_sync::tracker::{ImportMode, JobHandle, TrackerClient, TransportError};
use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

const JOB_URL: &str = "https://hmis.example.org/api/tracker/jobs/J1";

/// In-process tracker: accepts every POST, reports the job finished after
/// `completes_after` status checks, then serves a report with `report_status`.
struct FakeTracker {
    completes_after: Option<u32>,
    report_status: &'static str,
    fail_post: bool,
    posted: RefCell<Vec<Value>>,
    status_calls: Cell<u32>,
}

impl FakeTracker {
    fn completing_after(checks: u32) -> Self {
        Self {
            completes_after: Some(checks),
            report_status: "OK",
            fail_post: false,
            posted: RefCell::new(Vec::new()),
            status_calls: Cell::new(0),
        }
    }
}

impl TrackerClient for FakeTracker {
    fn post_events(&self, body: &Value) -> Result<Value, TransportError> {
        if self.fail_post {
            return Err(TransportError::Status {
                method: "POST",
                url: "https://hmis.example.org/api/tracker".to_string(),
                status: 503,
                body: "maintenance".to_string(),
            });
        }
        self.posted.borrow_mut().push(body.clone());
        Ok(json!({"status": "OK", "response": {"id": "J1", "location": JOB_URL}}))
    }

    fn job_status(&self, handle: &JobHandle) -> Result<Value, TransportError> {
        assert_eq!(handle.as_str(), JOB_URL);
        let calls = self.status_calls.get() + 1;
        self.status_calls.set(calls);
        match self.completes_after {
            Some(n) if calls >= n => Ok(json!([{"completed": true, "message": "Import complete"}])),
            _ => Ok(json!([])),
        }
    }

    fn job_report(&self, handle: &JobHandle) -> Result<Value, TransportError> {
        assert_eq!(handle.report_url(), format!("{JOB_URL}/report"));
        Ok(json!({"status": self.report_status, "stats": {"created": 1}}))
    }
}

/// Hands out `Uid00000001`, `Uid00000002`, ...
#[derive(Default)]
struct SequentialUids(u32);

impl UidGenerator for SequentialUids {
    fn generate(&mut self) -> String {
        self.0 += 1;
        format!("Uid{:08}", self.0)
    }
}

fn mapping() -> MappingTable {
    let raw = json!({
        "programStages": [{"programStageDataElements": [
            {"dataElement": {"id": "DE_X", "column": "X",
                "optionSet": {"id": "OS_YN"}, "optionSet-mapping": {"1": "Yes", "2": "No"}}}
        ]}]
    });
    parse_mapping_table(&raw.to_string(), "mapping_generated.json").unwrap()
}

fn org_units(raw: &str) -> OrgUnitMapping {
    parse_org_units(raw, "mapping_orgUnits.json").unwrap()
}

fn row(uuid: &str, facility: &str, x: &str) -> SourceRow {
    SourceRow::from_pairs([
        ("_uuid", uuid),
        ("FACILITY", facility),
        ("ASSESSMENT_DATE", "2024-01-01"),
        ("X", x),
    ])
}

fn journal_store(dir: &Path, run_id: &str) -> JournalStore {
    let store = JournalStore::open(&dir.join("journal.db")).unwrap();
    store
        .create_run(&RunRow {
            id: run_id.to_string(),
            started_at: "2024-01-01T00:00:00Z".to_string(),
            finished_at: None,
            source_key: "memory://kobo.csv".to_string(),
            source_sha256: "0".repeat(64),
            status: "running".to_string(),
            summary_json: None,
        })
        .unwrap();
    store
}

struct Harness<'a> {
    mapping: MappingTable,
    org_units: OrgUnitMapping,
    import_mode: ImportMode,
    poll: PollPolicy,
    artifacts: Option<&'a ArtifactWriter>,
}

impl<'a> Harness<'a> {
    fn new() -> Self {
        Self {
            mapping: mapping(),
            org_units: org_units(r#"{"F1": "OU1"}"#),
            import_mode: ImportMode::Commit,
            poll: PollPolicy {
                interval: Duration::from_secs(5),
                max_wait: Duration::from_secs(30),
            },
            artifacts: None,
        }
    }

    fn run(
        &self,
        tracker: &FakeTracker,
        index: &mut EventIndex,
        ids: &mut SequentialUids,
        rows: &[SourceRow],
        journal_dir: &Path,
        run_id: &str,
    ) -> SyncSummary {
        let store = journal_store(journal_dir, run_id);
        let clock = ManualClock::default();
        let ctx = SyncContext {
            mapping: &self.mapping,
            org_units: &self.org_units,
            program: "PRG",
            import_mode: self.import_mode,
            client: tracker,
            clock: &clock,
            poll: self.poll,
            artifacts: self.artifacts,
        };
        let journal = RunJournal {
            store: &store,
            run_id,
            ndjson_log: None,
        };
        sync_rows(&ctx, index, ids, rows, &journal).unwrap()
    }
}

fn event_types(dir: &Path, run_id: &str) -> Vec<String> {
    JournalStore::open(&dir.join("journal.db"))
        .unwrap()
        .list_events(run_id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

#[test]
fn single_row_is_built_submitted_and_marked_uploaded() {
    let tmp = tempdir().unwrap();
    let harness = Harness::new();
    let tracker = FakeTracker::completing_after(1);
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();

    let summary = harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("u1", "F1", "1")],
        tmp.path(),
        "r1",
    );

    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.pending(), 0);
    assert_eq!(
        tracker.posted.borrow().as_slice(),
        &[json!({"events": [{
            "event": "Uid00000001",
            "occurredAt": "2024-01-01",
            "completedAt": "2024-01-01",
            "status": "COMPLETED",
            "orgUnit": "OU1",
            "dataValues": [{"dataElement": "DE_X", "value": "Yes"}],
            "program": "PRG"
        }]})]
    );

    let saved: Value = serde_json::from_slice(&index.to_json_bytes().unwrap()).unwrap();
    assert_eq!(
        saved,
        json!({"u1": {"dhis2_uuid": "Uid00000001", "uploaded": true, "deleted": false}})
    );
    assert_eq!(
        event_types(tmp.path(), "r1"),
        vec!["event_submitted", "event_uploaded"]
    );
}

#[test]
fn uploaded_rows_are_not_resubmitted() {
    let tmp = tempdir().unwrap();
    let harness = Harness::new();
    let tracker = FakeTracker::completing_after(1);
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();
    let rows = [row("u1", "F1", "1")];

    harness.run(&tracker, &mut index, &mut ids, &rows, tmp.path(), "r1");
    let second = harness.run(&tracker, &mut index, &mut ids, &rows, tmp.path(), "r2");

    assert_eq!(tracker.posted.borrow().len(), 1);
    assert_eq!(second.already_uploaded, 1);
    assert_eq!(second.uploaded, 0);
    assert_eq!(event_types(tmp.path(), "r2"), vec!["row_already_uploaded"]);
}

#[test]
fn skipped_row_keeps_its_uid_and_uploads_once_mapped() {
    let tmp = tempdir().unwrap();
    let mut harness = Harness::new();
    let tracker = FakeTracker::completing_after(1);
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();
    let rows = [row("u1", "F2", "1")];

    let first = harness.run(&tracker, &mut index, &mut ids, &rows, tmp.path(), "r1");
    assert_eq!(first.skipped, 1);
    assert!(tracker.posted.borrow().is_empty());
    let uid = index.get("u1").unwrap().event_uid.clone();
    assert!(!index.get("u1").unwrap().uploaded);

    harness.org_units = org_units(r#"{"F1": "OU1", "F2": "OU2"}"#);
    let second = harness.run(&tracker, &mut index, &mut ids, &rows, tmp.path(), "r2");
    assert_eq!(second.uploaded, 1);
    assert_eq!(index.get("u1").unwrap().event_uid, uid);
    assert_eq!(tracker.posted.borrow()[0]["events"][0]["event"], json!(uid));
    assert_eq!(tracker.posted.borrow()[0]["events"][0]["orgUnit"], "OU2");
}

#[test]
fn unmapped_option_value_fails_the_row_only() {
    let tmp = tempdir().unwrap();
    let harness = Harness::new();
    let tracker = FakeTracker::completing_after(1);
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();

    let summary = harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("u1", "F1", "9"), row("u2", "F1", "2")],
        tmp.path(),
        "r1",
    );

    assert_eq!(summary.build_failed, 1);
    assert_eq!(summary.uploaded, 1);
    assert!(!index.get("u1").unwrap().uploaded);
    assert!(index.get("u2").unwrap().uploaded);

    let store = JournalStore::open(&tmp.path().join("journal.db")).unwrap();
    let history = store.history_for_source("u1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, "row_build_failed");
    assert!(
        history[0].payload_json["reason"]
            .as_str()
            .unwrap()
            .contains("\"9\"")
    );
    assert!(
        history[0].payload_json["reason"]
            .as_str()
            .unwrap()
            .contains("option set OS_YN of data element DE_X")
    );
}

#[test]
fn failed_submission_retries_with_the_same_uid() {
    let tmp = tempdir().unwrap();
    let harness = Harness::new();
    let mut down = FakeTracker::completing_after(1);
    down.fail_post = true;
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();
    let rows = [row("u1", "F1", "1")];

    let first = harness.run(&down, &mut index, &mut ids, &rows, tmp.path(), "r1");
    assert_eq!(first.failed, 1);
    assert!(!index.get("u1").unwrap().uploaded);

    let up = FakeTracker::completing_after(1);
    let second = harness.run(&up, &mut index, &mut ids, &rows, tmp.path(), "r2");
    assert_eq!(second.uploaded, 1);
    assert_eq!(up.posted.borrow()[0]["events"][0]["event"], "Uid00000001");
}

#[test]
fn poll_timeout_leaves_row_pending() {
    let tmp = tempdir().unwrap();
    let harness = Harness::new();
    let tracker = FakeTracker {
        completes_after: None,
        ..FakeTracker::completing_after(0)
    };
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();

    let summary = harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("u1", "F1", "1")],
        tmp.path(),
        "r1",
    );

    assert_eq!(summary.failed, 1);
    assert_eq!(tracker.status_calls.get(), 6);
    assert!(!index.get("u1").unwrap().uploaded);
    let store = JournalStore::open(&tmp.path().join("journal.db")).unwrap();
    let failed = store.history_for_source("u1").unwrap().pop().unwrap();
    assert_eq!(failed.event_type, "event_failed");
    assert_eq!(failed.payload_json["stage"], "poll");
    assert_eq!(failed.payload_json["checks"], 6);
}

#[test]
fn error_report_rejects_row() {
    let tmp = tempdir().unwrap();
    let harness = Harness::new();
    let tracker = FakeTracker {
        report_status: "ERROR",
        ..FakeTracker::completing_after(2)
    };
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();

    let summary = harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("u1", "F1", "1")],
        tmp.path(),
        "r1",
    );

    assert_eq!(summary.rejected, 1);
    assert!(!index.get("u1").unwrap().uploaded);
    assert_eq!(
        event_types(tmp.path(), "r1"),
        vec!["event_submitted", "event_rejected"]
    );
}

#[test]
fn validate_mode_never_marks_uploaded() {
    let tmp = tempdir().unwrap();
    let mut harness = Harness::new();
    harness.import_mode = ImportMode::Validate;
    let tracker = FakeTracker::completing_after(1);
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();

    let summary = harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("u1", "F1", "1")],
        tmp.path(),
        "r1",
    );

    assert_eq!(summary.validated, 1);
    assert_eq!(summary.uploaded, 0);
    assert!(!index.get("u1").unwrap().uploaded);
}

#[test]
fn rows_without_uuid_are_skipped_and_not_indexed() {
    let tmp = tempdir().unwrap();
    let harness = Harness::new();
    let tracker = FakeTracker::completing_after(1);
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();

    let summary = harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("NA", "F1", "1"), row("", "F1", "1")],
        tmp.path(),
        "r1",
    );

    assert_eq!(summary.missing_uuid, 2);
    assert!(index.is_empty());
    assert!(tracker.posted.borrow().is_empty());
}

#[test]
fn repeated_uuid_rows_are_journaled_and_not_resubmitted() {
    let tmp = tempdir().unwrap();
    let harness = Harness::new();
    let tracker = FakeTracker::completing_after(1);
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();

    let summary = harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("u1", "F1", "1"), row("u1", "F1", "2"), row("u1", "F1", "1")],
        tmp.path(),
        "r1",
    );

    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.duplicate_uuid, 2);
    assert_eq!(tracker.posted.borrow().len(), 1);
    assert_eq!(index.len(), 1);

    let events = JournalStore::open(&tmp.path().join("journal.db"))
        .unwrap()
        .list_events("r1")
        .unwrap();
    let duplicates: Vec<(Option<&str>, Value)> = events
        .iter()
        .filter(|e| e.event_type == "row_duplicate_uuid")
        .map(|e| (e.event_uid.as_deref(), e.payload_json.clone()))
        .collect();
    assert_eq!(
        duplicates,
        vec![
            (Some("Uid00000001"), json!({"row": 2})),
            (Some("Uid00000001"), json!({"row": 3})),
        ]
    );
}

#[test]
fn entries_missing_from_source_are_flagged_deleted() {
    let tmp = tempdir().unwrap();
    let harness = Harness::new();
    let tracker = FakeTracker::completing_after(1);
    let entry = |uid: &str, uploaded: bool| EventIndexEntry {
        event_uid: uid.to_string(),
        uploaded,
        deleted: false,
    };
    let mut index = EventIndex::from_entries(BTreeMap::from([
        ("u1".to_string(), entry("Uid00000901", true)),
        ("gone".to_string(), entry("Uid00000902", true)),
    ]));
    let mut ids = SequentialUids::default();

    let summary = harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("u1", "F1", "1")],
        tmp.path(),
        "r1",
    );
    assert_eq!(summary.deleted, 1);
    assert!(index.get("gone").unwrap().deleted);
    assert!(!index.get("u1").unwrap().deleted);
    assert_eq!(
        event_types(tmp.path(), "r1"),
        vec!["row_already_uploaded", "entry_deleted"]
    );

    // A returning uuid keeps its deleted flag and is not flagged again.
    let summary = harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("u1", "F1", "1"), row("gone", "F1", "1")],
        tmp.path(),
        "r2",
    );
    assert_eq!(summary.deleted, 0);
    assert!(index.get("gone").unwrap().deleted);
}

#[test]
fn artifacts_capture_payload_and_report() {
    let tmp = tempdir().unwrap();
    let writer = ArtifactWriter::with_date(&tmp.path().join("events_payload"), "2024-01-02");
    std::fs::create_dir_all(tmp.path().join("events_payload")).unwrap();
    let mut harness = Harness::new();
    harness.artifacts = Some(&writer);
    let tracker = FakeTracker::completing_after(1);
    let mut index = EventIndex::default();
    let mut ids = SequentialUids::default();

    harness.run(
        &tracker,
        &mut index,
        &mut ids,
        &[row("u1", "F1", "1")],
        tmp.path(),
        "r1",
    );

    let payload: Value =
        serde_json::from_slice(&std::fs::read(writer.payload_path("u1", "Uid00000001")).unwrap())
            .unwrap();
    assert_eq!(payload["orgUnit"], "OU1");
    let report: Value =
        serde_json::from_slice(&std::fs::read(writer.report_path("u1", "Uid00000001")).unwrap())
            .unwrap();
    assert_eq!(report["status"], "OK");
}
