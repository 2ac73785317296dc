use crate::events::{EventPayload, TrackerPayload};
use crate::tracker::state::{InvalidTransition, SubmissionState, validate_transition};
use crate::tracker::{JobHandle, TrackerClient, TransportError};
use serde_json::Value;
use std::cell::Cell;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const REPORT_STATUS_OK: &str = "OK";

/// Time source for the polling loop.
pub trait Clock {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when slept on.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
    sleeps: Cell<u32>,
}

impl ManualClock {
    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
        self.sleeps.set(self.sleeps.get() + 1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(600),
        }
    }
}

/// Terminal result of a completed job. Completion says nothing about success;
/// the report's top-level `status` does.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    CompletedOk(Value),
    CompletedError(Value),
}

impl JobOutcome {
    pub fn report(&self) -> &Value {
        match self {
            Self::CompletedOk(report) | Self::CompletedError(report) => report,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::CompletedOk(_))
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("encode tracker payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("tracker response has no `response.location`: {body}")]
    MissingLocation { body: String },
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("job did not complete within {waited:?} ({checks} status checks)")]
    Timeout { waited: Duration, checks: u32 },
    #[error("unexpected job status shape: {body}")]
    MalformedStatus { body: String },
    #[error(transparent)]
    State(#[from] InvalidTransition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Pending,
    Completed,
}

/// One accepted submission and where it is in its lifecycle.
#[derive(Debug)]
pub struct Submission {
    handle: JobHandle,
    state: SubmissionState,
    status_checks: u32,
}

impl Submission {
    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn status_checks(&self) -> u32 {
        self.status_checks
    }

    fn advance(&mut self, to: SubmissionState) -> Result<(), InvalidTransition> {
        validate_transition(self.state, to)?;
        self.state = to;
        Ok(())
    }
}

pub fn submit(client: &dyn TrackerClient, events: &[EventPayload]) -> Result<Submission, SubmitError> {
    let body = serde_json::to_value(TrackerPayload { events })?;
    let response = client.post_events(&body)?;
    let location = response
        .get("response")
        .and_then(|r| r.get("location"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| SubmitError::MissingLocation {
            body: response.to_string(),
        })?;
    Ok(Submission {
        handle: JobHandle::new(location),
        state: SubmissionState::Submitted,
        status_checks: 0,
    })
}

pub fn poll_until_complete(
    client: &dyn TrackerClient,
    clock: &dyn Clock,
    policy: PollPolicy,
    submission: &mut Submission,
) -> Result<JobOutcome, PollError> {
    submission.advance(SubmissionState::Polling)?;
    let started = clock.now();

    loop {
        let status = client.job_status(&submission.handle)?;
        submission.status_checks += 1;
        if classify_status(&status)? == JobStatus::Completed {
            tracing::debug!(job = submission.handle.as_str(), checks = submission.status_checks, "job finished");
            break;
        }

        let waited = clock.now().saturating_sub(started);
        if waited + policy.interval >= policy.max_wait {
            return Err(PollError::Timeout {
                waited,
                checks: submission.status_checks,
            });
        }
        tracing::debug!(
            job = submission.handle.as_str(),
            wait_secs = policy.interval.as_secs(),
            "job not finished"
        );
        clock.sleep(policy.interval);
    }

    let report = client.job_report(&submission.handle)?;
    if report.get("status").and_then(Value::as_str) == Some(REPORT_STATUS_OK) {
        submission.advance(SubmissionState::CompletedOk)?;
        Ok(JobOutcome::CompletedOk(report))
    } else {
        submission.advance(SubmissionState::CompletedError)?;
        Ok(JobOutcome::CompletedError(report))
    }
}

// Empty bodies mean the job is not registered yet. Anything that is not a list
// of objects is surfaced instead of retried.
fn classify_status(body: &Value) -> Result<JobStatus, PollError> {
    let pending = match body {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if pending {
        return Ok(JobStatus::Pending);
    }

    match body.as_array().and_then(|items| items.first()) {
        Some(Value::Object(first)) => {
            if first.get("completed") == Some(&Value::Bool(true)) {
                Ok(JobStatus::Completed)
            } else {
                Ok(JobStatus::Pending)
            }
        }
        _ => Err(PollError::MalformedStatus {
            body: body.to_string(),
        }),
    }
}
