pub mod http;
pub mod job;
pub mod state;

use serde_json::Value;
use thiserror::Error;

pub use http::HttpTrackerClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Commit,
    Validate,
}

impl ImportMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "COMMIT",
            Self::Validate => "VALIDATE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMMIT" => Some(Self::Commit),
            "VALIDATE" => Some(Self::Validate),
            _ => None,
        }
    }
}

/// Location of an asynchronous tracker import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn report_url(&self) -> String {
        format!("{}/report", self.0.trim_end_matches('/'))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{method} {url}: {message}")]
    Request {
        method: &'static str,
        url: String,
        message: String,
    },
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[error("{method} {url} returned a non-JSON body: {message}")]
    Decode {
        method: &'static str,
        url: String,
        message: String,
    },
}

/// The three tracker calls the submission protocol needs. Each returns the
/// decoded JSON body; an empty body decodes to `Value::Null`.
pub trait TrackerClient {
    fn post_events(&self, body: &Value) -> Result<Value, TransportError>;
    fn job_status(&self, handle: &JobHandle) -> Result<Value, TransportError>;
    fn job_report(&self, handle: &JobHandle) -> Result<Value, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_url_appends_suffix() {
        let handle = JobHandle::new("https://hmis.example.org/api/tracker/jobs/abc/");
        assert_eq!(
            handle.report_url(),
            "https://hmis.example.org/api/tracker/jobs/abc/report"
        );
    }

    #[test]
    fn import_mode_parses_case_insensitively() {
        assert_eq!(ImportMode::parse("commit"), Some(ImportMode::Commit));
        assert_eq!(ImportMode::parse(" VALIDATE "), Some(ImportMode::Validate));
        assert_eq!(ImportMode::parse("dry"), None);
    }
}
