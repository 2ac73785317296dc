use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Submitted,
    Polling,
    CompletedOk,
    CompletedError,
}

impl SubmissionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::CompletedOk => "completed_ok",
            Self::CompletedError => "completed_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid submission transition: {} -> {}", .from.as_str(), .to.as_str())]
pub struct InvalidTransition {
    pub from: SubmissionState,
    pub to: SubmissionState,
}

/// Submitted -> Polling -> CompletedOk | CompletedError. Nothing is skipped and
/// nothing is revisited.
pub fn validate_transition(
    from: SubmissionState,
    to: SubmissionState,
) -> Result<(), InvalidTransition> {
    use SubmissionState::*;
    match (from, to) {
        (Submitted, Polling) | (Polling, CompletedOk) | (Polling, CompletedError) => Ok(()),
        _ => Err(InvalidTransition { from, to }),
    }
}
