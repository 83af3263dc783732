//! Terminal upload outcomes.

use std::time::Duration;

use fotoferry_protocol::ApiResponse;
use fotoferry_transport::TransportError;
use thiserror::Error;

/// Why an upload was cancelled. Recorded at most once per task; the
/// first cause wins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelCause {
    #[error("upload killed")]
    User,
    #[error("upload stalled after {since_start:?}")]
    Stalled { since_start: Duration },
}

/// Failure of an upload attempt.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server answered {status} {status_text}: {body}")]
    Protocol {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("response did not decode: {0}")]
    Decode(String),

    /// Programmer-visible invariant violation. Always logged at error
    /// level, never silently swallowed.
    #[error("logic error: {0}")]
    Logic(String),
}

impl From<TransportError> for UploadError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(e) => UploadError::Network(e.to_string()),
            TransportError::Protocol {
                status,
                status_text,
                body,
            } => UploadError::Protocol {
                status,
                status_text,
                body,
            },
            TransportError::Decode(e) => UploadError::Decode(e.to_string()),
            TransportError::InvalidConfig(msg) => UploadError::Logic(msg),
        }
    }
}

/// Terminal value of one upload attempt. Exactly one is produced and
/// delivered through `await_result`; every non-Success outcome means
/// the media did not upload.
#[derive(Debug)]
pub enum UploadOutcome {
    Success(ApiResponse),
    Failed {
        error: UploadError,
        /// A cancellation that raced with the failure, chained so the
        /// reason is never lost.
        cancel_cause: Option<CancelCause>,
    },
    Cancelled(CancelCause),
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadOutcome::Cancelled(_))
    }
}
