//! Progress events.
//!
//! Progress is an integer in [0, 1000]: 0 not started, 1–969 the
//! byte-streaming fraction of the attachment, 970–998 the synthetic
//! "server is processing" band, 999 response received, 1000 terminal
//! regardless of outcome. Values are non-decreasing per upload except
//! the forced jump to 1000 at termination.

/// Highest value the byte-streaming fraction reports.
pub const PROGRESS_STREAM_LIMIT: u16 = 969;

/// Body fully streamed; waiting on the server.
pub const PROGRESS_AWAITING: u16 = 970;

/// Cap of the synthetic waiting band.
pub const PROGRESS_WAIT_CAP: u16 = 998;

/// Response received and being parsed.
pub const PROGRESS_PARSING: u16 = 999;

/// Terminal, for every outcome.
pub const PROGRESS_DONE: u16 = 1000;

/// One progress report. The receiver owns any thread hand-off a
/// display needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    pub media_id: String,
    pub progress: u16,
}
