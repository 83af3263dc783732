use fotoferry_protocol::DecodeError;
use thiserror::Error;

/// Errors surfaced by the REST transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection or I/O failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered outside the 2xx range. The body is
    /// best-effort: an unreadable error body becomes the empty string.
    #[error("server answered {status} {status_text}: {body}")]
    Protocol {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}
