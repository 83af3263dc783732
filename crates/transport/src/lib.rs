pub mod client;
pub mod error;

// Re-export primary types for convenience.
pub use client::{HttpReply, RestClient, TransportConfig};
pub use error::TransportError;
