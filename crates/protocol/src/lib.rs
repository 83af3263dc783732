pub mod form;
pub mod multipart;
pub mod params;
pub mod response;

// Re-export primary types for convenience.
pub use form::{encode_form_body, parse_form_map};
pub use multipart::{
    BOUNDARY, compute_multipart_length, multipart_content_type, write_multipart_body,
};
pub use params::{BinaryAttachment, ByteSource, MediaKind, ParamValue, Parameter};
pub use response::{ApiResponse, DecodeError, decode_response};
