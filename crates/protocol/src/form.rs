//! URL-encoded form bodies.

use std::collections::HashMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tracing::warn;

use crate::params::{ParamValue, Parameter};

/// RFC 3986 unreserved characters stay raw; everything else is encoded.
/// A space encodes as `%20`, never `+`.
const FORM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Encodes parameters as `name=value&name=value…`.
///
/// An empty list yields an empty string. Attachments cannot be
/// form-encoded and are skipped with a warning.
pub fn encode_form_body(params: &[Parameter]) -> String {
    let mut body = String::new();
    for param in params {
        let value = match &param.value {
            ParamValue::Text(text) => text,
            ParamValue::Attachment(_) => {
                warn!(name = %param.name, "binary attachment skipped in form body");
                continue;
            }
        };
        if !body.is_empty() {
            body.push('&');
        }
        body.push_str(&utf8_percent_encode(&param.name, FORM_ENCODE_SET).to_string());
        body.push('=');
        body.push_str(&utf8_percent_encode(value, FORM_ENCODE_SET).to_string());
    }
    body
}

/// Decodes a url-encoded response body into a flat map.
///
/// Tolerant: entries that do not split into exactly `name=value` are
/// skipped rather than failing the whole decode.
pub fn parse_form_map(body: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entry in body.split('&') {
        let segments: Vec<&str> = entry.split('=').collect();
        if segments.len() != 2 {
            continue;
        }
        let name = percent_decode_str(segments[0]).decode_utf8_lossy();
        let value = percent_decode_str(segments[1]).decode_utf8_lossy();
        map.insert(name.into_owned(), value.into_owned());
    }
    map
}
