//! API response schema.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Decoded API response: a status object with `stat` of `ok` or
/// `fail`.
///
/// Built once from a single decode pass and never mutated. Malformed
/// payloads become [`DecodeError`]s, never partial responses.
#[derive(Debug, Clone)]
pub enum ApiResponse {
    Ok { raw: String, payload: Value },
    Fail { code: String, message: String },
}

impl ApiResponse {
    /// Returns true for a `stat: ok` response.
    pub fn is_ok(&self) -> bool {
        matches!(self, ApiResponse::Ok { .. })
    }
}

/// Failure to decode a response payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed response payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response payload has no stat field")]
    MissingStat,
    #[error("unhandled response stat: {0}")]
    UnhandledStat(String),
}

#[derive(Deserialize)]
struct FailBody {
    code: FailCode,
    message: String,
}

/// The service encodes failure codes as numbers or strings depending
/// on the endpoint; both normalize to a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum FailCode {
    Number(i64),
    Text(String),
}

impl FailCode {
    fn into_string(self) -> String {
        match self {
            FailCode::Number(n) => n.to_string(),
            FailCode::Text(s) => s,
        }
    }
}

/// Decodes a JSON status payload into an [`ApiResponse`].
///
/// The payload must be an object with `stat: "ok"` or `stat: "fail"`;
/// a `fail` additionally needs `code` and `message`. Any other
/// top-level shape is a decode error.
pub fn decode_response(raw: &str) -> Result<ApiResponse, DecodeError> {
    let payload: Value = serde_json::from_str(raw)?;
    let stat = payload
        .get("stat")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingStat)?
        .to_string();

    match stat.as_str() {
        "ok" => Ok(ApiResponse::Ok {
            raw: raw.to_string(),
            payload,
        }),
        "fail" => {
            let body: FailBody = serde_json::from_value(payload)?;
            Ok(ApiResponse::Fail {
                code: body.code.into_string(),
                message: body.message,
            })
        }
        other => Err(DecodeError::UnhandledStat(other.to_string())),
    }
}
