//! FotoFerry REST client.
//!
//! One shared `reqwest` client serves every call shape the API needs:
//! url-encoded GET/POST returning the JSON status schema, the flat
//! key=value exchange used by the OAuth endpoints, and the streamed
//! multipart POST used by the upload engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fotoferry_protocol::{
    ApiResponse, Parameter, decode_response, encode_form_body, multipart_content_type,
    parse_form_map,
};
use reqwest::header;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::TransportError;

/// Transport configuration.
///
/// Requests default to no explicit timeout; the two exceptions are
/// marker-driven. A request whose `method` parameter equals
/// `probe_method` is a connectivity probe and must fail fast; a request
/// whose `checksum_param` contains `checksum_marker` is a checksum
/// lookup the server may legitimately take longer to answer.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    /// Path of the multipart upload endpoint.
    pub upload_path: String,
    pub probe_method: String,
    pub probe_timeout: Duration,
    pub checksum_param: String,
    pub checksum_marker: String,
    pub checksum_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.fotoferry.net".to_string(),
            upload_path: "/services/upload".to_string(),
            probe_method: "test.echo".to_string(),
            probe_timeout: Duration::from_secs(5),
            checksum_param: "machine_tags".to_string(),
            checksum_marker: "file:md5sum".to_string(),
            checksum_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Configuration pointing at `base_url`, with defaults for
    /// everything else.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Raw HTTP reply: status code, status text, and drained body.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Classifies a non-2xx reply as a protocol error.
    pub fn ensure_success(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Protocol {
                status: self.status,
                status_text: self.status_text,
                body: self.body,
            })
        }
    }
}

/// Shared REST client. Cheap to clone; clones share one connection
/// pool and configuration.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: Arc<TransportConfig>,
}

impl RestClient {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-cache,max-age=0"),
        );
        headers.insert(header::PRAGMA, header::HeaderValue::from_static("no-cache"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Performs a GET and decodes the JSON status payload.
    ///
    /// The JSON format selectors are appended to the caller's
    /// parameters; the query reflects parameter order.
    pub async fn get(
        &self,
        path: &str,
        params: &[Parameter],
    ) -> Result<ApiResponse, TransportError> {
        let all = with_format_selectors(params);
        let url = self.url_with_query(path, &all);
        debug!(%path, "GET");

        let request = self.apply_timeout(self.http.get(&url), &all);
        let reply = drain_reply(request.send().await?).await?.ensure_success()?;
        Ok(decode_response(reply.body.trim())?)
    }

    /// Performs a form POST and decodes the JSON status payload.
    pub async fn post(
        &self,
        path: &str,
        params: &[Parameter],
    ) -> Result<ApiResponse, TransportError> {
        let all = with_format_selectors(params);
        let url = format!("{}{}", self.config.base_url, path);
        debug!(%path, "POST");

        let request = self
            .http
            .post(&url)
            .header(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(encode_form_body(&all));
        let request = self.apply_timeout(request, &all);
        let reply = drain_reply(request.send().await?).await?.ensure_success()?;
        Ok(decode_response(reply.body.trim())?)
    }

    /// Performs a GET or form POST and decodes the flat key=value body.
    ///
    /// No format selectors are appended: the exchange endpoints answer
    /// form-encoded, not JSON. Used by the OAuth token exchange.
    pub async fn get_as_map(
        &self,
        use_get: bool,
        path: &str,
        params: &[Parameter],
    ) -> Result<HashMap<String, String>, TransportError> {
        debug!(%path, use_get, "exchange call");
        let request = if use_get {
            self.http.get(self.url_with_query(path, params))
        } else {
            self.http
                .post(format!("{}{}", self.config.base_url, path))
                .header(
                    header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(encode_form_body(params))
        };
        let request = self.apply_timeout(request, params);
        let reply = drain_reply(request.send().await?).await?.ensure_success()?;
        Ok(parse_form_map(reply.body.trim()))
    }

    /// Dispatches the streamed multipart POST.
    ///
    /// The body streams from `reader` under an explicit
    /// `Content-Length`, so the transfer is fixed-length, never
    /// chunked; the declared length must match the bytes the reader
    /// yields. Returns the drained reply regardless of status; the
    /// upload engine classifies non-2xx itself.
    pub async fn send_multipart(
        &self,
        path: &str,
        boundary: &str,
        content_length: u64,
        reader: impl AsyncRead + Send + Sync + 'static,
    ) -> Result<HttpReply, TransportError> {
        let url = format!("{}{}", self.config.base_url, path);
        debug!(%path, content_length, "multipart POST");

        let response = self
            .http
            .post(&url)
            .header(header::CONTENT_TYPE, multipart_content_type(boundary))
            .header(header::CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(reader)))
            .send()
            .await?;
        drain_reply(response).await
    }

    fn url_with_query(&self, path: &str, params: &[Parameter]) -> String {
        let query = encode_form_body(params);
        if query.is_empty() {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}{}?{}", self.config.base_url, path, query)
        }
    }

    fn apply_timeout(
        &self,
        request: reqwest::RequestBuilder,
        params: &[Parameter],
    ) -> reqwest::RequestBuilder {
        match self.request_timeout(params) {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    /// Selects the per-request timeout from marker parameters; the last
    /// matching parameter wins.
    fn request_timeout(&self, params: &[Parameter]) -> Option<Duration> {
        let mut timeout = None;
        for param in params {
            let Some(value) = param.as_text() else { continue };
            if param.name.eq_ignore_ascii_case("method") && value == self.config.probe_method {
                timeout = Some(self.config.probe_timeout);
            } else if param.name.eq_ignore_ascii_case(&self.config.checksum_param)
                && value.contains(&self.config.checksum_marker)
            {
                timeout = Some(self.config.checksum_timeout);
            }
        }
        timeout
    }
}

fn with_format_selectors(params: &[Parameter]) -> Vec<Parameter> {
    let mut all = params.to_vec();
    all.push(Parameter::text("nojsoncallback", "1"));
    all.push(Parameter::text("format", "json"));
    all
}

/// Drains a response into status, status text, and body. A 2xx body
/// must read fully; a non-2xx error body is best-effort.
async fn drain_reply(response: reqwest::Response) -> Result<HttpReply, TransportError> {
    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or("").to_string();
    let body = if status.is_success() {
        response.text().await?
    } else {
        response.text().await.unwrap_or_default()
    };
    Ok(HttpReply {
        status: status.as_u16(),
        status_text,
        body,
    })
}
