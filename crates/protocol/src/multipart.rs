//! Multipart/form-data request bodies.
//!
//! The length computation and the writer walk parameters identically,
//! so the declared `Content-Length` always matches the bytes written.
//! Exactly one binary attachment is supported per request; it closes
//! the body, and parameters listed after it are dropped.

use std::io;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::params::{BinaryAttachment, ByteSource, ParamValue, Parameter};

/// Fixed ASCII boundary token for upload bodies.
pub const BOUNDARY: &str = "---------------------------7d273f7a0d3";

/// Closing `--` of the final boundary plus the trailing blank line.
const FINAL_SUFFIX: &str = "--\r\n\r\n";

/// Chunk size for streaming attachment bytes. A tuning constant, not a
/// contract: any size preserves byte-for-byte fidelity.
const CHUNK_SIZE: usize = 64 * 1024;

/// The `Content-Type` header value for an upload body.
pub fn multipart_content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={boundary}")
}

fn text_part_header(name: &str) -> String {
    format!(
        "\r\nContent-Disposition: form-data; name=\"{name}\"\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\n"
    )
}

fn attachment_part_header(name: &str, attachment: &BinaryAttachment) -> String {
    format!(
        "\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n",
        filename = attachment.filename,
        content_type = attachment.content_type(),
    )
}

/// Computes the exact byte length `write_multipart_body` produces for
/// `params`.
///
/// Walks parameters in order. The binary attachment is the final part:
/// its declared length plus the closing boundary are added and the walk
/// stops, so parameters after it do not count. The writer drops them
/// the same way, keeping the declared length equal to the bytes
/// actually written.
pub fn compute_multipart_length(params: &[Parameter], boundary: &str) -> u64 {
    let mut total = (2 + boundary.len()) as u64;
    for param in params {
        match &param.value {
            ParamValue::Text(text) => {
                total += text_part_header(&param.name).len() as u64;
                total += text.len() as u64;
                total += (4 + boundary.len()) as u64;
            }
            ParamValue::Attachment(attachment) => {
                total += attachment_part_header(&param.name, attachment).len() as u64;
                total += attachment.len();
                total += (4 + boundary.len()) as u64;
                return total + FINAL_SUFFIX.len() as u64;
            }
        }
    }
    total + FINAL_SUFFIX.len() as u64
}

/// Writes the multipart body for `params` to `sink`.
///
/// Each parameter becomes one MIME part. Attachment bytes stream in
/// fixed-size chunks, invoking `on_bytes(delta)` after each chunk so
/// the caller can derive progress. Returns the total bytes written.
pub async fn write_multipart_body<W, F>(
    params: &[Parameter],
    boundary: &str,
    sink: &mut W,
    mut on_bytes: F,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut written: u64 = 0;

    let lead = format!("--{boundary}");
    sink.write_all(lead.as_bytes()).await?;
    written += lead.len() as u64;

    let close = format!("\r\n--{boundary}");

    for (index, param) in params.iter().enumerate() {
        match &param.value {
            ParamValue::Text(text) => {
                let header = text_part_header(&param.name);
                sink.write_all(header.as_bytes()).await?;
                sink.write_all(text.as_bytes()).await?;
                sink.write_all(close.as_bytes()).await?;
                written += (header.len() + text.len() + close.len()) as u64;
            }
            ParamValue::Attachment(attachment) => {
                let header = attachment_part_header(&param.name, attachment);
                sink.write_all(header.as_bytes()).await?;
                written += header.len() as u64;

                written += stream_attachment(attachment, sink, &mut on_bytes).await?;

                sink.write_all(close.as_bytes()).await?;
                sink.write_all(FINAL_SUFFIX.as_bytes()).await?;
                written += (close.len() + FINAL_SUFFIX.len()) as u64;

                let dropped = params.len() - index - 1;
                if dropped > 0 {
                    warn!(dropped, "parameters after the attachment were not written");
                }
                sink.flush().await?;
                return Ok(written);
            }
        }
    }

    sink.write_all(FINAL_SUFFIX.as_bytes()).await?;
    written += FINAL_SUFFIX.len() as u64;
    sink.flush().await?;
    Ok(written)
}

async fn stream_attachment<W, F>(
    attachment: &BinaryAttachment,
    sink: &mut W,
    on_bytes: &mut F,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut written: u64 = 0;
    match &attachment.source {
        ByteSource::Memory(bytes) => {
            for chunk in bytes.chunks(CHUNK_SIZE) {
                sink.write_all(chunk).await?;
                written += chunk.len() as u64;
                on_bytes(chunk.len() as u64);
            }
        }
        ByteSource::File { path, len } => {
            let mut file = fs::File::open(path).await?;
            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut remaining = *len;

            // Read at most the declared length so the body never
            // exceeds the precomputed Content-Length, even if the file
            // grew after the attachment was constructed.
            while remaining > 0 {
                let to_read = (remaining as usize).min(buf.len());
                let n = file.read(&mut buf[..to_read]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "attachment file shorter than its declared length",
                    ));
                }
                sink.write_all(&buf[..n]).await?;
                remaining -= n as u64;
                written += n as u64;
                on_bytes(n as u64);
            }
        }
    }
    Ok(written)
}
