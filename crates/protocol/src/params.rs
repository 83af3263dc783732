use std::path::{Path, PathBuf};

/// A single named request parameter.
///
/// Parameters are ordered; the order they appear in a request's list is
/// the order they are written on the wire.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
}

impl Parameter {
    /// Creates a plain text parameter.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ParamValue::Text(value.into()),
        }
    }

    /// Creates a binary attachment parameter.
    pub fn attachment(name: impl Into<String>, attachment: BinaryAttachment) -> Self {
        Self {
            name: name.into(),
            value: ParamValue::Attachment(attachment),
        }
    }

    /// Returns the text value, or `None` for an attachment.
    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            ParamValue::Text(text) => Some(text),
            ParamValue::Attachment(_) => None,
        }
    }

    /// Returns the attachment, or `None` for a text parameter.
    pub fn as_attachment(&self) -> Option<&BinaryAttachment> {
        match &self.value {
            ParamValue::Text(_) => None,
            ParamValue::Attachment(attachment) => Some(attachment),
        }
    }
}

/// Parameter payload: plain text or an opaque binary attachment.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Text(String),
    Attachment(BinaryAttachment),
}

/// Media category of an attachment; selects the content-type prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn prefix(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Where an attachment's bytes come from.
///
/// The byte length is captured at construction time so the declared
/// length of a request can be computed before streaming starts.
#[derive(Debug, Clone)]
pub enum ByteSource {
    File { path: PathBuf, len: u64 },
    Memory(Vec<u8>),
}

/// The binary payload of an upload request.
///
/// Immutable once constructed. At most one attachment may appear in a
/// parameter list; see the multipart encoder for the framing rules.
#[derive(Debug, Clone)]
pub struct BinaryAttachment {
    /// Filename advertised in the part headers.
    pub filename: String,
    pub media: MediaKind,
    /// Content subtype, e.g. `jpeg` or `mp4`.
    pub subtype: String,
    pub source: ByteSource,
}

impl BinaryAttachment {
    /// Creates an attachment backed by an in-memory buffer.
    pub fn from_memory(
        filename: impl Into<String>,
        media: MediaKind,
        subtype: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            media,
            subtype: subtype.into(),
            source: ByteSource::Memory(bytes),
        }
    }

    /// Creates an attachment backed by a file on disk, capturing its
    /// current size as the declared length.
    pub fn from_file(
        filename: impl Into<String>,
        media: MediaKind,
        subtype: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = std::fs::metadata(&path)?.len();
        Ok(Self {
            filename: filename.into(),
            media,
            subtype: subtype.into(),
            source: ByteSource::File { path, len },
        })
    }

    /// Full content type of the part, e.g. `image/jpeg`.
    pub fn content_type(&self) -> String {
        format!("{}/{}", self.media.prefix(), self.subtype)
    }

    /// Declared payload length in bytes.
    pub fn len(&self) -> u64 {
        match &self.source {
            ByteSource::File { len, .. } => *len,
            ByteSource::Memory(bytes) => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
