//! Attachment descriptors and their resolution into bytes.

use crate::error::EmailResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::try_join_all;
use std::path::PathBuf;
use tracing::debug;

/// Where attachment bytes come from
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentSource {
    /// File on disk, read at send time
    Path(PathBuf),
    /// Bytes already in memory
    Content(Vec<u8>),
}

/// Attachment descriptor carried by a message
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Display name in the delivered email
    pub filename: String,
    pub source: AttachmentSource,
    /// Explicit content type, sniffed from the bytes when absent
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn from_path(filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            source: AttachmentSource::Path(path.into()),
            content_type: None,
        }
    }

    pub fn from_content(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            source: AttachmentSource::Content(content.into()),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Attachment with its bytes loaded and content type settled
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    /// `None` when the type was not given and could not be sniffed
    pub content_type: Option<String>,
}

impl ResolvedAttachment {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.content)
    }
}

/// Detect a MIME type from the file's byte signature.
pub fn detect_content_type(bytes: &[u8]) -> Option<String> {
    infer::get(bytes).map(|kind| kind.mime_type().to_string())
}

/// Load one attachment's bytes. Unreadable paths fail with an I/O error.
pub async fn resolve(attachment: &Attachment) -> EmailResult<ResolvedAttachment> {
    let content = match &attachment.source {
        AttachmentSource::Path(path) => tokio::fs::read(path).await?,
        AttachmentSource::Content(bytes) => bytes.clone(),
    };

    let content_type = attachment
        .content_type
        .clone()
        .or_else(|| detect_content_type(&content));

    debug!(
        filename = %attachment.filename,
        size = content.len(),
        content_type = ?content_type,
        "Resolved attachment"
    );

    Ok(ResolvedAttachment {
        filename: attachment.filename.clone(),
        content,
        content_type,
    })
}

/// Resolve all attachments, keeping input order.
pub async fn resolve_all(attachments: &[Attachment]) -> EmailResult<Vec<ResolvedAttachment>> {
    try_join_all(attachments.iter().map(resolve)).await
}
