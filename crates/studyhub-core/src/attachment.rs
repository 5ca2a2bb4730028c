//! File attachments sent alongside a chat message.
//!
//! An attachment is inlined into the generation request, so it is held fully
//! in memory and capped at [`MAX_ATTACHMENT_SIZE`].

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

/// Maximum inline attachment size in bytes (20MB).
pub const MAX_ATTACHMENT_SIZE: u64 = 20 * 1024 * 1024;

/// Supported attachment formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentFormat {
    /// PNG image.
    Png,
    /// JPEG image.
    Jpg,
    /// GIF image.
    Gif,
    /// WebP image.
    Webp,
    /// PDF document.
    Pdf,
    /// Plain text.
    Text,
    /// Markdown text.
    Markdown,
}

impl AttachmentFormat {
    /// Detects the format from a file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// Detects the format from a file path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// The MIME type sent with the inline payload.
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Pdf => "application/pdf",
            Self::Text => "text/plain",
            Self::Markdown => "text/markdown",
        }
    }
}

/// A file attached to a message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Original file name.
    pub name: String,
    /// MIME type of the payload.
    pub mime_type: String,
    /// Raw bytes.
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Attachment {
    /// Creates an attachment from raw parts.
    #[must_use]
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Loads an attachment from disk.
    ///
    /// # Errors
    ///
    /// Returns `HubError::AttachmentNotFound` if the file doesn't exist,
    /// `HubError::UnsupportedAttachment` for unknown extensions, and
    /// `HubError::AttachmentTooLarge` above the inline limit.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HubError::attachment_not_found(path)
            } else {
                HubError::Io(e)
            }
        })?;

        let format =
            AttachmentFormat::from_path(path).ok_or_else(|| HubError::unsupported_attachment(path))?;

        let file_size = metadata.len();
        if file_size > MAX_ATTACHMENT_SIZE {
            return Err(HubError::attachment_too_large(path, file_size / 1024));
        }

        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        Ok(Self::new(name, format.mime_type(), data))
    }

    /// Builds an attachment from a base64 payload.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InvalidAttachmentData` if the payload does not decode
    /// and `HubError::AttachmentTooLarge` above the inline limit.
    pub fn from_base64(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        encoded: &str,
    ) -> Result<Self> {
        let name = name.into();
        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|e| HubError::InvalidAttachmentData {
                message: e.to_string(),
            })?;

        let size = data.len() as u64;
        if size > MAX_ATTACHMENT_SIZE {
            return Err(HubError::attachment_too_large(name, size / 1024));
        }

        Ok(Self::new(name, mime_type, data))
    }

    /// Returns `true` for image payloads.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// The payload base64-encoded.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// The payload as a `data:` URL.
    #[must_use]
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Preview mirrored on the user message; only images get one.
    #[must_use]
    pub fn preview(&self) -> Option<String> {
        self.is_image().then(|| self.data_url())
    }

    /// Message content used when the student sends the attachment without text.
    #[must_use]
    pub fn placeholder_text(&self) -> String {
        format!("Fichier attaché: {}", self.name)
    }
}
