//! Error types for StudyHub.
//!
//! This module defines the error hierarchy for configuration loading,
//! attachments, the generation client, and the quiz state machine. Display
//! messages carry a suggestion the user can act on.

use std::path::PathBuf;
use std::time::Duration;

/// A specialized `Result` type for StudyHub operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Errors that can occur in the StudyHub core.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your studyhub.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Attachment Errors
    // ========================================================================
    /// Attachment file was not found.
    #[error("Attachment not found: '{path}'\n\nSuggestion: Check the path and try attaching again")]
    AttachmentNotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// Attachment exceeds the inline payload limit.
    #[error("Attachment exceeds size limit (20MB): '{path}' is {size_kb}KB\n\nSuggestion: Compress the file or attach a smaller excerpt")]
    AttachmentTooLarge {
        /// Path to the oversized attachment.
        path: PathBuf,
        /// Actual size in kilobytes.
        size_kb: u64,
    },

    /// Attachment type is not one the generation API accepts inline.
    #[error("Unsupported attachment type: '{path}'\n\nSuggestion: Attach an image (png, jpg, gif, webp), a PDF, or a text file")]
    UnsupportedAttachment {
        /// Path to the rejected attachment.
        path: PathBuf,
    },

    /// Attachment payload was not valid base64.
    #[error("Attachment data is not valid base64: {message}\n\nSuggestion: Send the file contents base64-encoded without a data: prefix")]
    InvalidAttachmentData {
        /// Decoder error description.
        message: String,
    },

    // ========================================================================
    // Generation Errors
    // ========================================================================
    /// The remote generation capability failed.
    #[error("Generation error ({kind}): {message}\n\nSuggestion: {suggestion}")]
    Generation {
        /// What kind of failure this was.
        kind: GenerationErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
        /// Server-provided wait before retrying, if any.
        retry_after: Option<Duration>,
    },

    // ========================================================================
    // Persona Errors
    // ========================================================================
    /// No persona is registered under the given identifier.
    #[error("Unknown persona: '{id}'\n\nSuggestion: Use one of CODING, RESUME, PRESENTATION, ORGANIZER, QUIZZ, EXERCICES")]
    UnknownPersona {
        /// The identifier that was requested.
        id: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categories of generation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// Invalid or rejected API key.
    Authentication,
    /// Quota or rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues or timeouts.
    Network,
    /// The model answered with something that does not fit the contract.
    MalformedResponse,
    /// No API key was configured.
    MissingCredential,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::MalformedResponse => write!(f, "malformed_response"),
            Self::MissingCredential => write!(f, "missing_credential"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl GenerationErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the API key in API_KEY or GEMINI_API_KEY",
            Self::RateLimit => "Wait a moment and retry, or reduce request frequency",
            Self::Server => "Retry later; the generation service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::MalformedResponse => "Retry the request; the model returned an unexpected shape",
            Self::MissingCredential => "Set API_KEY (or GEMINI_API_KEY) before starting StudyHub",
            Self::Other => "Check the generation provider's status page",
        }
    }
}

impl HubError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `AttachmentNotFound` error.
    #[must_use]
    pub fn attachment_not_found(path: impl Into<PathBuf>) -> Self {
        Self::AttachmentNotFound { path: path.into() }
    }

    /// Creates a new `AttachmentTooLarge` error.
    #[must_use]
    pub fn attachment_too_large(path: impl Into<PathBuf>, size_kb: u64) -> Self {
        Self::AttachmentTooLarge {
            path: path.into(),
            size_kb,
        }
    }

    /// Creates a new `UnsupportedAttachment` error.
    #[must_use]
    pub fn unsupported_attachment(path: impl Into<PathBuf>) -> Self {
        Self::UnsupportedAttachment { path: path.into() }
    }

    /// Creates a new `Generation` error with the suggestion for its kind.
    #[must_use]
    pub fn generation(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        let suggestion = kind.suggestion().to_string();
        Self::Generation {
            kind,
            message: message.into(),
            suggestion,
            retry_after: None,
        }
    }

    /// Attaches a server-provided retry delay to a generation error.
    #[must_use]
    pub fn with_retry_after(mut self, delay: Option<Duration>) -> Self {
        if let Self::Generation { retry_after, .. } = &mut self {
            *retry_after = delay;
        }
        self
    }

    /// Returns the server-provided retry delay, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Generation { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Shorthand for a `MalformedResponse` generation error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::generation(GenerationErrorKind::MalformedResponse, message)
    }

    /// Creates a new `UnknownPersona` error.
    #[must_use]
    pub fn unknown_persona(id: impl Into<String>) -> Self {
        Self::UnknownPersona { id: id.into() }
    }

    /// Returns the generation error kind, if this is a generation error.
    #[must_use]
    pub const fn generation_kind(&self) -> Option<GenerationErrorKind> {
        match self {
            Self::Generation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if this error is transient and the request may be retried.
    ///
    /// Malformed model output counts as transient: a second sample usually
    /// has the right shape.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Generation {
                kind: GenerationErrorKind::RateLimit
                    | GenerationErrorKind::Server
                    | GenerationErrorKind::Network
                    | GenerationErrorKind::MalformedResponse,
                ..
            }
        )
    }
}
