//! Error types of the import pipeline.
//!
//! [`ImportError`] is fatal for a whole import. Everything that only costs a
//! single part becomes a [`Diagnostic`] on the resolved package instead.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("archive could not be read: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("failed to decode {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("scene description is malformed: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("{name} exceeds the {limit} byte package limit")]
    TooLarge { name: String, limit: u64 },

    #[error("package '{0}' is neither an archive nor a supported mesh")]
    UnsupportedPackage(String),
}

/// Tokenization failure of a whole scene-description document.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("element <{0}> is never closed")]
    Unclosed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    RejectedEntry,
    UnresolvedMesh,
    UnsupportedFormat,
    DecodeFailed,
    FetchFailed,
    Timeout,
    FallbackToDirectMeshes,
    DescriptorInvalid,
    SideFileFailed,
    EmptyImport,
}

/// A recoverable problem encountered while resolving one package.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Entry path, mesh reference or URL the problem concerns.
    pub subject: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    /// Creates the diagnostic and logs it at `warn`.
    pub fn new(kind: DiagnosticKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        let diagnostic = Self {
            subject: subject.into(),
            kind,
            message: message.into(),
        };
        log::warn!(
            "{:?} for '{}': {}",
            diagnostic.kind,
            diagnostic.subject,
            diagnostic.message
        );
        diagnostic
    }
}
