use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("no match found for topic '{topic}'")]
    NoMatchFound { topic: String },

    #[error("invalid image {}: {reason}", .path.display())]
    InvalidImage { path: PathBuf, reason: String },

    #[error("malformed JSON: {0}")]
    MalformedJson(JsonDiagnostic),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn unavailable(source_name: &str, reason: impl fmt::Display) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_image(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::InvalidImage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Where a JSON parse failed, with the surrounding text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonDiagnostic {
    pub message: String,
    /// Byte offset into the text that was parsed.
    pub offset: usize,
    pub line: usize,
    pub column: usize,
    /// Up to 50 characters either side of `offset`.
    pub context: String,
}

impl fmt::Display for JsonDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at position {} (line {}, column {}); problem area: ...{}...",
            self.message, self.offset, self.line, self.column, self.context
        )
    }
}
