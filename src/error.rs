use serde::{Deserialize, Serialize};

/// The family an error belongs to, so that callers can decide whether it is recoverable.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Text could not be placed in the available width.
    LayoutError,
    /// The rasterized strategy failed (tainted surface or missing capability).
    RasterizationError,
    /// The native drawing strategy failed as well, no further fallback exists.
    RasterizationFatal,
    /// The archive entries violate the archive writer contract.
    ArchiveEncodingError,
    /// A referenced attachment could not be retrieved.
    AttachmentFetchError,
    /// The section selection does not contain any section to compile.
    InvalidSelection,
    /// The configuration file could not be read or parsed.
    ConfigurationError,
    /// A font could not be loaded or parsed.
    FontError,
    /// The PDF document could not be assembled or serialized.
    PdfError,
    /// The compiled report or package could not be written to its destination.
    OutputError,
}

/// A struct that represents an error with a context and possibly the propagated source error.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContextError {
    pub kind: ErrorKind,
    pub context: String,
    pub source_error: Option<String>,
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source_error {
            Some(source_error) => write!(
                formatter,
                "{}: {}",
                self.context,
                minimize_first_letter(source_error.to_string()),
            ),
            None => write!(formatter, "{}", self.context),
        }
    }
}

impl std::error::Error for ContextError {}

impl ContextError {
    /// Create a new `ContextError` of the given kind with the given context.
    pub fn with_context<S: Into<String>>(kind: ErrorKind, context: S) -> ContextError {
        ContextError {
            kind,
            context: context.into(),
            source_error: None,
        }
    }

    /// Create a new `ContextError` of the given kind with the given context and source error.
    pub fn with_error<S: Into<String>>(
        kind: ErrorKind,
        context: S,
        error: &dyn std::error::Error,
    ) -> ContextError {
        ContextError {
            kind,
            context: context.into(),
            source_error: Some(error.to_string()),
        }
    }

    /// Re-tag an error with a different kind, keeping its messages.
    pub fn into_kind(self, kind: ErrorKind) -> ContextError {
        ContextError { kind, ..self }
    }
}

/// Minimizes the first letter of a string, it is used for standardizing the error message.
fn minimize_first_letter(string: String) -> String {
    let mut characters = string.chars();
    match characters.next() {
        None => String::new(),
        Some(character) => character.to_lowercase().chain(characters).collect(),
    }
}
