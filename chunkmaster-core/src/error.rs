use thiserror::Error;

/// Failures at the engine boundary.
///
/// Missing structure inside a document is never an error: every extraction
/// step has a fallback. Only a document with nothing to segment, unreadable
/// markup or an unusable configuration ends up here.
#[derive(Debug, Error)]
pub enum RestructureError {
    #[error("document has no content to restructure")]
    EmptyDocument,

    #[error("malformed markup at byte {position}: {message}")]
    Markup { position: usize, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}
