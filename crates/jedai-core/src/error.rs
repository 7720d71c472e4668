//! Error taxonomy shared by every component of the pipeline.

/// Errors surfaced by the core pipeline.
///
/// | Variant | Raised by | Caller sees it? |
/// |---------|-----------|-----------------|
/// | [`InvalidArgument`](CoreError::InvalidArgument) | store, retriever | immediately, never retried |
/// | [`ExtractionFailure`](CoreError::ExtractionFailure) | indexer | recorded per document in the report |
/// | [`ModelInvocation`](CoreError::ModelInvocation) | language models | recovered by the synthesizer |
/// | [`PostconditionViolated`](CoreError::PostconditionViolated) | [`Answer::new`](crate::models::Answer::new) | yes, indicates a bug |
/// | [`Cancelled`](CoreError::Cancelled) | synthesizer | yes, a normal outcome |
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("extraction failed for {document_id}: {reason}")]
    ExtractionFailure { document_id: String, reason: String },

    #[error("language model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("postcondition violated: {0}")]
    PostconditionViolated(String),

    #[error("cancelled")]
    Cancelled,

    #[error("representation scheme mismatch: index built with '{indexed}', got '{requested}'")]
    RepresentationMismatch { indexed: String, requested: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index store error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        CoreError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
