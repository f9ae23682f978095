use thiserror::Error;

/// Errors raised while assembling or loading a type model.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("duplicate stream id {id}")]
    DuplicateStream { id: u64 },

    #[error("duplicate event id {id} in stream {stream_id}")]
    DuplicateEvent { stream_id: u64, id: u64 },

    #[error("duplicate field `{name}` in {context}")]
    DuplicateField { context: String, name: String },

    #[error("alignment of {align_bits} bits in {context} is not a power of two")]
    InvalidAlignment { context: String, align_bits: u32 },

    #[error("trace does not declare any stream")]
    NoStreams,

    #[error("could not parse metadata snapshot: {0}")]
    Json(#[from] serde_json::Error),
}
