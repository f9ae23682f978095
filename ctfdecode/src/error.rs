use std::io;
use thiserror::Error;

/// Errors produced by a decode session.
///
/// Decode failures are terminal: once the bit position can no longer be
/// trusted the session refuses to decode anything else. `EndOfStream`,
/// `NoPendingEvent` and `EventMismatch` leave the session as it was.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The stream ended at a packet or record boundary.
    #[error("end of stream")]
    EndOfStream,

    #[error("unsupported format: {reason}")]
    FormatUnsupported { reason: String },

    #[error("corrupt data at bit {offset_bits} of packet: {reason}")]
    CorruptData { offset_bits: u64, reason: String },

    #[error("no event header is pending a payload read")]
    NoPendingEvent,

    #[error("pending event has id {pending}, payload requested for event {requested}")]
    EventMismatch { pending: u64, requested: u64 },

    #[error("decode session already failed")]
    SessionFailed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    pub(crate) fn corrupt(offset_bits: u64, reason: impl Into<String>) -> DecodeError {
        DecodeError::CorruptData {
            offset_bits,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> DecodeError {
        DecodeError::FormatUnsupported {
            reason: reason.into(),
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, DecodeError::EndOfStream)
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
