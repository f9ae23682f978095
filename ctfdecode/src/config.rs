//! Decoder configuration.

use serde::{Deserialize, Serialize};

/// Tunables of a decode session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Initial size of the record buffer in bytes.
    #[serde(default = "default_initial_buffer_capacity")]
    pub initial_buffer_capacity: usize,
    /// Sequence lengths above this are treated as corrupt data.
    #[serde(default = "default_max_array_length")]
    pub max_array_length: u64,
    /// Strings longer than this many bytes, not counting the terminator, are
    /// treated as corrupt data.
    #[serde(default = "default_max_string_length")]
    pub max_string_length: usize,
}

fn default_initial_buffer_capacity() -> usize {
    4_096
}

fn default_max_array_length() -> u64 {
    1 << 24
}

fn default_max_string_length() -> usize {
    1 << 20
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            initial_buffer_capacity: default_initial_buffer_capacity(),
            max_array_length: default_max_array_length(),
            max_string_length: default_max_string_length(),
        }
    }
}
