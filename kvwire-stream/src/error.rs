//! Stream window error types.

use thiserror::Error;

/// Errors raised by a [`StreamWindow`](crate::StreamWindow).
///
/// Neither kind is retryable: both point at a tokenizer asking for bytes it
/// has already given up or has not received yet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("range [{start}, {end}) outside window [{low}, {high})")]
    Range {
        start: u64,
        end: u64,
        low: u64,
        high: u64,
    },

    #[error("stream window is closed")]
    Closed,

    #[error("malformed stream: {0}")]
    Malformed(String),
}
