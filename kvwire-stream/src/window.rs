//! The [`StreamWindow`] contract.
//!
//! A window sits over a conceptually infinite byte stream that starts at
//! offset 0. Only `[low_watermark, high_watermark)` is materialized:
//! `add` raises the high watermark, `release_before` raises the low one.

use crate::error::WindowError;
use bytes::Bytes;

/// Sliding window over the contents of a byte stream.
///
/// Implementations differ only in how they store retained bytes; offset
/// arithmetic and retention rules are identical.
pub trait StreamWindow {
    /// Appends `buffer` to the end of the stream, taking ownership of it.
    /// Empty buffers are dropped immediately.
    fn add(&mut self, buffer: Bytes) -> Result<(), WindowError>;

    /// Forgets every byte with a stream offset lower than `offset`.
    ///
    /// Offsets at or below the current low watermark are a no-op, so the low
    /// watermark never moves backwards. Offsets past the high watermark are a
    /// [`WindowError::Range`].
    fn release_before(&mut self, offset: u64) -> Result<(), WindowError>;

    /// Copies (or shares) the region `[start, end)` out of the window.
    fn get_bytes(&self, start: u64, end: u64) -> Result<Bytes, WindowError>;

    /// Offset of the first retained byte.
    ///
    /// The watermark accessors are plain reads and keep answering after
    /// [`close`](StreamWindow::close); a closed window reports both
    /// watermarks at the final stream length and retains nothing.
    fn low_watermark(&self) -> u64;

    /// Offset one past the last appended byte.
    fn high_watermark(&self) -> u64;

    /// Releases every buffer. Later `add`, `release_before` and `get_bytes`
    /// calls fail with [`WindowError::Closed`].
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// Number of bytes currently held in memory.
    fn retained(&self) -> u64 {
        self.high_watermark() - self.low_watermark()
    }
}

/// Validates `[start, end)` against the window bounds.
pub(crate) fn check_range(start: u64, end: u64, low: u64, high: u64) -> Result<(), WindowError> {
    if start < low || end > high || start > end {
        return Err(WindowError::Range {
            start,
            end,
            low,
            high,
        });
    }
    Ok(())
}

/// Validates a release offset. Returns `false` when the call is a no-op.
pub(crate) fn check_release(offset: u64, low: u64, high: u64) -> Result<bool, WindowError> {
    if offset > high {
        return Err(WindowError::Range {
            start: low,
            end: offset,
            low,
            high,
        });
    }
    Ok(offset > low)
}
