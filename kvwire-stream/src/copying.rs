//! Window backed by a single contiguous buffer.

use crate::error::WindowError;
use crate::window::{check_range, check_release, StreamWindow};
use bytes::{Buf, Bytes, BytesMut};

/// Copies every appended chunk into one growable buffer.
///
/// Released bytes are dropped from the front of the buffer and the space is
/// reclaimed on the next growth, so retention stays proportional to
/// `high - low`.
#[derive(Debug, Default)]
pub struct CopyingStreamWindow {
    buffer: BytesMut,
    low: u64,
    closed: bool,
}

impl CopyingStreamWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            ..Self::default()
        }
    }

    fn ensure_open(&self) -> Result<(), WindowError> {
        if self.closed {
            return Err(WindowError::Closed);
        }
        Ok(())
    }
}

impl StreamWindow for CopyingStreamWindow {
    fn add(&mut self, buffer: Bytes) -> Result<(), WindowError> {
        self.ensure_open()?;
        if !buffer.is_empty() {
            self.buffer.extend_from_slice(&buffer);
        }
        Ok(())
    }

    fn release_before(&mut self, offset: u64) -> Result<(), WindowError> {
        self.ensure_open()?;
        if check_release(offset, self.low, self.high_watermark())? {
            self.buffer.advance((offset - self.low) as usize);
            self.low = offset;
        }
        Ok(())
    }

    fn get_bytes(&self, start: u64, end: u64) -> Result<Bytes, WindowError> {
        self.ensure_open()?;
        check_range(start, end, self.low, self.high_watermark())?;
        let from = (start - self.low) as usize;
        let to = (end - self.low) as usize;
        Ok(Bytes::copy_from_slice(&self.buffer[from..to]))
    }

    fn low_watermark(&self) -> u64 {
        self.low
    }

    fn high_watermark(&self) -> u64 {
        self.low + self.buffer.len() as u64
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        let high = self.high_watermark();
        self.buffer = BytesMut::new();
        self.low = high;
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
