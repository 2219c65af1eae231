//! Window backed by a queue of the caller's own buffers.

use crate::error::WindowError;
use crate::window::{check_range, check_release, StreamWindow};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// Keeps appended chunks as-is and never copies on `add`.
///
/// A `get_bytes` range that falls inside one chunk is returned as a shared
/// slice of that chunk; ranges spanning chunks are gathered into a new
/// buffer.
#[derive(Debug, Default)]
pub struct CompositeStreamWindow {
    chunks: VecDeque<Bytes>,
    low: u64,
    high: u64,
    closed: bool,
}

impl CompositeStreamWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks currently retained.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn ensure_open(&self) -> Result<(), WindowError> {
        if self.closed {
            return Err(WindowError::Closed);
        }
        Ok(())
    }
}

impl StreamWindow for CompositeStreamWindow {
    fn add(&mut self, buffer: Bytes) -> Result<(), WindowError> {
        self.ensure_open()?;
        if buffer.is_empty() {
            return Ok(());
        }
        self.high += buffer.len() as u64;
        self.chunks.push_back(buffer);
        Ok(())
    }

    fn release_before(&mut self, offset: u64) -> Result<(), WindowError> {
        self.ensure_open()?;
        if !check_release(offset, self.low, self.high)? {
            return Ok(());
        }

        let mut remaining = offset - self.low;
        while remaining > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let len = front.len() as u64;
            if len <= remaining {
                remaining -= len;
                self.chunks.pop_front();
            } else {
                front.advance(remaining as usize);
                remaining = 0;
            }
        }
        self.low = offset;
        Ok(())
    }

    fn get_bytes(&self, start: u64, end: u64) -> Result<Bytes, WindowError> {
        self.ensure_open()?;
        check_range(start, end, self.low, self.high)?;
        if start == end {
            return Ok(Bytes::new());
        }

        let mut chunk_start = self.low;
        let mut gathered: Option<BytesMut> = None;
        for chunk in &self.chunks {
            let chunk_end = chunk_start + chunk.len() as u64;
            if chunk_end <= start {
                chunk_start = chunk_end;
                continue;
            }

            let from = start.saturating_sub(chunk_start) as usize;
            let to = (end.min(chunk_end) - chunk_start) as usize;
            match gathered.as_mut() {
                None if end <= chunk_end => return Ok(chunk.slice(from..to)),
                None => {
                    let mut out = BytesMut::with_capacity((end - start) as usize);
                    out.extend_from_slice(&chunk[from..to]);
                    gathered = Some(out);
                }
                Some(out) => out.extend_from_slice(&chunk[from..to]),
            }

            if end <= chunk_end {
                break;
            }
            chunk_start = chunk_end;
        }

        Ok(gathered.map(BytesMut::freeze).unwrap_or_default())
    }

    fn low_watermark(&self) -> u64 {
        self.low
    }

    fn high_watermark(&self) -> u64 {
        self.high
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.chunks.clear();
        self.low = self.high;
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk_range_is_shared() {
        let source = Bytes::from_static(b"abcdefgh");
        let mut window = CompositeStreamWindow::new();
        window.add(source.clone()).unwrap();

        let slice = window.get_bytes(2, 5).unwrap();
        assert_eq!(slice.as_ref(), b"cde");
        assert_eq!(slice.as_ptr(), source[2..].as_ptr());
    }

    #[test]
    fn test_range_spanning_chunks() {
        let mut window = CompositeStreamWindow::new();
        window.add(Bytes::from_static(b"ab")).unwrap();
        window.add(Bytes::from_static(b"cd")).unwrap();
        window.add(Bytes::from_static(b"ef")).unwrap();

        assert_eq!(window.get_bytes(1, 6).unwrap().as_ref(), b"bcdef");
        assert_eq!(window.get_bytes(2, 4).unwrap().as_ref(), b"cd");
    }

    #[test]
    fn test_release_pops_whole_chunks() {
        let mut window = CompositeStreamWindow::new();
        window.add(Bytes::from_static(b"ab")).unwrap();
        window.add(Bytes::new()).unwrap();
        window.add(Bytes::from_static(b"cd")).unwrap();
        window.add(Bytes::from_static(b"ef")).unwrap();
        assert_eq!(window.chunk_count(), 3);

        window.release_before(3).unwrap();
        assert_eq!(window.chunk_count(), 2);
        assert_eq!(window.get_bytes(3, 6).unwrap().as_ref(), b"def");

        window.release_before(4).unwrap();
        assert_eq!(window.chunk_count(), 1);
        assert_eq!(window.retained(), 2);
    }
}
