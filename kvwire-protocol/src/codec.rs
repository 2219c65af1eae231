//! Splits a byte stream read from a socket into complete frames.

use crate::error::ProtocolError;
use crate::frame::{declared_body_len, Magic, ResponseFrame, HEADER_SIZE};
use crate::MAX_FRAME_SIZE;
use bytes::{Bytes, BytesMut};

/// Accumulates socket reads and hands out one complete frame at a time.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Splits the next complete frame off the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed. Errors here mean the stream
    /// itself is unusable (bad magic or an absurd length), not that a single
    /// response is bad.
    pub fn decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        Magic::from_byte(self.buffer[0])?;

        let total = HEADER_SIZE + declared_body_len(&self.buffer);
        if total > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: self.max_frame_size,
            });
        }

        if self.buffer.len() < total {
            return Ok(None);
        }

        Ok(Some(self.buffer.split_to(total).freeze()))
    }

    /// Splits and parses the next complete response.
    ///
    /// A frame that fails [`ResponseFrame::parse`] has still been consumed, so
    /// the stream stays aligned on the following frame.
    pub fn decode_response(&mut self) -> Result<Option<ResponseFrame>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => Ok(Some(ResponseFrame::parse(frame)?)),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use crate::frame::{build_request, build_response, Datatype, Opcode, RequestHeader, ResponseHeader};

    fn response(opaque: u32, body: &[u8]) -> BytesMut {
        build_response(
            ResponseHeader {
                opcode: Opcode::Get,
                datatype: Datatype::new(),
                status: Status::Success,
                opaque,
                cas: 1,
            },
            &[0, 0, 0, 0],
            &[],
            body,
        )
        .unwrap()
    }

    #[test]
    fn test_partial_frame_decoding() {
        let encoded = response(1, b"hello");
        let mut decoder = FrameDecoder::new();

        decoder.extend(&encoded[..10]);
        assert!(decoder.decode_frame().unwrap().is_none());

        decoder.extend(&encoded[10..20]);
        assert!(decoder.decode_frame().unwrap().is_none());

        decoder.extend(&encoded[20..]);
        let frame = decoder.decode_response().unwrap().unwrap();
        assert_eq!(frame.opaque(), 1);
        assert_eq!(frame.body().unwrap().as_ref(), b"hello");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&response(1, b"one"));
        decoder.extend(&response(2, b"two"));

        let first = decoder.decode_response().unwrap().unwrap();
        let second = decoder.decode_response().unwrap().unwrap();
        assert_eq!(first.opaque(), 1);
        assert_eq!(second.opaque(), 2);
        assert!(decoder.decode_response().unwrap().is_none());
    }

    #[test]
    fn test_invalid_magic() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x42; HEADER_SIZE]);
        assert!(matches!(
            decoder.decode_frame(),
            Err(ProtocolError::InvalidMagic(0x42))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let mut decoder = FrameDecoder::with_max_frame_size(64);
        decoder.extend(&response(1, &[0u8; 100]));
        assert!(matches!(
            decoder.decode_frame(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_bad_response_keeps_stream_aligned() {
        let mut decoder = FrameDecoder::new();
        // A request frame is a complete frame but not a valid response.
        let request = build_request(RequestHeader::new(Opcode::Get, 0, 9), &[], b"k", &[]).unwrap();
        decoder.extend(&request);
        decoder.extend(&response(3, b"next"));

        assert!(decoder.decode_response().is_err());
        let next = decoder.decode_response().unwrap().unwrap();
        assert_eq!(next.opaque(), 3);
    }

    #[test]
    fn test_decoder_clear() {
        let mut decoder = FrameDecoder::default();
        decoder.extend(b"some data");
        assert_eq!(decoder.buffered(), 9);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }
}
