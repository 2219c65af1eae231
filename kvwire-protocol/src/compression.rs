//! Size and ratio gated Snappy compression of document values.

use crate::error::ProtocolError;
use crate::frame::Datatype;
use crate::MAX_FRAME_SIZE;
use bytes::Bytes;

/// Values shorter than this are never compressed.
pub const DEFAULT_MIN_SIZE: usize = 32;

/// Compression is abandoned when `compressed / original` exceeds this.
pub const DEFAULT_MIN_RATIO: f64 = 0.83;

/// Compression thresholds for a channel that negotiated Snappy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub min_size: usize,
    pub min_ratio: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: DEFAULT_MIN_SIZE,
            min_ratio: DEFAULT_MIN_RATIO,
        }
    }
}

impl CompressionConfig {
    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_min_ratio(mut self, min_ratio: f64) -> Self {
        self.min_ratio = min_ratio;
        self
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Compresses `value` when the channel allows it and it pays off.
///
/// Returns the bytes to put on the wire and the datatype with the Snappy bit
/// set if (and only if) those bytes are compressed. `config` is `None` when
/// the channel did not negotiate compression.
pub fn maybe_compress(
    value: Bytes,
    datatype: Datatype,
    config: Option<&CompressionConfig>,
) -> (Bytes, Datatype) {
    let config = match config {
        Some(c) if c.enabled => c,
        _ => return (value, datatype),
    };
    if value.is_empty() || value.len() < config.min_size {
        return (value, datatype);
    }

    let compressed = match snap::raw::Encoder::new().compress_vec(&value) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("snappy compression failed, sending uncompressed: {}", e);
            return (value, datatype);
        }
    };

    let ratio = compressed.len() as f64 / value.len() as f64;
    if ratio > config.min_ratio {
        return (value, datatype);
    }

    (Bytes::from(compressed), datatype.with_snappy())
}

/// Inflates a Snappy compressed value.
///
/// The length declared in the Snappy header is bounded by
/// [`MAX_FRAME_SIZE`] before anything is allocated.
pub fn decompress(value: &[u8]) -> Result<Bytes, ProtocolError> {
    let declared = snap::raw::decompress_len(value)?;
    if declared > MAX_FRAME_SIZE {
        return Err(ProtocolError::malformed(format!(
            "snappy value declares {} bytes, limit is {}",
            declared, MAX_FRAME_SIZE
        )));
    }
    let raw = snap::raw::Decoder::new().decompress_vec(value)?;
    Ok(Bytes::from(raw))
}
