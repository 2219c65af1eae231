//! Binary frame layout.
//!
//! Every frame starts with a fixed 24 byte header in network byte order:
//!
//! ```text
//! +-------+--------+-----------+------------+----------+-------------------+
//! | magic | opcode | key_len   | extras_len | datatype | partition/status  |
//! | 1     | 1      | 2         | 1          | 1        | 2                 |
//! +-------+--------+-----------+------------+----------+-------------------+
//! | total_body_len (4)         | opaque (4)            | cas (8)           |
//! +----------------------------+-----------------------+-------------------+
//! | [flexible extras] | [extras] | [key] | [value]                         |
//! +------------------------------------------------------------------------+
//! ```
//!
//! In flexible frames the two `key_len` bytes are split: byte 2 holds the
//! flexible extras length and byte 3 the key length.
//! `total_body_len == flexible_len + extras_len + key_len + value_len` always.

use crate::error::{ProtocolError, Status};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Magic byte of a frame, which also tells request from response and plain
/// from flexible framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    Request,
    Response,
    FlexibleRequest,
    FlexibleResponse,
}

impl Magic {
    pub fn byte(&self) -> u8 {
        match self {
            Magic::Request => 0x80,
            Magic::Response => 0x81,
            Magic::FlexibleRequest => 0x08,
            Magic::FlexibleResponse => 0x18,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x80 => Ok(Magic::Request),
            0x81 => Ok(Magic::Response),
            0x08 => Ok(Magic::FlexibleRequest),
            0x18 => Ok(Magic::FlexibleResponse),
            other => Err(ProtocolError::InvalidMagic(other)),
        }
    }

    pub fn is_flexible(&self) -> bool {
        matches!(self, Magic::FlexibleRequest | Magic::FlexibleResponse)
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Magic::Response | Magic::FlexibleResponse)
    }
}

/// Operation codes used by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Get,
    Upsert,
    Insert,
    Replace,
    Remove,
    Increment,
    Decrement,
    SubdocMultiLookup,
}

impl Opcode {
    pub fn byte(&self) -> u8 {
        match self {
            Opcode::Get => 0x00,
            Opcode::Upsert => 0x01,
            Opcode::Insert => 0x02,
            Opcode::Replace => 0x03,
            Opcode::Remove => 0x04,
            Opcode::Increment => 0x05,
            Opcode::Decrement => 0x06,
            Opcode::SubdocMultiLookup => 0xd0,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Opcode::Get),
            0x01 => Some(Opcode::Upsert),
            0x02 => Some(Opcode::Insert),
            0x03 => Some(Opcode::Replace),
            0x04 => Some(Opcode::Remove),
            0x05 => Some(Opcode::Increment),
            0x06 => Some(Opcode::Decrement),
            0xd0 => Some(Opcode::SubdocMultiLookup),
            _ => None,
        }
    }
}

/// Datatype bitmask describing how the value is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Datatype(u8);

impl Datatype {
    pub const JSON: u8 = 0x01;
    pub const SNAPPY: u8 = 0x02;
    pub const XATTR: u8 = 0x04;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn with_json(mut self) -> Self {
        self.0 |= Self::JSON;
        self
    }

    pub fn with_snappy(mut self) -> Self {
        self.0 |= Self::SNAPPY;
        self
    }

    pub fn without_snappy(mut self) -> Self {
        self.0 &= !Self::SNAPPY;
        self
    }

    pub fn is_json(&self) -> bool {
        self.0 & Self::JSON != 0
    }

    pub fn is_snappy(&self) -> bool {
        self.0 & Self::SNAPPY != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// Fixed header fields of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: Opcode,
    pub datatype: Datatype,
    pub partition: u16,
    pub opaque: u32,
    pub cas: u64,
}

impl RequestHeader {
    pub fn new(opcode: Opcode, partition: u16, opaque: u32) -> Self {
        Self {
            opcode,
            datatype: Datatype::new(),
            partition,
            opaque,
            cas: 0,
        }
    }

    pub fn with_datatype(mut self, datatype: Datatype) -> Self {
        self.datatype = datatype;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

/// Builds a plain (non-flexible) request frame.
pub fn build_request(
    header: RequestHeader,
    extras: &[u8],
    key: &[u8],
    body: &[u8],
) -> Result<BytesMut, ProtocolError> {
    write_frame(
        Magic::Request,
        header.opcode.byte(),
        header.datatype,
        header.partition,
        header.opaque,
        header.cas,
        &[],
        extras,
        key,
        body,
    )
}

/// Builds a request frame with a flexible extras block in front of the
/// regular extras.
pub fn build_flexible_request(
    header: RequestHeader,
    flexible_extras: &[u8],
    extras: &[u8],
    key: &[u8],
    body: &[u8],
) -> Result<BytesMut, ProtocolError> {
    write_frame(
        Magic::FlexibleRequest,
        header.opcode.byte(),
        header.datatype,
        header.partition,
        header.opaque,
        header.cas,
        flexible_extras,
        extras,
        key,
        body,
    )
}

/// Fixed header fields of a response, used by simulated servers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub opcode: Opcode,
    pub datatype: Datatype,
    pub status: Status,
    pub opaque: u32,
    pub cas: u64,
}

/// Builds a plain response frame.
pub fn build_response(
    header: ResponseHeader,
    extras: &[u8],
    key: &[u8],
    body: &[u8],
) -> Result<BytesMut, ProtocolError> {
    write_frame(
        Magic::Response,
        header.opcode.byte(),
        header.datatype,
        header.status.code(),
        header.opaque,
        header.cas,
        &[],
        extras,
        key,
        body,
    )
}

#[allow(clippy::too_many_arguments)]
fn write_frame(
    magic: Magic,
    opcode: u8,
    datatype: Datatype,
    slot: u16,
    opaque: u32,
    cas: u64,
    flexible_extras: &[u8],
    extras: &[u8],
    key: &[u8],
    body: &[u8],
) -> Result<BytesMut, ProtocolError> {
    if extras.len() > u8::MAX as usize {
        return Err(ProtocolError::invalid(format!(
            "extras length {} exceeds {}",
            extras.len(),
            u8::MAX
        )));
    }
    let key_max = if magic.is_flexible() {
        u8::MAX as usize
    } else {
        u16::MAX as usize
    };
    if key.len() > key_max {
        return Err(ProtocolError::invalid(format!(
            "key length {} exceeds {}",
            key.len(),
            key_max
        )));
    }
    if flexible_extras.len() > u8::MAX as usize {
        return Err(ProtocolError::invalid(format!(
            "flexible extras length {} exceeds {}",
            flexible_extras.len(),
            u8::MAX
        )));
    }

    let total_body = flexible_extras.len() + extras.len() + key.len() + body.len();
    if total_body > u32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge {
            size: total_body,
            max: u32::MAX as usize,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + total_body);
    buf.put_u8(magic.byte());
    buf.put_u8(opcode);
    if magic.is_flexible() {
        buf.put_u8(flexible_extras.len() as u8);
        buf.put_u8(key.len() as u8);
    } else {
        buf.put_u16(key.len() as u16);
    }
    buf.put_u8(extras.len() as u8);
    buf.put_u8(datatype.bits());
    buf.put_u16(slot);
    buf.put_u32(total_body as u32);
    buf.put_u32(opaque);
    buf.put_u64(cas);

    buf.put_slice(flexible_extras);
    buf.put_slice(extras);
    buf.put_slice(key);
    buf.put_slice(body);

    Ok(buf)
}

/// Reads the total body length declared in a frame header.
pub(crate) fn declared_body_len(header: &[u8]) -> usize {
    u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize
}

/// Reads the opaque id of a raw frame without validating the rest of it.
///
/// Lets a reader route a frame that later fails [`ResponseFrame::parse`] to
/// the request it belongs to.
pub fn peek_opaque(frame: &[u8]) -> Option<u32> {
    if frame.len() < HEADER_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]))
}

/// A response frame whose declared lengths have been checked against the
/// received bytes.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    magic: Magic,
    opcode: u8,
    datatype: Datatype,
    status: Status,
    opaque: u32,
    cas: u64,
    flexible_extras: Bytes,
    extras: Bytes,
    key: Bytes,
    value: Bytes,
}

impl ResponseFrame {
    /// Parses one complete response frame, taking ownership of its bytes.
    pub fn parse(mut frame: Bytes) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_SIZE {
            return Err(ProtocolError::malformed(format!(
                "frame has {} bytes, header needs {}",
                frame.len(),
                HEADER_SIZE
            )));
        }

        let magic = Magic::from_byte(frame[0])?;
        if !magic.is_response() {
            return Err(ProtocolError::InvalidMagic(frame[0]));
        }

        let (flexible_len, key_len) = if magic.is_flexible() {
            (frame[2] as usize, frame[3] as usize)
        } else {
            (0, u16::from_be_bytes([frame[2], frame[3]]) as usize)
        };
        let extras_len = frame[4] as usize;
        let total_body = declared_body_len(&frame);

        let framed = flexible_len + extras_len + key_len;
        if framed > total_body {
            return Err(ProtocolError::malformed(format!(
                "header lengths {} exceed declared body {}",
                framed, total_body
            )));
        }
        if frame.len() != HEADER_SIZE + total_body {
            return Err(ProtocolError::malformed(format!(
                "declared body {} but received {}",
                total_body,
                frame.len() - HEADER_SIZE
            )));
        }

        let header = frame.split_to(HEADER_SIZE);
        let flexible_extras = frame.split_to(flexible_len);
        let extras = frame.split_to(extras_len);
        let key = frame.split_to(key_len);

        Ok(Self {
            magic,
            opcode: header[1],
            datatype: Datatype::from_bits(header[5]),
            status: Status::from_code(u16::from_be_bytes([header[6], header[7]])),
            opaque: u32::from_be_bytes([header[12], header[13], header[14], header[15]]),
            cas: u64::from_be_bytes([
                header[16], header[17], header[18], header[19], header[20], header[21],
                header[22], header[23],
            ]),
            flexible_extras,
            extras,
            key,
            value: frame,
        })
    }

    pub fn magic(&self) -> Magic {
        self.magic
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn opaque(&self) -> u32 {
        self.opaque
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn flexible_extras(&self) -> &Bytes {
        &self.flexible_extras
    }

    pub fn extras(&self) -> &Bytes {
        &self.extras
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Returns the value, or `None` when the frame carries no value bytes.
    pub fn body(&self) -> Option<Bytes> {
        if self.value.is_empty() {
            None
        } else {
            Some(self.value.clone())
        }
    }
}

/// Sequence-number based token identifying a mutation on a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationToken {
    pub partition_id: u16,
    pub partition_uuid: u64,
    pub sequence_number: u64,
    pub bucket_name: String,
}

/// Extracts a mutation token from the response extras.
///
/// Returns `None` when tokens are disabled for the channel or the server did
/// not send one (failed mutations carry no extras).
pub fn decode_mutation_token(
    frame: &ResponseFrame,
    partition_id: u16,
    bucket_name: &str,
    enabled: bool,
) -> Result<Option<MutationToken>, ProtocolError> {
    if !enabled || frame.extras().is_empty() {
        return Ok(None);
    }
    let extras = frame.extras();
    if extras.len() < 16 {
        return Err(ProtocolError::malformed(format!(
            "mutation token needs 16 extras bytes, got {}",
            extras.len()
        )));
    }
    let mut uuid = [0u8; 8];
    let mut seqno = [0u8; 8];
    uuid.copy_from_slice(&extras[0..8]);
    seqno.copy_from_slice(&extras[8..16]);
    Ok(Some(MutationToken {
        partition_id,
        partition_uuid: u64::from_be_bytes(uuid),
        sequence_number: u64::from_be_bytes(seqno),
        bucket_name: bucket_name.to_string(),
    }))
}
