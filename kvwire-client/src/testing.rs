//! Simulated server used by the connection and client tests.

use bytes::{Bytes, BytesMut};
use kvwire_protocol::ops::GetRequest;
use kvwire_protocol::{
    build_response, Datatype, DocId, KvRequest, Magic, Opcode, ResponseHeader, Status,
    HEADER_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// A request frame as seen by the server.
#[derive(Debug, Clone)]
pub(crate) struct ReceivedRequest {
    pub magic: u8,
    pub opcode: u8,
    pub opaque: u32,
    pub key: Bytes,
}

impl ReceivedRequest {
    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

pub(crate) struct MockServer {
    stream: DuplexStream,
    buffer: BytesMut,
}

impl MockServer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
        }
    }

    /// Reads the next request frame; `None` once the client hung up.
    pub async fn read_request(&mut self) -> Option<ReceivedRequest> {
        loop {
            if self.buffer.len() >= HEADER_SIZE {
                let body_len = u32::from_be_bytes([
                    self.buffer[8],
                    self.buffer[9],
                    self.buffer[10],
                    self.buffer[11],
                ]) as usize;
                if self.buffer.len() >= HEADER_SIZE + body_len {
                    let frame = self.buffer.split_to(HEADER_SIZE + body_len).freeze();
                    return Some(parse_request(frame));
                }
            }
            match self.stream.read_buf(&mut self.buffer).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    pub async fn send(&mut self, frame: Bytes) {
        self.stream.write_all(&frame).await.unwrap();
    }
}

fn parse_request(frame: Bytes) -> ReceivedRequest {
    let magic = frame[0];
    let flexible = Magic::from_byte(magic).unwrap().is_flexible();
    let (flex_len, key_len) = if flexible {
        (frame[2] as usize, frame[3] as usize)
    } else {
        (0, u16::from_be_bytes([frame[2], frame[3]]) as usize)
    };
    let key_start = HEADER_SIZE + flex_len + frame[4] as usize;
    ReceivedRequest {
        magic,
        opcode: frame[1],
        opaque: u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]),
        key: frame.slice(key_start..key_start + key_len),
    }
}

pub(crate) fn get_request(key: &str) -> KvRequest {
    KvRequest::Get(GetRequest::new(DocId::new(key, 0)))
}

/// Builds the server's answer to `request`.
pub(crate) fn response_frame(
    request: &ReceivedRequest,
    status: Status,
    extras: &[u8],
    body: &[u8],
) -> Bytes {
    build_response(
        ResponseHeader {
            opcode: Opcode::from_byte(request.opcode).unwrap(),
            datatype: Datatype::new(),
            status,
            opaque: request.opaque,
            cas: 0x1234,
        },
        extras,
        &[],
        body,
    )
    .unwrap()
    .freeze()
}
