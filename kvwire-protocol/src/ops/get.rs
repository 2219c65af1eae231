use super::DocId;
use crate::compression::decompress;
use crate::context::ChannelContext;
use crate::error::{ProtocolError, Status};
use crate::frame::{build_request, Datatype, Opcode, RequestHeader, ResponseFrame};
use bytes::{Bytes, BytesMut};

/// Fetches a full document.
#[derive(Debug, Clone)]
pub struct GetRequest {
    pub id: DocId,
}

impl GetRequest {
    pub fn new(id: DocId) -> Self {
        Self { id }
    }

    pub(crate) fn encode(&self, opaque: u32, ctx: &ChannelContext) -> Result<BytesMut, ProtocolError> {
        let key = ctx.encode_key(&self.id.key, self.id.collection_id);
        let header = RequestHeader::new(Opcode::Get, self.id.partition, opaque);
        build_request(header, &[], &key, &[])
    }

    pub(crate) fn decode(&self, frame: &ResponseFrame) -> Result<GetResponse, ProtocolError> {
        let status = frame.status();
        if !status.is_success() {
            return Ok(GetResponse {
                status,
                content: Bytes::new(),
                flags: 0,
                datatype: Datatype::new(),
                cas: frame.cas(),
            });
        }

        let extras = frame.extras();
        if extras.len() < 4 {
            return Err(ProtocolError::malformed(format!(
                "get response needs 4 bytes of flags, got {}",
                extras.len()
            )));
        }
        let flags = u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]);

        let mut datatype = frame.datatype();
        let mut content = frame.body().unwrap_or_default();
        if datatype.is_snappy() {
            content = decompress(&content)?;
            datatype = datatype.without_snappy();
        }

        Ok(GetResponse {
            status,
            content,
            flags,
            datatype,
            cas: frame.cas(),
        })
    }
}

/// Document content as returned by the server, always uncompressed.
#[derive(Debug, Clone)]
pub struct GetResponse {
    pub status: Status,
    pub content: Bytes,
    pub flags: u32,
    pub datatype: Datatype,
    pub cas: u64,
}
