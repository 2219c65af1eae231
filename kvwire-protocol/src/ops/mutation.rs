use super::{encode_write, DocId};
use crate::compression::maybe_compress;
use crate::context::ChannelContext;
use crate::durability::DurabilityLevel;
use crate::error::{ProtocolError, Status};
use crate::frame::{decode_mutation_token, Datatype, MutationToken, Opcode, RequestHeader, ResponseFrame};
use bytes::{Bytes, BytesMut};
use std::time::Duration;

/// Full-document write shared by insert, upsert and replace.
///
/// The opcode comes from the [`KvRequest`](super::KvRequest) variant the
/// request is wrapped in.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub id: DocId,
    pub content: Bytes,
    pub flags: u32,
    pub expiry: u32,
    /// Zero means unconditional; anything else must match the stored CAS.
    pub cas: u64,
    pub datatype: Datatype,
    pub durability: Option<DurabilityLevel>,
}

impl MutationRequest {
    pub fn new(id: DocId, content: Bytes) -> Self {
        Self {
            id,
            content,
            flags: 0,
            expiry: 0,
            cas: 0,
            datatype: Datatype::new(),
            durability: None,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_datatype(mut self, datatype: Datatype) -> Self {
        self.datatype = datatype;
        self
    }

    pub fn with_durability(mut self, level: DurabilityLevel) -> Self {
        self.durability = Some(level);
        self
    }

    pub(crate) fn encode(
        &self,
        opcode: Opcode,
        opaque: u32,
        ctx: &ChannelContext,
        timeout: Duration,
    ) -> Result<BytesMut, ProtocolError> {
        let key = ctx.encode_key(&self.id.key, self.id.collection_id);

        let mut extras = [0u8; 8];
        extras[..4].copy_from_slice(&self.flags.to_be_bytes());
        extras[4..].copy_from_slice(&self.expiry.to_be_bytes());

        let (content, datatype) =
            maybe_compress(self.content.clone(), self.datatype, ctx.compression.as_ref());

        let header = RequestHeader::new(opcode, self.id.partition, opaque)
            .with_datatype(datatype)
            .with_cas(self.cas);
        encode_write(header, ctx, self.durability, timeout, &extras, &key, &content)
    }

    pub(crate) fn decode(
        &self,
        frame: &ResponseFrame,
        ctx: &ChannelContext,
    ) -> Result<MutationResponse, ProtocolError> {
        decode_mutation(frame, self.id.partition, ctx)
    }
}

/// Deletes a document, optionally guarded by CAS.
#[derive(Debug, Clone)]
pub struct RemoveRequest {
    pub id: DocId,
    pub cas: u64,
    pub durability: Option<DurabilityLevel>,
}

impl RemoveRequest {
    pub fn new(id: DocId) -> Self {
        Self {
            id,
            cas: 0,
            durability: None,
        }
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_durability(mut self, level: DurabilityLevel) -> Self {
        self.durability = Some(level);
        self
    }

    pub(crate) fn encode(
        &self,
        opaque: u32,
        ctx: &ChannelContext,
        timeout: Duration,
    ) -> Result<BytesMut, ProtocolError> {
        let key = ctx.encode_key(&self.id.key, self.id.collection_id);
        let header = RequestHeader::new(Opcode::Remove, self.id.partition, opaque).with_cas(self.cas);
        encode_write(header, ctx, self.durability, timeout, &[], &key, &[])
    }

    pub(crate) fn decode(
        &self,
        frame: &ResponseFrame,
        ctx: &ChannelContext,
    ) -> Result<MutationResponse, ProtocolError> {
        decode_mutation(frame, self.id.partition, ctx)
    }
}

/// Outcome of a write. The written value is not echoed back.
#[derive(Debug, Clone)]
pub struct MutationResponse {
    pub status: Status,
    pub cas: u64,
    pub token: Option<MutationToken>,
}

fn decode_mutation(
    frame: &ResponseFrame,
    partition: u16,
    ctx: &ChannelContext,
) -> Result<MutationResponse, ProtocolError> {
    let status = frame.status();
    let token = if status.is_success() {
        decode_mutation_token(frame, partition, &ctx.bucket_name, ctx.mutation_tokens_enabled)?
    } else {
        None
    };
    Ok(MutationResponse {
        status,
        cas: frame.cas(),
        token,
    })
}
