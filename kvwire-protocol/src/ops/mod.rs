//! Operation codecs.
//!
//! Every server operation is one variant of [`KvRequest`]. A request knows how
//! to produce its extras, key and value against the frame codec and how to
//! interpret the matching response; it never touches sockets or opaque
//! allocation, which belong to the dispatcher.

mod counter;
mod get;
mod lookup;
mod mutation;

pub use counter::{CounterDirection, CounterRequest, CounterResponse, COUNTER_NOT_EXISTS_EXPIRY};
pub use get::{GetRequest, GetResponse};
pub use lookup::{
    LookupCommand, LookupCommandKind, LookupInRequest, LookupInResponse, LookupResult,
    DOC_FLAG_ACCESS_DELETED, PATH_FLAG_XATTR,
};
pub use mutation::{MutationRequest, MutationResponse, RemoveRequest};

use crate::context::ChannelContext;
use crate::durability::{encode_durability, DurabilityLevel};
use crate::error::{ProtocolError, Status};
use crate::frame::{build_flexible_request, build_request, Opcode, RequestHeader, ResponseFrame};
use bytes::BytesMut;
use std::time::Duration;

/// Addresses one document: key, collection and the partition it lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocId {
    pub key: String,
    pub collection_id: u32,
    pub partition: u16,
}

impl DocId {
    /// A key in the default collection.
    pub fn new(key: impl Into<String>, partition: u16) -> Self {
        Self {
            key: key.into(),
            collection_id: 0,
            partition,
        }
    }

    pub fn with_collection(mut self, collection_id: u32) -> Self {
        self.collection_id = collection_id;
        self
    }
}

/// A typed key-value request.
#[derive(Debug, Clone)]
pub enum KvRequest {
    Get(GetRequest),
    Insert(MutationRequest),
    Upsert(MutationRequest),
    Replace(MutationRequest),
    Remove(RemoveRequest),
    Increment(CounterRequest),
    Decrement(CounterRequest),
    LookupIn(LookupInRequest),
}

impl KvRequest {
    /// Wraps a counter request in the variant for its direction.
    pub fn counter(direction: CounterDirection, request: CounterRequest) -> Self {
        match direction {
            CounterDirection::Increment => KvRequest::Increment(request),
            CounterDirection::Decrement => KvRequest::Decrement(request),
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            KvRequest::Get(_) => Opcode::Get,
            KvRequest::Insert(_) => Opcode::Insert,
            KvRequest::Upsert(_) => Opcode::Upsert,
            KvRequest::Replace(_) => Opcode::Replace,
            KvRequest::Remove(_) => Opcode::Remove,
            KvRequest::Increment(_) => Opcode::Increment,
            KvRequest::Decrement(_) => Opcode::Decrement,
            KvRequest::LookupIn(_) => Opcode::SubdocMultiLookup,
        }
    }

    pub fn doc_id(&self) -> &DocId {
        match self {
            KvRequest::Get(r) => &r.id,
            KvRequest::Insert(r) | KvRequest::Upsert(r) | KvRequest::Replace(r) => &r.id,
            KvRequest::Remove(r) => &r.id,
            KvRequest::Increment(r) | KvRequest::Decrement(r) => &r.id,
            KvRequest::LookupIn(r) => &r.id,
        }
    }

    /// Durability requested by a write, if any.
    pub fn durability(&self) -> Option<DurabilityLevel> {
        let level = match self {
            KvRequest::Insert(r) | KvRequest::Upsert(r) | KvRequest::Replace(r) => r.durability,
            KvRequest::Remove(r) => r.durability,
            KvRequest::Increment(r) | KvRequest::Decrement(r) => r.durability,
            KvRequest::Get(_) | KvRequest::LookupIn(_) => None,
        };
        level.filter(|l| *l != DurabilityLevel::None)
    }

    /// Reads can be replayed without changing server state.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, KvRequest::Get(_) | KvRequest::LookupIn(_))
    }

    /// Checks caller-supplied values before anything is encoded.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            KvRequest::Increment(r) | KvRequest::Decrement(r) => r.validate(),
            KvRequest::LookupIn(r) => r.validate(),
            KvRequest::Insert(r) if r.cas != 0 => Err(ProtocolError::InvalidArgument(
                "insert cannot carry a CAS value".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Encodes the request into a new frame.
    ///
    /// `timeout` is the request timeout; durable writes forward it to the
    /// server as the synchronous replication deadline.
    pub fn encode(
        &self,
        opaque: u32,
        ctx: &ChannelContext,
        timeout: Duration,
    ) -> Result<BytesMut, ProtocolError> {
        self.validate()?;
        let opcode = self.opcode();
        match self {
            KvRequest::Get(r) => r.encode(opaque, ctx),
            KvRequest::Insert(r) | KvRequest::Upsert(r) | KvRequest::Replace(r) => {
                r.encode(opcode, opaque, ctx, timeout)
            }
            KvRequest::Remove(r) => r.encode(opaque, ctx, timeout),
            KvRequest::Increment(r) | KvRequest::Decrement(r) => {
                r.encode(opcode, opaque, ctx, timeout)
            }
            KvRequest::LookupIn(r) => r.encode(opaque, ctx),
        }
    }

    /// Interprets the response frame matched to this request.
    pub fn decode(
        &self,
        frame: &ResponseFrame,
        ctx: &ChannelContext,
    ) -> Result<KvResponse, ProtocolError> {
        if frame.opcode() != self.opcode().byte() {
            return Err(ProtocolError::malformed(format!(
                "response opcode {:#04x} does not match request opcode {:#04x}",
                frame.opcode(),
                self.opcode().byte()
            )));
        }
        match self {
            KvRequest::Get(r) => r.decode(frame).map(KvResponse::Get),
            KvRequest::Insert(r) | KvRequest::Upsert(r) | KvRequest::Replace(r) => {
                r.decode(frame, ctx).map(KvResponse::Mutation)
            }
            KvRequest::Remove(r) => r.decode(frame, ctx).map(KvResponse::Mutation),
            KvRequest::Increment(r) | KvRequest::Decrement(r) => {
                r.decode(frame, ctx).map(KvResponse::Counter)
            }
            KvRequest::LookupIn(r) => r.decode(frame).map(KvResponse::LookupIn),
        }
    }
}

/// A decoded response, one variant per response shape.
#[derive(Debug, Clone)]
pub enum KvResponse {
    Get(GetResponse),
    Mutation(MutationResponse),
    Counter(CounterResponse),
    LookupIn(LookupInResponse),
}

impl KvResponse {
    pub fn status(&self) -> Status {
        match self {
            KvResponse::Get(r) => r.status,
            KvResponse::Mutation(r) => r.status,
            KvResponse::Counter(r) => r.status,
            KvResponse::LookupIn(r) => r.status,
        }
    }

    pub fn cas(&self) -> u64 {
        match self {
            KvResponse::Get(r) => r.cas,
            KvResponse::Mutation(r) => r.cas,
            KvResponse::Counter(r) => r.cas,
            KvResponse::LookupIn(r) => r.cas,
        }
    }

    /// Whether the response represents a successful operation.
    ///
    /// A lookup whose individual paths failed is still a successful request;
    /// the failures are reported per path.
    pub fn is_success(&self) -> bool {
        match self {
            KvResponse::LookupIn(r) => r.status.is_success() || r.status == Status::SubdocMultiPathFailure,
            other => other.status().is_success(),
        }
    }
}

/// Writes a frame, switching to flexible framing when durability is both
/// requested and supported by the channel.
///
/// A durability level on a channel without synchronous replication is dropped
/// and the plain frame is sent.
#[allow(clippy::too_many_arguments)]
pub(crate) fn encode_write(
    header: RequestHeader,
    ctx: &ChannelContext,
    durability: Option<DurabilityLevel>,
    timeout: Duration,
    extras: &[u8],
    key: &[u8],
    body: &[u8],
) -> Result<BytesMut, ProtocolError> {
    match durability {
        Some(level) if level != DurabilityLevel::None && ctx.sync_replication_enabled => {
            let flexible = encode_durability(level, timeout);
            build_flexible_request(header, &flexible, extras, key, body)
        }
        Some(level) if level != DurabilityLevel::None => {
            tracing::debug!(
                ?level,
                "channel has no synchronous replication, sending write without durability"
            );
            build_request(header, extras, key, body)
        }
        _ => build_request(header, extras, key, body),
    }
}
