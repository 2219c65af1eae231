//! # kvwire-protocol
//!
//! Binary key-value wire protocol for kvwire.
//!
//! This crate provides:
//! - Fixed-header framing with optional flexible extras
//! - Size and ratio gated Snappy compression of values
//! - Durability requirements for synchronous replication
//! - Typed request/response codecs for every supported operation
//! - Response status codes
//!
//! Everything here is pure: no I/O, no retained state between calls.

pub mod codec;
pub mod compression;
pub mod context;
pub mod durability;
pub mod error;
pub mod frame;
pub mod ops;

pub use codec::FrameDecoder;
pub use compression::CompressionConfig;
pub use context::ChannelContext;
pub use durability::DurabilityLevel;
pub use error::{ProtocolError, Status};
pub use frame::{
    build_flexible_request, build_request, build_response, decode_mutation_token, peek_opaque,
    Datatype, Magic, MutationToken, Opcode, RequestHeader, ResponseFrame, ResponseHeader,
    HEADER_SIZE,
};
pub use ops::{DocId, KvRequest, KvResponse};

/// Default port of the key-value service.
pub const DEFAULT_PORT: u16 = 11210;

/// Largest frame accepted from the server (20 MiB value plus headers).
pub const MAX_FRAME_SIZE: usize = 20 * 1024 * 1024 + 1024;
