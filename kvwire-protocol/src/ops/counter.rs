use super::{encode_write, DocId};
use crate::context::ChannelContext;
use crate::durability::DurabilityLevel;
use crate::error::{ProtocolError, Status};
use crate::frame::{decode_mutation_token, MutationToken, Opcode, RequestHeader, ResponseFrame};
use bytes::BytesMut;
use std::time::Duration;

/// Expiry written when no initial value is given. The server then answers
/// `KeyNotFound` for a missing counter instead of creating it.
///
/// Increment and decrement both go through [`CounterRequest::encode`], so
/// this is the only place the sentinel is defined.
pub const COUNTER_NOT_EXISTS_EXPIRY: u32 = 0xffff_ffff;

/// Which way the counter moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDirection {
    Increment,
    Decrement,
}

impl CounterDirection {
    pub fn opcode(&self) -> Opcode {
        match self {
            CounterDirection::Increment => Opcode::Increment,
            CounterDirection::Decrement => Opcode::Decrement,
        }
    }
}

/// Atomic counter adjustment.
///
/// Extras layout: `delta: u64, initial: u64, expiry: u32`.
#[derive(Debug, Clone)]
pub struct CounterRequest {
    pub id: DocId,
    pub delta: u64,
    /// Value to seed a missing counter with; `None` fails on missing keys.
    pub initial: Option<i64>,
    pub expiry: u32,
    pub durability: Option<DurabilityLevel>,
}

impl CounterRequest {
    pub fn new(
        id: DocId,
        delta: u64,
        initial: Option<i64>,
        expiry: u32,
    ) -> Result<Self, ProtocolError> {
        let request = Self {
            id,
            delta,
            initial,
            expiry,
            durability: None,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn with_durability(mut self, level: DurabilityLevel) -> Self {
        self.durability = Some(level);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ProtocolError> {
        match self.initial {
            Some(initial) if initial < 0 => Err(ProtocolError::invalid(format!(
                "counter initial value must be >= 0, got {}",
                initial
            ))),
            _ => Ok(()),
        }
    }

    /// Builds the 20 byte extras block.
    pub fn extras(&self) -> [u8; 20] {
        let (initial, expiry) = match self.initial {
            Some(initial) => (initial as u64, self.expiry),
            None => (0, COUNTER_NOT_EXISTS_EXPIRY),
        };
        let mut extras = [0u8; 20];
        extras[..8].copy_from_slice(&self.delta.to_be_bytes());
        extras[8..16].copy_from_slice(&initial.to_be_bytes());
        extras[16..].copy_from_slice(&expiry.to_be_bytes());
        extras
    }

    pub(crate) fn encode(
        &self,
        opcode: Opcode,
        opaque: u32,
        ctx: &ChannelContext,
        timeout: Duration,
    ) -> Result<BytesMut, ProtocolError> {
        self.validate()?;
        let key = ctx.encode_key(&self.id.key, self.id.collection_id);
        let header = RequestHeader::new(opcode, self.id.partition, opaque);
        encode_write(header, ctx, self.durability, timeout, &self.extras(), &key, &[])
    }

    pub(crate) fn decode(
        &self,
        frame: &ResponseFrame,
        ctx: &ChannelContext,
    ) -> Result<CounterResponse, ProtocolError> {
        let status = frame.status();
        if !status.is_success() {
            return Ok(CounterResponse {
                status,
                value: 0,
                cas: frame.cas(),
                token: None,
            });
        }

        let value = match frame.body() {
            Some(body) if body.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&body);
                u64::from_be_bytes(raw)
            }
            Some(body) => {
                return Err(ProtocolError::malformed(format!(
                    "counter value must be 8 bytes, got {}",
                    body.len()
                )))
            }
            None => 0,
        };

        Ok(CounterResponse {
            status,
            value,
            cas: frame.cas(),
            token: decode_mutation_token(
                frame,
                self.id.partition,
                &ctx.bucket_name,
                ctx.mutation_tokens_enabled,
            )?,
        })
    }
}

/// New counter value after the adjustment.
#[derive(Debug, Clone)]
pub struct CounterResponse {
    pub status: Status,
    pub value: u64,
    pub cas: u64,
    pub token: Option<MutationToken>,
}
