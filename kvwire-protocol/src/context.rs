//! Per-connection snapshot of negotiated features.

use crate::compression::CompressionConfig;

/// Features negotiated on one connection.
///
/// Operation codecs consult it at encode and decode time. It is built once
/// when the connection is set up and never changes while requests are in
/// flight; a renegotiation means a new connection with a new context.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelContext {
    pub collections_enabled: bool,
    pub sync_replication_enabled: bool,
    pub mutation_tokens_enabled: bool,
    /// `None` when Snappy was not negotiated.
    pub compression: Option<CompressionConfig>,
    pub bucket_name: String,
}

impl ChannelContext {
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self {
            collections_enabled: false,
            sync_replication_enabled: false,
            mutation_tokens_enabled: false,
            compression: None,
            bucket_name: bucket_name.into(),
        }
    }

    pub fn with_collections(mut self) -> Self {
        self.collections_enabled = true;
        self
    }

    pub fn with_sync_replication(mut self) -> Self {
        self.sync_replication_enabled = true;
        self
    }

    pub fn with_mutation_tokens(mut self) -> Self {
        self.mutation_tokens_enabled = true;
        self
    }

    pub fn with_compression(mut self, config: CompressionConfig) -> Self {
        self.compression = Some(config);
        self
    }

    /// Encodes a document key for the wire.
    ///
    /// With collections enabled the key is prefixed by the unsigned LEB128
    /// encoding of the collection id; otherwise the raw key is used and the
    /// collection id is ignored.
    pub fn encode_key(&self, key: &str, collection_id: u32) -> Vec<u8> {
        if !self.collections_enabled {
            return key.as_bytes().to_vec();
        }
        let mut out = Vec::with_capacity(key.len() + 5);
        let mut id = collection_id;
        loop {
            let byte = (id & 0x7f) as u8;
            id >>= 7;
            if id == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
        out.extend_from_slice(key.as_bytes());
        out
    }
}
