use super::DocId;
use crate::context::ChannelContext;
use crate::error::{ProtocolError, Status};
use crate::frame::{build_request, Opcode, RequestHeader, ResponseFrame};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Path-level flag marking an extended attribute path.
pub const PATH_FLAG_XATTR: u8 = 0x04;

/// Document-level flag allowing lookups on deleted documents.
pub const DOC_FLAG_ACCESS_DELETED: u8 = 0x04;

/// Kind of a single lookup within a multi-lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupCommandKind {
    Get,
    Exists,
    Count,
    /// Fetches the whole document through the sub-document API.
    GetDoc,
}

impl LookupCommandKind {
    pub fn opcode(&self) -> u8 {
        match self {
            LookupCommandKind::Get => 0xc5,
            LookupCommandKind::Exists => 0xc6,
            LookupCommandKind::Count => 0xd2,
            LookupCommandKind::GetDoc => 0x00,
        }
    }
}

/// One path to look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupCommand {
    pub kind: LookupCommandKind,
    pub path: String,
    pub xattr: bool,
}

impl LookupCommand {
    pub fn new(kind: LookupCommandKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            xattr: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(LookupCommandKind::Get, path)
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Self::new(LookupCommandKind::Exists, path)
    }

    pub fn count(path: impl Into<String>) -> Self {
        Self::new(LookupCommandKind::Count, path)
    }

    pub fn get_doc() -> Self {
        Self::new(LookupCommandKind::GetDoc, "")
    }

    pub fn xattr(mut self) -> Self {
        self.xattr = true;
        self
    }

    fn encoded_len(&self) -> usize {
        4 + self.path.len()
    }

    /// `opcode:u8, flags:u8, path_len:u16, path`
    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind.opcode());
        buf.put_u8(if self.xattr { PATH_FLAG_XATTR } else { 0 });
        buf.put_u16(self.path.len() as u16);
        buf.put_slice(self.path.as_bytes());
    }
}

/// Multi-path sub-document lookup. Results come back in command order.
#[derive(Debug, Clone)]
pub struct LookupInRequest {
    pub id: DocId,
    pub doc_flags: u8,
    pub commands: Vec<LookupCommand>,
}

impl LookupInRequest {
    pub fn new(id: DocId, commands: Vec<LookupCommand>) -> Self {
        Self {
            id,
            doc_flags: 0,
            commands,
        }
    }

    pub fn with_access_deleted(mut self) -> Self {
        self.doc_flags |= DOC_FLAG_ACCESS_DELETED;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ProtocolError> {
        if self.commands.is_empty() {
            return Err(ProtocolError::invalid("lookup needs at least one command"));
        }
        if let Some(cmd) = self.commands.iter().find(|c| c.path.len() > u16::MAX as usize) {
            return Err(ProtocolError::invalid(format!(
                "lookup path of {} bytes exceeds {}",
                cmd.path.len(),
                u16::MAX
            )));
        }
        Ok(())
    }

    pub(crate) fn encode(&self, opaque: u32, ctx: &ChannelContext) -> Result<BytesMut, ProtocolError> {
        let key = ctx.encode_key(&self.id.key, self.id.collection_id);

        let mut body = BytesMut::with_capacity(self.commands.iter().map(|c| c.encoded_len()).sum());
        for command in &self.commands {
            command.encode_into(&mut body);
        }

        let flags = [self.doc_flags];
        let extras: &[u8] = if self.doc_flags != 0 { &flags } else { &[] };

        let header = RequestHeader::new(Opcode::SubdocMultiLookup, self.id.partition, opaque);
        build_request(header, extras, &key, &body)
    }

    pub(crate) fn decode(&self, frame: &ResponseFrame) -> Result<LookupInResponse, ProtocolError> {
        let status = frame.status();
        let carries_results = status.is_success() || status == Status::SubdocMultiPathFailure;

        let values = match frame.body() {
            Some(body) if carries_results => self.decode_values(body)?,
            _ => Vec::new(),
        };

        Ok(LookupInResponse {
            status,
            values,
            cas: frame.cas(),
        })
    }

    /// Reads exactly one `status:u16, len:u32, value` triple per command.
    fn decode_values(&self, mut body: Bytes) -> Result<Vec<LookupResult>, ProtocolError> {
        let mut values = Vec::with_capacity(self.commands.len());
        for (index, command) in self.commands.iter().enumerate() {
            if body.remaining() < 6 {
                return Err(ProtocolError::malformed(format!(
                    "lookup response ended at result {} of {}",
                    index,
                    self.commands.len()
                )));
            }
            let status = Status::from_code(body.get_u16());
            let len = body.get_u32() as usize;
            if body.remaining() < len {
                return Err(ProtocolError::malformed(format!(
                    "lookup result {} declares {} bytes, {} left",
                    index,
                    len,
                    body.remaining()
                )));
            }
            values.push(LookupResult {
                path: command.path.clone(),
                status,
                value: body.split_to(len),
            });
        }
        if body.has_remaining() {
            return Err(ProtocolError::malformed(format!(
                "{} trailing bytes after {} lookup results",
                body.remaining(),
                self.commands.len()
            )));
        }
        Ok(values)
    }
}

/// Outcome of one lookup command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    pub path: String,
    pub status: Status,
    pub value: Bytes,
}

/// Per-command results, in the order the commands were issued.
#[derive(Debug, Clone)]
pub struct LookupInResponse {
    pub status: Status,
    pub values: Vec<LookupResult>,
    pub cas: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{build_response, Datatype, ResponseHeader, HEADER_SIZE};

    fn commands() -> Vec<LookupCommand> {
        vec![
            LookupCommand::get("a.b"),
            LookupCommand::exists("c"),
            LookupCommand::count("d"),
        ]
    }

    fn triple(buf: &mut BytesMut, status: Status, value: &[u8]) {
        buf.put_u16(status.code());
        buf.put_u32(value.len() as u32);
        buf.put_slice(value);
    }

    fn response(status: Status, body: &[u8]) -> ResponseFrame {
        let frame = build_response(
            ResponseHeader {
                opcode: Opcode::SubdocMultiLookup,
                datatype: Datatype::new(),
                status,
                opaque: 1,
                cas: 10,
            },
            &[],
            &[],
            body,
        )
        .unwrap();
        ResponseFrame::parse(frame.freeze()).unwrap()
    }

    #[test]
    fn test_encode_preserves_order() {
        let ctx = ChannelContext::new("default");
        let request = LookupInRequest::new(
            DocId::new("k", 0),
            vec![LookupCommand::get("a.b"), LookupCommand::exists("meta").xattr()],
        );
        let frame = request.encode(1, &ctx).unwrap();
        assert_eq!(frame[4], 0);

        let body = &frame[HEADER_SIZE + 1..];
        assert_eq!(body, &[0xc5, 0x00, 0x00, 0x03, b'a', b'.', b'b', 0xc6, 0x04, 0x00, 0x04, b'm', b'e', b't', b'a'][..]);
    }

    #[test]
    fn test_single_command_body() {
        let ctx = ChannelContext::new("default");
        let request = LookupInRequest::new(DocId::new("k", 0), vec![LookupCommand::get_doc()]);
        let frame = request.encode(1, &ctx).unwrap();
        assert_eq!(&frame[HEADER_SIZE + 1..], &[0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_doc_flags_only_when_set() {
        let ctx = ChannelContext::new("default");
        let request = LookupInRequest::new(DocId::new("k", 0), vec![LookupCommand::get("x")])
            .with_access_deleted();
        let frame = request.encode(1, &ctx).unwrap();
        assert_eq!(frame[4], 1);
        assert_eq!(frame[HEADER_SIZE], DOC_FLAG_ACCESS_DELETED);
    }

    #[test]
    fn test_empty_command_list_rejected() {
        let request = LookupInRequest::new(DocId::new("k", 0), Vec::new());
        assert!(matches!(request.validate(), Err(ProtocolError::InvalidArgument(_))));
    }

    #[test]
    fn test_decode_in_command_order() {
        let mut body = BytesMut::new();
        triple(&mut body, Status::Success, b"1");
        triple(&mut body, Status::SubdocPathNotFound, b"");
        triple(&mut body, Status::Success, b"3");

        let request = LookupInRequest::new(DocId::new("k", 0), commands());
        let decoded = request.decode(&response(Status::SubdocMultiPathFailure, &body)).unwrap();

        let paths: Vec<&str> = decoded.values.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["a.b", "c", "d"]);
        assert_eq!(decoded.values[0].value.as_ref(), b"1");
        assert_eq!(decoded.values[1].status, Status::SubdocPathNotFound);
        assert_eq!(decoded.values[2].value.as_ref(), b"3");
        assert_eq!(decoded.cas, 10);
    }

    #[test]
    fn test_one_fewer_result_is_malformed() {
        let mut body = BytesMut::new();
        triple(&mut body, Status::Success, b"1");
        triple(&mut body, Status::Success, b"true");

        let request = LookupInRequest::new(DocId::new("k", 0), commands());
        assert!(matches!(
            request.decode(&response(Status::Success, &body)),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_one_extra_result_is_malformed() {
        let mut body = BytesMut::new();
        for _ in 0..4 {
            triple(&mut body, Status::Success, b"1");
        }

        let request = LookupInRequest::new(DocId::new("k", 0), commands());
        assert!(matches!(
            request.decode(&response(Status::Success, &body)),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_value_length_past_body_is_malformed() {
        let mut body = BytesMut::new();
        body.put_u16(0);
        body.put_u32(100);
        body.put_slice(b"short");

        let request = LookupInRequest::new(DocId::new("k", 0), vec![LookupCommand::get("a")]);
        assert!(matches!(
            request.decode(&response(Status::Success, &body)),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_no_body_gives_empty_results() {
        let request = LookupInRequest::new(DocId::new("k", 0), commands());
        let decoded = request.decode(&response(Status::Success, &[])).unwrap();
        assert!(decoded.values.is_empty());

        let decoded = request.decode(&response(Status::KeyNotFound, b"err")).unwrap();
        assert_eq!(decoded.status, Status::KeyNotFound);
        assert!(decoded.values.is_empty());
    }
}
