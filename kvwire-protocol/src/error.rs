//! Protocol error types and response status codes.

use std::fmt;
use thiserror::Error;

/// Errors raised while building or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A caller-supplied value violates a precondition. Raised before any
    /// byte is written, so the request never reaches the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The received bytes disagree with the lengths declared in the header,
    /// or an operation body does not match the shape of its request.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("compression error: {0}")]
    Compression(#[from] snap::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ProtocolError::MalformedResponse(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ProtocolError::InvalidArgument(msg.into())
    }
}

/// Response status carried in the partition/status slot of a response header.
///
/// Codes the core knows about map to named variants; everything else is kept
/// verbatim in [`Status::Unknown`] so it can still be surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    KeyNotFound,
    /// CAS mismatch, or the key already exists on insert.
    KeyExists,
    TooBig,
    InvalidArguments,
    NotStored,
    NotMyVbucket,
    Locked,
    TemporaryFailure,
    DurabilityImpossible,
    SyncWriteInProgress,
    SyncWriteAmbiguous,
    SubdocPathNotFound,
    /// At least one lookup path failed; per-path statuses are in the body.
    SubdocMultiPathFailure,
    Unknown(u16),
}

impl Status {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x00 => Status::Success,
            0x01 => Status::KeyNotFound,
            0x02 => Status::KeyExists,
            0x03 => Status::TooBig,
            0x04 => Status::InvalidArguments,
            0x05 => Status::NotStored,
            0x07 => Status::NotMyVbucket,
            0x09 => Status::Locked,
            0x86 => Status::TemporaryFailure,
            0xa1 => Status::DurabilityImpossible,
            0xa2 => Status::SyncWriteInProgress,
            0xa3 => Status::SyncWriteAmbiguous,
            0xc0 => Status::SubdocPathNotFound,
            0xcc => Status::SubdocMultiPathFailure,
            other => Status::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Status::Success => 0x00,
            Status::KeyNotFound => 0x01,
            Status::KeyExists => 0x02,
            Status::TooBig => 0x03,
            Status::InvalidArguments => 0x04,
            Status::NotStored => 0x05,
            Status::NotMyVbucket => 0x07,
            Status::Locked => 0x09,
            Status::TemporaryFailure => 0x86,
            Status::DurabilityImpossible => 0xa1,
            Status::SyncWriteInProgress => 0xa2,
            Status::SyncWriteAmbiguous => 0xa3,
            Status::SubdocPathNotFound => 0xc0,
            Status::SubdocMultiPathFailure => 0xcc,
            Status::Unknown(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    /// Returns whether a request failing with this status may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Status::NotMyVbucket
                | Status::Locked
                | Status::TemporaryFailure
                | Status::SyncWriteInProgress
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "SUCCESS"),
            Status::KeyNotFound => write!(f, "KEY_NOT_FOUND"),
            Status::KeyExists => write!(f, "KEY_EXISTS"),
            Status::TooBig => write!(f, "TOO_BIG"),
            Status::InvalidArguments => write!(f, "INVALID_ARGUMENTS"),
            Status::NotStored => write!(f, "NOT_STORED"),
            Status::NotMyVbucket => write!(f, "NOT_MY_VBUCKET"),
            Status::Locked => write!(f, "LOCKED"),
            Status::TemporaryFailure => write!(f, "TEMPORARY_FAILURE"),
            Status::DurabilityImpossible => write!(f, "DURABILITY_IMPOSSIBLE"),
            Status::SyncWriteInProgress => write!(f, "SYNC_WRITE_IN_PROGRESS"),
            Status::SyncWriteAmbiguous => write!(f, "SYNC_WRITE_AMBIGUOUS"),
            Status::SubdocPathNotFound => write!(f, "SUBDOC_PATH_NOT_FOUND"),
            Status::SubdocMultiPathFailure => write!(f, "SUBDOC_MULTI_PATH_FAILURE"),
            Status::Unknown(code) => write!(f, "UNKNOWN({:#06x})", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryable() {
        assert!(Status::NotMyVbucket.is_retryable());
        assert!(Status::Locked.is_retryable());
        assert!(Status::TemporaryFailure.is_retryable());
        assert!(Status::SyncWriteInProgress.is_retryable());

        assert!(!Status::Success.is_retryable());
        assert!(!Status::KeyNotFound.is_retryable());
        assert!(!Status::KeyExists.is_retryable());
        assert!(!Status::SyncWriteAmbiguous.is_retryable());
        assert!(!Status::Unknown(0x7f).is_retryable());
    }

    #[test]
    fn test_status_code_mapping() {
        for code in [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x07, 0x09, 0x86, 0xa1, 0xa2, 0xa3, 0xc0, 0xcc] {
            let status = Status::from_code(code);
            assert!(!matches!(status, Status::Unknown(_)), "code {:#x}", code);
            assert_eq!(status.code(), code);
        }
        assert_eq!(Status::from_code(0x1234), Status::Unknown(0x1234));
        assert_eq!(Status::Unknown(0x1234).code(), 0x1234);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", Status::KeyExists), "KEY_EXISTS");
        assert_eq!(format!("{}", Status::NotMyVbucket), "NOT_MY_VBUCKET");
        assert_eq!(format!("{}", Status::Unknown(0xab)), "UNKNOWN(0x00ab)");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidMagic(0x42);
        assert!(err.to_string().contains("0x42"));

        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::malformed("short body");
        assert!(err.to_string().contains("short body"));

        let err = ProtocolError::invalid("initial must be >= 0");
        assert!(err.to_string().starts_with("invalid argument"));
    }
}
