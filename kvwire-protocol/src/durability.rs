//! Synchronous replication requirements carried in flexible frame extras.
//!
//! A frame-info entry is one byte `id << 4 | len` followed by `len` bytes.
//! Durability uses id `0x1` with either one byte (level only) or three bytes
//! (level plus a big-endian `u16` timeout in milliseconds).

use crate::error::ProtocolError;
use std::time::Duration;

const FRAME_INFO_DURABILITY: u8 = 0x01;

/// Replication/persistence acknowledgement required before a write succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurabilityLevel {
    None,
    Majority,
    MajorityAndPersistToActive,
    PersistToMajority,
}

impl DurabilityLevel {
    pub fn code(&self) -> u8 {
        match self {
            DurabilityLevel::None => 0x00,
            DurabilityLevel::Majority => 0x01,
            DurabilityLevel::MajorityAndPersistToActive => 0x02,
            DurabilityLevel::PersistToMajority => 0x03,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(DurabilityLevel::None),
            0x01 => Some(DurabilityLevel::Majority),
            0x02 => Some(DurabilityLevel::MajorityAndPersistToActive),
            0x03 => Some(DurabilityLevel::PersistToMajority),
            _ => None,
        }
    }
}

/// Decoded durability frame-info entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurabilityRequirement {
    pub level: DurabilityLevel,
    pub timeout_millis: Option<u16>,
}

/// Clamps a request timeout into the `u16` milliseconds the server accepts.
pub fn durability_timeout_millis(timeout: Duration) -> u16 {
    timeout.as_millis().clamp(1, u16::MAX as u128) as u16
}

/// Builds the flexible extras block for a durable write.
pub fn encode_durability(level: DurabilityLevel, timeout: Duration) -> Vec<u8> {
    let millis = durability_timeout_millis(timeout).to_be_bytes();
    vec![
        (FRAME_INFO_DURABILITY << 4) | 3,
        level.code(),
        millis[0],
        millis[1],
    ]
}

/// Walks a flexible extras block and returns the durability entry, if any.
pub fn parse_durability(flexible_extras: &[u8]) -> Result<Option<DurabilityRequirement>, ProtocolError> {
    let mut pos = 0;
    while pos < flexible_extras.len() {
        let id = flexible_extras[pos] >> 4;
        let len = (flexible_extras[pos] & 0x0f) as usize;
        pos += 1;
        if pos + len > flexible_extras.len() {
            return Err(ProtocolError::malformed("frame-info entry runs past flexible extras"));
        }
        let data = &flexible_extras[pos..pos + len];
        pos += len;

        if id != FRAME_INFO_DURABILITY {
            continue;
        }
        let level = data
            .first()
            .and_then(|c| DurabilityLevel::from_code(*c))
            .ok_or_else(|| ProtocolError::malformed("missing or unknown durability level"))?;
        let timeout_millis = match len {
            1 => None,
            3 => Some(u16::from_be_bytes([data[1], data[2]])),
            other => {
                return Err(ProtocolError::malformed(format!(
                    "durability frame-info has length {}",
                    other
                )))
            }
        };
        return Ok(Some(DurabilityRequirement {
            level,
            timeout_millis,
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_majority() {
        let block = encode_durability(DurabilityLevel::Majority, Duration::from_millis(2500));
        assert_eq!(block, vec![0x13, 0x01, 0x09, 0xC4]);

        let parsed = parse_durability(&block).unwrap().unwrap();
        assert_eq!(parsed.level, DurabilityLevel::Majority);
        assert_eq!(parsed.timeout_millis, Some(2500));
    }

    #[test]
    fn test_timeout_clamped() {
        assert_eq!(durability_timeout_millis(Duration::from_secs(3600)), u16::MAX);
        assert_eq!(durability_timeout_millis(Duration::ZERO), 1);
    }

    #[test]
    fn test_level_codes() {
        for level in [
            DurabilityLevel::None,
            DurabilityLevel::Majority,
            DurabilityLevel::MajorityAndPersistToActive,
            DurabilityLevel::PersistToMajority,
        ] {
            assert_eq!(DurabilityLevel::from_code(level.code()), Some(level));
        }
        assert_eq!(DurabilityLevel::from_code(0x04), None);
    }

    #[test]
    fn test_parse_skips_other_entries() {
        // entry id 0x2 with 2 bytes, then a level-only durability entry
        let block = [0x22, 0xAA, 0xBB, 0x11, 0x03];
        let parsed = parse_durability(&block).unwrap().unwrap();
        assert_eq!(parsed.level, DurabilityLevel::PersistToMajority);
        assert_eq!(parsed.timeout_millis, None);
    }

    #[test]
    fn test_parse_truncated_entry() {
        assert!(parse_durability(&[0x13, 0x01]).is_err());
        assert!(parse_durability(&[]).unwrap().is_none());
    }
}
