//! Command payload codec
//!
//! The payload carried inside a PDU: a command byte, a request
//! correlation id, an optional explicit log name and a serialized
//! metadata block. The broker needs to peek into the metadata both for
//! the optional human-readable name and to derive the default log name
//! (the SHA-256 digest of the serialized block).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::address::{ADDR_LEN, Address};
use crate::error::BrokerError;

/// Create a new log
pub const CMD_CREATE: u8 = 66;

/// First acknowledgement code
pub const ACK_MIN: u8 = 128;
/// Last acknowledgement code
pub const ACK_MAX: u8 = 191;
/// First client-error NAK code
pub const NAK_C_MIN: u8 = 192;
/// Last client-error NAK code
pub const NAK_C_MAX: u8 = 223;
/// First server-error NAK code
pub const NAK_S_MIN: u8 = 224;
/// Last server-error NAK code
pub const NAK_S_MAX: u8 = 239;
/// First routing-layer NAK code
pub const NAK_R_MIN: u8 = 240;
/// Last routing-layer NAK code
pub const NAK_R_MAX: u8 = 254;

/// Bad request
pub const NAK_C_BADREQ: u8 = 192;
/// The named resource already exists
pub const NAK_C_CONFLICT: u8 = 201;
/// Command not implemented by this service
pub const NAK_S_NOTIMPL: u8 = 225;
/// Transient internal failure; the request may be retried
pub const NAK_S_INTERNAL: u8 = 226;

/// Metadata id carrying an optional human-readable log name
pub const METADATA_HUMAN_NAME: u32 = 0x0058_4944;

const LOGNAME_PRESENT: u8 = 0x01;

/// Decoded command payload
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPayload {
    /// Command or acknowledgement code
    pub cmd: u8,
    /// Request correlation id
    pub rid: i64,
    /// Explicit log name, overriding the metadata-derived default
    pub logname: Option<Address>,
    /// Serialized metadata block
    pub metadata: Bytes,
}

impl CommandPayload {
    /// Create a payload with no explicit log name
    pub fn new(cmd: u8, rid: i64, metadata: Bytes) -> Self {
        Self {
            cmd,
            rid,
            logname: None,
            metadata,
        }
    }

    /// Serialize to wire form
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(10 + ADDR_LEN + self.metadata.len());
        buf.put_u8(self.cmd);
        buf.put_i64(self.rid);
        match &self.logname {
            Some(logname) => {
                buf.put_u8(LOGNAME_PRESENT);
                buf.put_slice(logname.as_bytes());
            }
            None => buf.put_u8(0),
        }
        buf.put_slice(&self.metadata);
        buf.freeze()
    }

    /// Parse from wire form
    pub fn decode(data: &Bytes) -> Result<Self, BrokerError> {
        let mut buf = data.clone();
        if buf.remaining() < 10 {
            return Err(BrokerError::Malformed(format!(
                "command payload too short: {} bytes",
                buf.remaining()
            )));
        }
        let cmd = buf.get_u8();
        let rid = buf.get_i64();
        let flags = buf.get_u8();
        let logname = if flags & LOGNAME_PRESENT != 0 {
            if buf.remaining() < ADDR_LEN {
                return Err(BrokerError::Malformed(
                    "truncated log name in command payload".to_string(),
                ));
            }
            Some(Address::try_from(&buf.copy_to_bytes(ADDR_LEN)[..])?)
        } else {
            None
        };
        Ok(Self {
            cmd,
            rid,
            logname,
            metadata: buf,
        })
    }

    /// The human-readable name embedded in the metadata, if any, and the
    /// log name this request addresses.
    ///
    /// The log name defaults to the SHA-256 digest of the serialized
    /// metadata block; an explicit `logname` field takes precedence.
    pub fn extract_name(&self) -> (Option<String>, Address) {
        let entries = parse_metadata(&self.metadata);
        let human_name = entries
            .iter()
            .find(|(id, _)| *id == METADATA_HUMAN_NAME)
            .and_then(|(_, value)| String::from_utf8(value.to_vec()).ok());

        let mut hasher = Sha256::new();
        hasher.update(&self.metadata);
        let derived = Address::from_bytes(hasher.finalize().into());

        let logname = match self.logname {
            Some(explicit) if explicit != derived => {
                debug!("explicit log name overrides metadata digest");
                explicit
            }
            Some(explicit) => explicit,
            None => derived,
        };

        (human_name, logname)
    }
}

/// Parse a serialized metadata block into (id, value) entries.
///
/// Layout: entry count (u16), then per entry a 4-byte big-endian id and
/// a 4-byte big-endian length, then the concatenated values. Truncated
/// input yields an empty list; trailing bytes are reported and ignored.
pub fn parse_metadata(data: &[u8]) -> Vec<(u32, Bytes)> {
    let mut buf = data;
    if buf.remaining() < 2 {
        if !buf.is_empty() {
            warn!("incomplete data when parsing metadata");
        }
        return Vec::new();
    }
    let count = buf.get_u16() as usize;

    if buf.remaining() < count * 8 {
        warn!("incomplete data when parsing metadata");
        return Vec::new();
    }
    let mut headers = Vec::with_capacity(count);
    for _ in 0..count {
        let id = buf.get_u32();
        let len = buf.get_u32() as usize;
        headers.push((id, len));
    }

    let mut entries = Vec::with_capacity(count);
    for (id, len) in headers {
        if buf.remaining() < len {
            warn!("incomplete data when parsing metadata");
            return Vec::new();
        }
        entries.push((id, Bytes::copy_from_slice(&buf[..len])));
        buf.advance(len);
    }

    if buf.has_remaining() {
        warn!(
            leftover = buf.remaining(),
            "leftover bytes when parsing metadata"
        );
    }
    entries
}

/// Serialize (id, value) entries into a metadata block
pub fn serialize_metadata(entries: &[(u32, Bytes)]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u16(entries.len() as u16);
    for (id, value) in entries {
        buf.put_u32(*id);
        buf.put_u32(value.len() as u32);
    }
    for (_, value) in entries {
        buf.put_slice(value);
    }
    buf.freeze()
}
