//! Wire framing for routing-layer PDUs
//!
//! Fixed 76-octet header: version byte, header length (low six bits,
//! times four), a packed type/flags/address-format byte, TTL, six
//! unused sequence/fragment bytes, big-endian payload length, then the
//! 32-byte destination and source addresses. The payload follows the
//! header.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::address::Address;
use crate::error::BrokerError;

/// Protocol version this codec speaks
pub const PDU_VERSION: u8 = 0x04;

/// Header length byte: low six bits count 4-octet words (19 * 4 = 76)
pub const HEADER_WORDS: u8 = 0x13;

/// Header length in octets
pub const HEADER_LEN: usize = 76;

/// PDU type carrying an address advertisement
pub const PDU_TYPE_ADVERTISE: u8 = 2;

/// PDU type carrying a routing-layer NAK
pub const PDU_TYPE_ROUTER_NAK: u8 = 4;

const DEFAULT_TTL: u8 = 0x0f;

/// A parsed routing-layer PDU
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    /// PDU type (0 = normal, 2 = advertisement, 4 = router NAK)
    pub pdu_type: u8,
    /// Flag bits
    pub flags: u8,
    /// Address format (only 0 is supported)
    pub addr_format: u8,
    /// Remaining hop budget
    pub ttl: u8,
    /// Destination address
    pub dst: Address,
    /// Source address
    pub src: Address,
    /// Serialized command payload
    pub data: Bytes,
}

impl Pdu {
    /// A normal PDU from `src` to `dst`
    pub fn new(src: Address, dst: Address, data: Bytes) -> Self {
        Self {
            pdu_type: 0,
            flags: 0,
            addr_format: 0,
            ttl: DEFAULT_TTL,
            dst,
            src,
            data,
        }
    }

    /// An advertisement telling the routing layer that `advertised` is
    /// reachable through the service at `service`.
    ///
    /// Advertisements double as keep-alives and are re-sent
    /// periodically.
    pub fn advertisement(service: Address, advertised: Address) -> Self {
        Self {
            pdu_type: PDU_TYPE_ADVERTISE,
            flags: 0,
            addr_format: 0,
            ttl: DEFAULT_TTL,
            dst: advertised,
            src: service,
            data: Bytes::new(),
        }
    }

    /// Whether the routing layer itself generated this PDU to report an
    /// undeliverable destination
    pub fn is_router_nak(&self) -> bool {
        self.pdu_type == PDU_TYPE_ROUTER_NAK
    }
}

/// Incremental frame codec for [`Pdu`]s.
///
/// Partial frames are kept buffered across reads. A bogus version byte
/// is unrecoverable — the stream offset is lost — so it surfaces as an
/// error, which tears the connection down.
#[derive(Debug, Default)]
pub struct PduCodec;

impl Decoder for PduCodec {
    type Item = Pdu;
    type Error = BrokerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Pdu>, BrokerError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let version = src[0];
        if version != PDU_VERSION {
            if version == 0x02 || version == 0x03 {
                warn!("peer is speaking a retired protocol version");
            }
            debug!(
                dump = %hex::encode(&src[..src.len().min(64)]),
                "bogus data"
            );
            return Err(BrokerError::Malformed(format!(
                "bogus version byte {version:#04x}"
            )));
        }

        let hdr_len = ((src[1] & 0x3f) as usize) * 4;
        if hdr_len < HEADER_LEN {
            return Err(BrokerError::Malformed(format!(
                "header too short: {hdr_len} octets"
            )));
        }
        if src.len() < hdr_len {
            return Ok(None);
        }

        let data_len = u16::from_be_bytes([src[10], src[11]]) as usize;
        let pdu_len = hdr_len + data_len;
        if src.len() < pdu_len {
            src.reserve(pdu_len - src.len());
            return Ok(None);
        }

        let header = src.split_to(hdr_len);
        let data = src.split_to(data_len).freeze();

        if header[6..10].iter().any(|&b| b != 0) {
            warn!("fragmented PDU; fragments not supported");
        }

        Ok(Some(Pdu {
            pdu_type: (header[2] & 0xe0) >> 5,
            flags: (header[2] & 0x18) >> 3,
            addr_format: header[2] & 0x07,
            ttl: header[3] & 0x3f,
            dst: Address::try_from(&header[12..44])?,
            src: Address::try_from(&header[44..76])?,
            data,
        }))
    }
}

impl Encoder<Pdu> for PduCodec {
    type Error = BrokerError;

    fn encode(&mut self, pdu: Pdu, dst: &mut BytesMut) -> Result<(), BrokerError> {
        if pdu.data.len() > u16::MAX as usize {
            return Err(BrokerError::Malformed(format!(
                "payload too large: {} bytes",
                pdu.data.len()
            )));
        }

        dst.reserve(HEADER_LEN + pdu.data.len());
        dst.put_u8(PDU_VERSION);
        dst.put_u8(HEADER_WORDS);
        dst.put_u8((pdu.pdu_type << 5) | (pdu.flags << 3) | pdu.addr_format);
        dst.put_u8(pdu.ttl & 0x3f);
        dst.put_bytes(0, 6);
        dst.put_u16(pdu.data.len() as u16);
        dst.put_slice(pdu.dst.as_bytes());
        dst.put_slice(pdu.src.as_bytes());
        dst.put_slice(&pdu.data);
        Ok(())
    }
}
