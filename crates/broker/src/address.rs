//! 256-bit routing addresses

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::BrokerError;

/// Length of an address in bytes
pub const ADDR_LEN: usize = 32;

/// A 256-bit address identifying a client, service or log server on the
/// routing layer.
///
/// Human-readable names map onto addresses by SHA-256; the printable
/// form is unpadded url-safe base64.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDR_LEN]);

impl Address {
    /// Wrap raw address bytes
    pub fn from_bytes(bytes: [u8; ADDR_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the address for a human-readable name
    pub fn from_human_name(name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Parse the printable (base64) form back into an address
    pub fn from_printable(printable: &str) -> Result<Self, BrokerError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(printable)
            .map_err(|e| BrokerError::Malformed(format!("bad printable address: {e}")))?;
        Self::try_from(decoded.as_slice())
    }

    /// The raw address bytes
    pub fn as_bytes(&self) -> &[u8; ADDR_LEN] {
        &self.0
    }

    /// The printable form used in logs and database rows
    pub fn printable(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = BrokerError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; ADDR_LEN] = bytes
            .try_into()
            .map_err(|_| BrokerError::Malformed(format!("address must be {ADDR_LEN} bytes")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.printable())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.printable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_round_trip() {
        let addr = Address::from_human_name("edu.example.device.01");
        let parsed = Address::from_printable(&addr.printable()).unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn test_human_name_derivation_is_stable() {
        assert_eq!(
            Address::from_human_name("logcreationservice"),
            Address::from_human_name("logcreationservice"),
        );
        assert_ne!(
            Address::from_human_name("a"),
            Address::from_human_name("b"),
        );
    }

    #[test]
    fn test_rejects_short_input() {
        assert!(Address::try_from(&b"short"[..]).is_err());
        assert!(Address::from_printable("!!!").is_err());
    }
}
