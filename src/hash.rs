//! Content addresses: hex-encoded SHA-1 of a serialized static object
//! (spec §3 "StaticAddress"). Narrowed from the teacher's dual SHA-1/SHA-256
//! `ObjectHash` down to the single algorithm spec invariant 1 fixes.

use std::fmt;
use std::str::FromStr;

use sha1::{Digest, Sha1};
use thiserror::Error;

pub const DELETED: &str = "deleted";

#[derive(Debug, Error)]
#[error("invalid static address: {0}")]
pub struct ParseAddressError(String);

/// A 40-hex-char SHA-1 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StaticAddress([u8; 20]);

impl StaticAddress {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha1::digest(bytes);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        StaticAddress(out)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        StaticAddress(bytes)
    }
}

impl fmt::Display for StaticAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for StaticAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ParseAddressError(s.to_string()))?;
        if bytes.len() != 20 {
            return Err(ParseAddressError(s.to_string()));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(StaticAddress(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_matches_known_sha1() {
        let addr = StaticAddress::of(b"");
        assert_eq!(addr.to_string(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let addr = StaticAddress::of(b"hello");
        let parsed: StaticAddress = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn rejects_non_hex_or_wrong_length() {
        assert!("zz".parse::<StaticAddress>().is_err());
        assert!("abcd".parse::<StaticAddress>().is_err());
    }
}
