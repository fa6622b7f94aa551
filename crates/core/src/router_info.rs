//! Published router records.

use bytes::BufMut;

use garlicroute_crypto::SigningSecretKey;

use crate::identity::RouterIdentity;
use crate::types::{read_string, timestamp_ms, write_string, Mapping};
use crate::wire::Reader;
use crate::{CoreError, Result};

/// RouterInfos older than this are stale and eligible for expiry.
pub const ROUTER_INFO_EXPIRATION_MS: u64 = 72 * 3600 * 1000;

/// Capability letters carried in the `caps` option.
pub mod caps {
    pub const FLOODFILL: char = 'f';
    pub const HIDDEN: char = 'H';
    pub const REACHABLE: char = 'R';
    pub const UNREACHABLE: char = 'U';
    pub const BANDWIDTH_LOW: char = 'L';
    pub const BANDWIDTH_STANDARD: char = 'O';
    pub const BANDWIDTH_HIGH: char = 'P';
    pub const BANDWIDTH_EXTRA: char = 'X';
}

/// One transport address: style tag plus an options map holding at least
/// host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterAddress {
    pub cost: u8,
    pub expiration: u64,
    pub style: String,
    pub options: Mapping,
}

impl RouterAddress {
    pub fn new(style: &str, host: &str, port: u16) -> Self {
        let mut options = Mapping::new();
        options.insert("host", host);
        options.insert("port", &port.to_string());
        Self {
            cost: 0,
            expiration: 0,
            style: style.to_string(),
            options,
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.options.get("host")
    }

    pub fn port(&self) -> Option<u16> {
        self.options.get("port").and_then(|p| p.parse().ok())
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.put_u8(self.cost);
        out.put_u64(self.expiration);
        write_string(out, &self.style);
        self.options.write(out);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let cost = reader.read_u8()?;
        let expiration = reader.read_u64()?;
        let style = read_string(reader)?;
        let options = Mapping::read(reader)?;
        Ok(Self {
            cost,
            expiration,
            style,
            options,
        })
    }
}

/// A RouterIdentity plus published timestamp, transport addresses, options,
/// and a signature over everything before it.
#[derive(Debug, Clone)]
pub struct RouterInfo {
    identity: RouterIdentity,
    published: u64,
    addresses: Vec<RouterAddress>,
    options: Mapping,
    signature: Option<Vec<u8>>,
}

impl RouterInfo {
    pub fn new(identity: RouterIdentity) -> Self {
        Self {
            identity,
            published: timestamp_ms(),
            addresses: Vec::new(),
            options: Mapping::new(),
            signature: None,
        }
    }

    pub fn identity(&self) -> &RouterIdentity {
        &self.identity
    }

    pub fn hash(&self) -> crate::IdentHash {
        self.identity.hash()
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn addresses(&self) -> &[RouterAddress] {
        &self.addresses
    }

    pub fn options(&self) -> &Mapping {
        &self.options
    }

    /// Replace the address list. Invalidates any existing signature.
    pub fn set_addresses(&mut self, addresses: Vec<RouterAddress>) {
        self.addresses = addresses;
        self.touch();
    }

    pub fn set_option(&mut self, key: &str, value: &str) {
        self.options.insert(key, value);
        self.touch();
    }

    fn touch(&mut self) {
        self.published = timestamp_ms();
        self.signature = None;
    }

    pub fn caps(&self) -> &str {
        self.options.get("caps").unwrap_or("")
    }

    pub fn set_caps(&mut self, caps: &str) {
        self.set_option("caps", caps);
    }

    pub fn is_floodfill(&self) -> bool {
        self.caps().contains(caps::FLOODFILL)
    }

    pub fn is_unreachable(&self) -> bool {
        self.caps().contains(caps::UNREACHABLE)
    }

    /// Published within the staleness window ending now.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.published + ROUTER_INFO_EXPIRATION_MS > now_ms
    }

    fn signable_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.identity.to_bytes());
        out.put_u64(self.published);
        out.put_u8(self.addresses.len() as u8);
        for address in &self.addresses {
            address.write(&mut out);
        }
        // peer list, always empty
        out.put_u8(0);
        self.options.write(&mut out);
        out
    }

    pub fn sign(&mut self, signing_key: &SigningSecretKey) -> Result<()> {
        let bytes = self.signable_bytes();
        self.signature = Some(signing_key.sign(&bytes)?);
        Ok(())
    }

    pub fn verify(&self) -> Result<()> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(CoreError::MissingSignature)?;
        self.identity
            .signing_key()
            .verify(&self.signable_bytes(), signature)
            .map_err(|_| CoreError::InvalidSignature)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(CoreError::MissingSignature)?;
        let mut out = self.signable_bytes();
        out.extend_from_slice(signature);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let identity = RouterIdentity::read(&mut reader)?;
        let published = reader.read_u64()?;
        let num_addresses = reader.read_u8()?;
        let mut addresses = Vec::with_capacity(num_addresses as usize);
        for _ in 0..num_addresses {
            addresses.push(RouterAddress::read(&mut reader)?);
        }
        let num_peers = reader.read_u8()?;
        reader.take(num_peers as usize * 32)?;
        let options = Mapping::read(&mut reader)?;
        let signature = reader
            .take(identity.signing_key().sig_type().signature_len())?
            .to_vec();
        if reader.remaining() != 0 {
            return Err(CoreError::Malformed("trailing bytes after router info"));
        }
        Ok(Self {
            identity,
            published,
            addresses,
            options,
            signature: Some(signature),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrivateKeys;

    fn signed_router_info(caps: &str) -> (PrivateKeys, RouterInfo) {
        let keys = PrivateKeys::generate().unwrap();
        let mut info = RouterInfo::new(keys.identity().clone());
        info.set_addresses(vec![
            RouterAddress::new("NTCP", "192.0.2.1", 9153),
            RouterAddress::new("SSU", "192.0.2.1", 9153),
        ]);
        info.set_caps(caps);
        info.sign(keys.signing()).unwrap();
        (keys, info)
    }

    #[test]
    fn test_router_info_roundtrip() {
        let (_, info) = signed_router_info("LR");
        let bytes = info.to_bytes().unwrap();
        let parsed = RouterInfo::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.to_bytes().unwrap(), bytes);
        assert_eq!(parsed.hash(), info.hash());
        assert_eq!(parsed.addresses().len(), 2);
        assert_eq!(parsed.addresses()[0].style, "NTCP");
        assert_eq!(parsed.addresses()[0].port(), Some(9153));
        assert_eq!(parsed.caps(), "LR");
        assert!(parsed.verify().is_ok());
    }

    #[test]
    fn test_router_info_tamper_detected() {
        let (_, info) = signed_router_info("LR");
        let mut bytes = info.to_bytes().unwrap();
        // flip a byte inside the published timestamp
        let offset = info.identity().to_bytes().len() + 3;
        bytes[offset] ^= 0xff;
        let parsed = RouterInfo::from_bytes(&bytes).unwrap();
        assert!(parsed.verify().is_err());
    }

    #[test]
    fn test_floodfill_cap() {
        let (_, info) = signed_router_info("fOR");
        assert!(info.is_floodfill());
        assert!(!info.is_unreachable());

        let (_, plain) = signed_router_info("LU");
        assert!(!plain.is_floodfill());
        assert!(plain.is_unreachable());
    }

    #[test]
    fn test_freshness_window() {
        let (_, info) = signed_router_info("L");
        let now = timestamp_ms();
        assert!(info.is_fresh(now));
        assert!(!info.is_fresh(now + ROUTER_INFO_EXPIRATION_MS + 1));
    }

    #[test]
    fn test_unsigned_router_info_has_no_bytes() {
        let keys = PrivateKeys::generate().unwrap();
        let info = RouterInfo::new(keys.identity().clone());
        assert!(info.to_bytes().is_err());
        assert!(info.verify().is_err());
    }
}
