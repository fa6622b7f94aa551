use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BufMut;
use garlicroute_crypto::{BASE32_I2P, BASE64_I2P};

use crate::wire::Reader;
use crate::{CoreError, Result};

/// Tunnel identifier, unique per router. Zero is reserved.
pub type TunnelId = u32;

/// Milliseconds since the Unix epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seconds since the Unix epoch.
pub fn timestamp_s() -> u64 {
    timestamp_ms() / 1000
}

/// The SHA-256 of a serialized identity: the keyspace coordinate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct IdentHash(pub [u8; 32]);

impl IdentHash {
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        IdentHash(*bytes)
    }

    pub fn digest(data: &[u8]) -> Self {
        IdentHash(garlicroute_crypto::sha256(data))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance to `other`.
    pub fn xor(&self, other: &IdentHash) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    pub fn to_base64(&self) -> String {
        BASE64_I2P.encode(&self.0)
    }

    pub fn to_base32(&self) -> String {
        BASE32_I2P.encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = BASE64_I2P
            .decode(s.as_bytes())
            .map_err(|_| CoreError::Malformed("bad base64 hash"))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::Malformed("hash must be 32 bytes"))?;
        Ok(IdentHash(arr))
    }
}

impl fmt::Display for IdentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 8 base64 chars are plenty in logs
        let full = self.to_base64();
        write!(f, "{}", &full[..8.min(full.len())])
    }
}

impl fmt::Debug for IdentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentHash({})", self)
    }
}

/// Key/value options attached to RouterInfos and their addresses.
///
/// Keys are kept sorted so serialization is deterministic under the
/// signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mapping(pub BTreeMap<String, String>);

impl Mapping {
    pub fn new() -> Self {
        Mapping(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let mut body = Vec::new();
        for (key, value) in &self.0 {
            write_string(&mut body, key);
            body.put_u8(b'=');
            write_string(&mut body, value);
            body.put_u8(b';');
        }
        out.put_u16(body.len() as u16);
        out.extend_from_slice(&body);
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let size = reader.read_u16()? as usize;
        let body = reader.take(size)?;
        let mut inner = Reader::new(body);
        let mut map = BTreeMap::new();
        while inner.remaining() > 0 {
            let key = read_string(&mut inner)?;
            if inner.read_u8()? != b'=' {
                return Err(CoreError::Malformed("mapping missing '='"));
            }
            let value = read_string(&mut inner)?;
            if inner.read_u8()? != b';' {
                return Err(CoreError::Malformed("mapping missing ';'"));
            }
            map.insert(key, value);
        }
        Ok(Mapping(map))
    }
}

pub(crate) fn write_string(out: &mut Vec<u8>, s: &str) {
    debug_assert!(s.len() <= 255);
    out.put_u8(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
}

pub(crate) fn read_string(reader: &mut Reader<'_>) -> Result<String> {
    let len = reader.read_u8()? as usize;
    let bytes = reader.take(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::Malformed("non-utf8 string"))
}
