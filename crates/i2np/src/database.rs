//! DatabaseStore / DatabaseLookup / DatabaseSearchReply payloads.

use bytes::BufMut;

use garlicroute_core::wire::Reader;
use garlicroute_core::{IdentHash, TunnelId};
use garlicroute_crypto::{gunzip, gzip};

use crate::{I2npError, Result};

/// Inflated RouterInfos are capped here; anything bigger is hostile.
const MAX_ROUTER_INFO_SIZE: usize = 16 * 1024;

/// What a DatabaseStore carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredData {
    /// Serialized RouterInfo (gzipped on the wire).
    RouterInfo(Vec<u8>),
    /// Serialized LeaseSet (stored as-is).
    LeaseSet(Vec<u8>),
}

impl StoredData {
    pub fn type_code(&self) -> u8 {
        match self {
            StoredData::RouterInfo(_) => 0,
            StoredData::LeaseSet(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStore {
    pub key: IdentHash,
    pub data: StoredData,
    /// Nonzero requests a DeliveryStatus referencing this token.
    pub reply_token: u32,
    /// When acking via a tunnel: the reply gateway and tunnel id. A zero
    /// tunnel id means ack directly to the gateway router.
    pub reply_tunnel: TunnelId,
    pub reply_gateway: IdentHash,
}

impl DatabaseStore {
    pub fn new(key: IdentHash, data: StoredData) -> Self {
        Self {
            key,
            data,
            reply_token: 0,
            reply_tunnel: 0,
            reply_gateway: IdentHash::default(),
        }
    }

    pub fn with_reply(
        mut self,
        reply_token: u32,
        reply_tunnel: TunnelId,
        reply_gateway: IdentHash,
    ) -> Self {
        self.reply_token = reply_token;
        self.reply_tunnel = reply_tunnel;
        self.reply_gateway = reply_gateway;
        self
    }

    /// Strip the reply request, as done before flooding onward.
    pub fn without_reply(mut self) -> Self {
        self.reply_token = 0;
        self.reply_tunnel = 0;
        self.reply_gateway = IdentHash::default();
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(self.key.as_bytes());
        out.put_u8(self.data.type_code());
        out.put_u32(self.reply_token);
        if self.reply_token != 0 {
            out.put_u32(self.reply_tunnel);
            out.extend_from_slice(self.reply_gateway.as_bytes());
        }
        let body = match &self.data {
            StoredData::RouterInfo(bytes) => gzip(bytes)?,
            StoredData::LeaseSet(bytes) => bytes.clone(),
        };
        out.put_u16(body.len() as u16);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let key = IdentHash(reader.read_array()?);
        let type_code = reader.read_u8()?;
        let reply_token = reader.read_u32()?;
        let (reply_tunnel, reply_gateway) = if reply_token != 0 {
            (reader.read_u32()?, IdentHash(reader.read_array()?))
        } else {
            (0, IdentHash::default())
        };
        let len = reader.read_u16()? as usize;
        let body = reader.take(len)?;
        let data = match type_code {
            0 => StoredData::RouterInfo(gunzip(body, MAX_ROUTER_INFO_SIZE)?),
            1 => StoredData::LeaseSet(body.to_vec()),
            _ => return Err(I2npError::Malformed("unknown store type")),
        };
        Ok(Self {
            key,
            data,
            reply_token,
            reply_tunnel,
            reply_gateway,
        })
    }
}

/// Lookup flavor, encoded in the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Any,
    LeaseSet,
    RouterInfo,
    Exploration,
}

impl LookupKind {
    fn bits(&self) -> u8 {
        match self {
            LookupKind::Any => 0,
            LookupKind::LeaseSet => 1,
            LookupKind::RouterInfo => 2,
            LookupKind::Exploration => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => LookupKind::LeaseSet,
            2 => LookupKind::RouterInfo,
            3 => LookupKind::Exploration,
            _ => LookupKind::Any,
        }
    }
}

const FLAG_REPLY_VIA_TUNNEL: u8 = 0x01;
const FLAG_ENCRYPTED_REPLY: u8 = 0x02;
const KIND_SHIFT: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseLookup {
    pub key: IdentHash,
    /// Router (or reply gateway) the answer goes back to.
    pub from: IdentHash,
    pub kind: LookupKind,
    /// Nonzero requests the reply through this tunnel at `from`.
    pub reply_tunnel: TunnelId,
    pub excluded: Vec<IdentHash>,
    /// Present when the reply should be garlic-encrypted to us.
    pub reply_key: Option<([u8; 32], [u8; 32])>,
}

impl DatabaseLookup {
    pub fn new(key: IdentHash, from: IdentHash, kind: LookupKind) -> Self {
        Self {
            key,
            from,
            kind,
            reply_tunnel: 0,
            excluded: Vec::new(),
            reply_key: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.key.as_bytes());
        out.extend_from_slice(self.from.as_bytes());
        let mut flags = self.kind.bits() << KIND_SHIFT;
        if self.reply_tunnel != 0 {
            flags |= FLAG_REPLY_VIA_TUNNEL;
        }
        if self.reply_key.is_some() {
            flags |= FLAG_ENCRYPTED_REPLY;
        }
        out.put_u8(flags);
        if self.reply_tunnel != 0 {
            out.put_u32(self.reply_tunnel);
        }
        out.put_u16(self.excluded.len() as u16);
        for hash in &self.excluded {
            out.extend_from_slice(hash.as_bytes());
        }
        if let Some((session_key, tag)) = &self.reply_key {
            out.extend_from_slice(session_key);
            out.put_u8(1);
            out.extend_from_slice(tag);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let key = IdentHash(reader.read_array()?);
        let from = IdentHash(reader.read_array()?);
        let flags = reader.read_u8()?;
        let kind = LookupKind::from_bits(flags >> KIND_SHIFT);
        let reply_tunnel = if flags & FLAG_REPLY_VIA_TUNNEL != 0 {
            reader.read_u32()?
        } else {
            0
        };
        let num_excluded = reader.read_u16()? as usize;
        let mut excluded = Vec::with_capacity(num_excluded.min(64));
        for _ in 0..num_excluded {
            excluded.push(IdentHash(reader.read_array()?));
        }
        let reply_key = if flags & FLAG_ENCRYPTED_REPLY != 0 {
            let session_key: [u8; 32] = reader.read_array()?;
            let tag_count = reader.read_u8()?;
            if tag_count == 0 {
                return Err(I2npError::Malformed("encrypted lookup without tags"));
            }
            let tag: [u8; 32] = reader.read_array()?;
            // extra tags are legal on the wire; only the first is used
            reader.take((tag_count as usize - 1) * 32)?;
            Some((session_key, tag))
        } else {
            None
        };
        Ok(Self {
            key,
            from,
            kind,
            reply_tunnel,
            excluded,
            reply_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSearchReply {
    pub key: IdentHash,
    pub peers: Vec<IdentHash>,
    pub from: IdentHash,
}

impl DatabaseSearchReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.key.as_bytes());
        out.put_u8(self.peers.len() as u8);
        for peer in &self.peers {
            out.extend_from_slice(peer.as_bytes());
        }
        out.extend_from_slice(self.from.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let key = IdentHash(reader.read_array()?);
        let num = reader.read_u8()? as usize;
        let mut peers = Vec::with_capacity(num);
        for _ in 0..num {
            peers.push(IdentHash(reader.read_array()?));
        }
        let from = IdentHash(reader.read_array()?);
        Ok(Self { key, peers, from })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> IdentHash {
        IdentHash([n; 32])
    }

    #[test]
    fn test_store_roundtrip_router_info() {
        let store = DatabaseStore::new(hash(1), StoredData::RouterInfo(vec![7u8; 600]));
        let decoded = DatabaseStore::decode(&store.encode().unwrap()).unwrap();
        assert_eq!(decoded, store);
    }

    #[test]
    fn test_store_roundtrip_lease_set_with_reply() {
        let store = DatabaseStore::new(hash(2), StoredData::LeaseSet(vec![3u8; 200]))
            .with_reply(42, 7, hash(9));
        let decoded = DatabaseStore::decode(&store.encode().unwrap()).unwrap();
        assert_eq!(decoded.reply_token, 42);
        assert_eq!(decoded.reply_tunnel, 7);
        assert_eq!(decoded.reply_gateway, hash(9));
        assert_eq!(decoded, store);
    }

    #[test]
    fn test_store_without_reply_zeroes_token() {
        let store = DatabaseStore::new(hash(2), StoredData::LeaseSet(vec![1]))
            .with_reply(42, 7, hash(9))
            .without_reply();
        let bytes = store.encode().unwrap();
        let decoded = DatabaseStore::decode(&bytes).unwrap();
        assert_eq!(decoded.reply_token, 0);
        assert_eq!(decoded.reply_gateway, IdentHash::default());
    }

    #[test]
    fn test_lookup_roundtrip_plain() {
        let lookup = DatabaseLookup::new(hash(1), hash(2), LookupKind::RouterInfo);
        let decoded = DatabaseLookup::decode(&lookup.encode()).unwrap();
        assert_eq!(decoded, lookup);
    }

    #[test]
    fn test_lookup_roundtrip_full() {
        let mut lookup = DatabaseLookup::new(hash(1), hash(2), LookupKind::LeaseSet);
        lookup.reply_tunnel = 99;
        lookup.excluded = vec![hash(3), hash(4)];
        lookup.reply_key = Some(([5u8; 32], [6u8; 32]));
        let decoded = DatabaseLookup::decode(&lookup.encode()).unwrap();
        assert_eq!(decoded, lookup);
    }

    #[test]
    fn test_lookup_exploration_kind() {
        let lookup = DatabaseLookup::new(hash(1), hash(2), LookupKind::Exploration);
        let decoded = DatabaseLookup::decode(&lookup.encode()).unwrap();
        assert_eq!(decoded.kind, LookupKind::Exploration);
    }

    #[test]
    fn test_search_reply_roundtrip() {
        let reply = DatabaseSearchReply {
            key: hash(1),
            peers: vec![hash(2), hash(3), hash(4)],
            from: hash(5),
        };
        let decoded = DatabaseSearchReply::decode(&reply.encode()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_truncated_lookup_rejected() {
        let lookup = DatabaseLookup::new(hash(1), hash(2), LookupKind::Any);
        let bytes = lookup.encode();
        assert!(DatabaseLookup::decode(&bytes[..40]).is_err());
    }
}
