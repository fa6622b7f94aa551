//! Destination address records.
//!
//! A LeaseSet names the inbound tunnel gateways through which a destination
//! can currently be reached. It is stored in the network database keyed by
//! the destination's ident hash and signed by the destination.

use bytes::BufMut;

use garlicroute_crypto::SigningSecretKey;

use crate::identity::RouterIdentity;
use crate::types::{IdentHash, TunnelId};
use crate::wire::Reader;
use crate::{CoreError, Result};

pub const MAX_LEASES: usize = 16;

/// The revocation-key field is carried but unused.
const REVOCATION_KEY_LEN: usize = 128;

/// One inbound entry point: a gateway router, the tunnel ID registered at
/// it, and the tunnel's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub tunnel_gateway: IdentHash,
    pub tunnel_id: TunnelId,
    pub end_date: u64,
}

impl Lease {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.tunnel_gateway.as_bytes());
        out.put_u32(self.tunnel_id);
        out.put_u64(self.end_date);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            tunnel_gateway: IdentHash(reader.read_array()?),
            tunnel_id: reader.read_u32()?,
            end_date: reader.read_u64()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LeaseSet {
    destination: RouterIdentity,
    encryption_key: [u8; 256],
    leases: Vec<Lease>,
    signature: Option<Vec<u8>>,
}

impl LeaseSet {
    /// Build an unsigned LeaseSet. Leases are sorted by
    /// `(tunnel_id, gateway)` and deduplicated; at most [`MAX_LEASES`] are
    /// kept.
    pub fn new(
        destination: RouterIdentity,
        encryption_key: [u8; 256],
        mut leases: Vec<Lease>,
    ) -> Self {
        leases.sort_by_key(|l| (l.tunnel_id, l.tunnel_gateway));
        leases.dedup_by_key(|l| (l.tunnel_id, l.tunnel_gateway));
        leases.truncate(MAX_LEASES);
        Self {
            destination,
            encryption_key,
            leases,
            signature: None,
        }
    }

    pub fn destination(&self) -> &RouterIdentity {
        &self.destination
    }

    pub fn hash(&self) -> IdentHash {
        self.destination.hash()
    }

    pub fn encryption_key(&self) -> &[u8; 256] {
        &self.encryption_key
    }

    pub fn leases(&self) -> &[Lease] {
        &self.leases
    }

    /// At least one lease still has a future end date.
    pub fn is_ready(&self, now_ms: u64) -> bool {
        self.leases.iter().any(|l| l.end_date > now_ms)
    }

    /// The latest expiry across all leases.
    pub fn expires(&self) -> u64 {
        self.leases.iter().map(|l| l.end_date).max().unwrap_or(0)
    }

    fn signable_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.destination.to_bytes());
        out.extend_from_slice(&self.encryption_key);
        out.extend_from_slice(&[0u8; REVOCATION_KEY_LEN]);
        out.put_u8(self.leases.len() as u8);
        for lease in &self.leases {
            lease.write(&mut out);
        }
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
        self.destination
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
        let destination = RouterIdentity::read(&mut reader)?;
        let encryption_key: [u8; 256] = reader.read_array()?;
        reader.take(REVOCATION_KEY_LEN)?;
        let num_leases = reader.read_u8()? as usize;
        if num_leases > MAX_LEASES {
            return Err(CoreError::Malformed("too many leases"));
        }
        let mut leases = Vec::with_capacity(num_leases);
        for _ in 0..num_leases {
            leases.push(Lease::read(&mut reader)?);
        }
        let signature = reader
            .take(destination.signing_key().sig_type().signature_len())?
            .to_vec();
        if reader.remaining() != 0 {
            return Err(CoreError::Malformed("trailing bytes after lease set"));
        }
        Ok(Self {
            destination,
            encryption_key,
            leases,
            signature: Some(signature),
        })
    }
}
