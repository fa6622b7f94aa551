//! Tunnel build records.
//!
//! A build message is `n` 528-byte slots, one per hop: a 16-byte ident-hash
//! prefix naming the hop plus the hop's ElGamal-encrypted request. The hop
//! overwrites its slot with a response record before forwarding.

use bytes::BufMut;
use rand::RngCore;

use garlicroute_core::wire::Reader;
use garlicroute_core::{IdentHash, TunnelId};
use garlicroute_crypto::{elgamal_decrypt, elgamal_encrypt, sha256};

use crate::{I2npError, Result};

pub const BUILD_RECORD_SIZE: usize = 528;
pub const STANDARD_BUILD_RECORDS: usize = 5;
pub const MAX_BUILD_RECORDS: usize = 8;
/// Response byte meaning the hop agreed to participate.
pub const BUILD_RESPONSE_ACCEPT: u8 = 0;

const CLEARTEXT_LEN: usize = 222;
const FLAG_GATEWAY: u8 = 0x80;
const FLAG_ENDPOINT: u8 = 0x40;
const RESPONSE_PADDING_LEN: usize = 495;

/// The request one hop can decrypt out of its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequestRecord {
    pub receive_tunnel: TunnelId,
    pub our_ident: IdentHash,
    pub next_tunnel: TunnelId,
    pub next_ident: IdentHash,
    pub layer_key: [u8; 32],
    pub iv_key: [u8; 32],
    pub reply_key: [u8; 32],
    pub reply_iv: [u8; 16],
    pub is_gateway: bool,
    pub is_endpoint: bool,
    /// Hours since the epoch at request time.
    pub request_time: u32,
    pub next_msg_id: u32,
}

impl BuildRequestRecord {
    pub fn encode_cleartext(&self) -> [u8; CLEARTEXT_LEN] {
        let mut out = Vec::with_capacity(CLEARTEXT_LEN);
        out.put_u32(self.receive_tunnel);
        out.extend_from_slice(self.our_ident.as_bytes());
        out.put_u32(self.next_tunnel);
        out.extend_from_slice(self.next_ident.as_bytes());
        out.extend_from_slice(&self.layer_key);
        out.extend_from_slice(&self.iv_key);
        out.extend_from_slice(&self.reply_key);
        out.extend_from_slice(&self.reply_iv);
        let mut flags = 0u8;
        if self.is_gateway {
            flags |= FLAG_GATEWAY;
        }
        if self.is_endpoint {
            flags |= FLAG_ENDPOINT;
        }
        out.put_u8(flags);
        out.put_u32(self.request_time);
        out.put_u32(self.next_msg_id);
        let mut padding = [0u8; CLEARTEXT_LEN - 193];
        rand::rngs::OsRng.fill_bytes(&mut padding);
        out.extend_from_slice(&padding);
        out.try_into().expect("fixed cleartext length")
    }

    pub fn decode_cleartext(buf: &[u8]) -> Result<Self> {
        if buf.len() != CLEARTEXT_LEN {
            return Err(I2npError::Malformed("build record cleartext length"));
        }
        let mut reader = Reader::new(buf);
        let receive_tunnel = reader.read_u32()?;
        let our_ident = IdentHash(reader.read_array()?);
        let next_tunnel = reader.read_u32()?;
        let next_ident = IdentHash(reader.read_array()?);
        let layer_key = reader.read_array()?;
        let iv_key = reader.read_array()?;
        let reply_key = reader.read_array()?;
        let reply_iv = reader.read_array()?;
        let flags = reader.read_u8()?;
        let request_time = reader.read_u32()?;
        let next_msg_id = reader.read_u32()?;
        Ok(Self {
            receive_tunnel,
            our_ident,
            next_tunnel,
            next_ident,
            layer_key,
            iv_key,
            reply_key,
            reply_iv,
            is_gateway: flags & FLAG_GATEWAY != 0,
            is_endpoint: flags & FLAG_ENDPOINT != 0,
            request_time,
            next_msg_id,
        })
    }

    /// Produce the on-wire 528-byte slot addressed to `peer`.
    pub fn encrypt_to(
        &self,
        peer: &IdentHash,
        encryption_key: &[u8; 256],
    ) -> Result<[u8; BUILD_RECORD_SIZE]> {
        let cleartext = self.encode_cleartext();
        let encrypted = elgamal_encrypt(encryption_key, &cleartext, false)?;
        let mut out = [0u8; BUILD_RECORD_SIZE];
        out[..16].copy_from_slice(&peer.as_bytes()[..16]);
        out[16..].copy_from_slice(&encrypted);
        Ok(out)
    }

    /// Decrypt a slot addressed to us.
    pub fn decrypt(record: &[u8; BUILD_RECORD_SIZE], secret_key: &[u8; 256]) -> Result<Self> {
        let cleartext = elgamal_decrypt(secret_key, &record[16..], false)?;
        Self::decode_cleartext(&cleartext)
    }
}

/// Whether a slot's 16-byte prefix addresses `ident`.
pub fn record_is_for(record: &[u8; BUILD_RECORD_SIZE], ident: &IdentHash) -> bool {
    record[..16] == ident.as_bytes()[..16]
}

/// A hop's answer, written over its own slot: SHA-256 of padding+ret, the
/// padding, then the accept/reject byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildResponseRecord {
    pub ret: u8,
}

impl BuildResponseRecord {
    pub fn encode(&self) -> [u8; BUILD_RECORD_SIZE] {
        let mut out = [0u8; BUILD_RECORD_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut out[32..32 + RESPONSE_PADDING_LEN]);
        out[BUILD_RECORD_SIZE - 1] = self.ret;
        let digest = sha256(&out[32..]);
        out[..32].copy_from_slice(&digest);
        out
    }

    pub fn decode(record: &[u8; BUILD_RECORD_SIZE]) -> Result<Self> {
        let digest = sha256(&record[32..]);
        if digest != record[..32] {
            return Err(I2npError::Malformed("build response hash mismatch"));
        }
        Ok(Self {
            ret: record[BUILD_RECORD_SIZE - 1],
        })
    }

    /// Read the response byte without checking the integrity hash; reply
    /// processing does its own decryption first and reads the byte straight
    /// out of the peeled slot.
    pub fn ret_of(record: &[u8; BUILD_RECORD_SIZE]) -> u8 {
        record[BUILD_RECORD_SIZE - 1]
    }
}

/// TunnelBuild / VariableTunnelBuild and their replies share this shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelBuildMessage {
    pub records: Vec<[u8; BUILD_RECORD_SIZE]>,
    /// Variable messages carry a leading record count; fixed ones are always
    /// eight records.
    pub variable: bool,
}

impl TunnelBuildMessage {
    pub fn new(records: Vec<[u8; BUILD_RECORD_SIZE]>) -> Self {
        Self {
            records,
            variable: true,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.records.len() * BUILD_RECORD_SIZE);
        if self.variable {
            out.put_u8(self.records.len() as u8);
        }
        for record in &self.records {
            out.extend_from_slice(record);
        }
        out
    }

    pub fn decode(buf: &[u8], variable: bool) -> Result<Self> {
        let (num, body) = if variable {
            if buf.is_empty() {
                return Err(I2npError::Malformed("empty build message"));
            }
            (buf[0] as usize, &buf[1..])
        } else {
            (MAX_BUILD_RECORDS, buf)
        };
        if num == 0 || num > MAX_BUILD_RECORDS {
            return Err(I2npError::Malformed("build record count out of range"));
        }
        if body.len() != num * BUILD_RECORD_SIZE {
            return Err(I2npError::Malformed("build message size mismatch"));
        }
        let mut records = Vec::with_capacity(num);
        for i in 0..num {
            let mut record = [0u8; BUILD_RECORD_SIZE];
            record.copy_from_slice(&body[i * BUILD_RECORD_SIZE..(i + 1) * BUILD_RECORD_SIZE]);
            records.push(record);
        }
        Ok(Self { records, variable })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garlicroute_crypto::ElGamalKeypair;

    fn request() -> BuildRequestRecord {
        BuildRequestRecord {
            receive_tunnel: 100,
            our_ident: IdentHash([1; 32]),
            next_tunnel: 200,
            next_ident: IdentHash([2; 32]),
            layer_key: [3; 32],
            iv_key: [4; 32],
            reply_key: [5; 32],
            reply_iv: [6; 16],
            is_gateway: true,
            is_endpoint: false,
            request_time: 480_000,
            next_msg_id: 9999,
        }
    }

    #[test]
    fn test_cleartext_roundtrip() {
        let record = request();
        let bytes = record.encode_cleartext();
        assert_eq!(bytes.len(), CLEARTEXT_LEN);
        let decoded = BuildRequestRecord::decode_cleartext(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_encrypted_record_roundtrip() {
        let keys = ElGamalKeypair::generate();
        let record = request();
        let peer = IdentHash([7; 32]);

        let slot = record.encrypt_to(&peer, keys.public_key()).unwrap();
        assert!(record_is_for(&slot, &peer));
        assert!(!record_is_for(&slot, &IdentHash([8; 32])));

        let decoded = BuildRequestRecord::decrypt(&slot, keys.secret_key()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_wrong_key_cannot_decrypt_record() {
        let keys = ElGamalKeypair::generate();
        let other = ElGamalKeypair::generate();
        let slot = request()
            .encrypt_to(&IdentHash([7; 32]), keys.public_key())
            .unwrap();
        assert!(BuildRequestRecord::decrypt(&slot, other.secret_key()).is_err());
    }

    #[test]
    fn test_response_record_roundtrip() {
        let response = BuildResponseRecord { ret: 0 };
        let bytes = response.encode();
        let decoded = BuildResponseRecord::decode(&bytes).unwrap();
        assert_eq!(decoded.ret, BUILD_RESPONSE_ACCEPT);
        assert_eq!(BuildResponseRecord::ret_of(&bytes), 0);

        let reject = BuildResponseRecord { ret: 30 }.encode();
        assert_eq!(BuildResponseRecord::decode(&reject).unwrap().ret, 30);
    }

    #[test]
    fn test_response_record_tamper_detected() {
        let mut bytes = BuildResponseRecord { ret: 0 }.encode();
        bytes[100] ^= 1;
        assert!(BuildResponseRecord::decode(&bytes).is_err());
    }

    #[test]
    fn test_build_message_roundtrip() {
        let records = vec![[1u8; BUILD_RECORD_SIZE], [2u8; BUILD_RECORD_SIZE]];
        let msg = TunnelBuildMessage::new(records.clone());
        let decoded = TunnelBuildMessage::decode(&msg.encode(), true).unwrap();
        assert_eq!(decoded.records, records);
    }

    #[test]
    fn test_build_message_rejects_bad_count() {
        assert!(TunnelBuildMessage::decode(&[0u8], true).is_err());
        let mut buf = vec![9u8];
        buf.extend_from_slice(&[0u8; 9 * BUILD_RECORD_SIZE]);
        assert!(TunnelBuildMessage::decode(&buf, true).is_err());
    }

    #[test]
    fn test_fixed_build_message_is_eight_records() {
        let records = vec![[0u8; BUILD_RECORD_SIZE]; 8];
        let msg = TunnelBuildMessage {
            records,
            variable: false,
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 8 * BUILD_RECORD_SIZE);
        let decoded = TunnelBuildMessage::decode(&bytes, false).unwrap();
        assert_eq!(decoded.records.len(), 8);
    }
}
