//! Router and destination identities.
//!
//! An identity is 384 fixed bytes (256-byte ElGamal encryption key plus a
//! 128-byte signing-key field) followed by a certificate. Signing keys
//! shorter than the field are right-justified behind random padding; longer
//! keys spill their tail into a key certificate. Destinations share this
//! exact shape.

use bytes::BufMut;
use rand::RngCore;

use garlicroute_crypto::{
    ElGamalKeypair, SigType, SigningKeypair, SigningPublicKey, SigningSecretKey,
};

use crate::types::IdentHash;
use crate::wire::Reader;
use crate::{CoreError, Result};

const SIGNING_KEY_FIELD_LEN: usize = 128;

const CERT_NULL: u8 = 0;
const CERT_KEY: u8 = 5;

/// Payload of a type-5 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCertificate {
    pub sig_type: SigType,
    pub enc_type: u16,
    pub excess_sig_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Certificate {
    Null,
    Key(KeyCertificate),
    /// Legacy certificate kinds we carry through unmodified.
    Other { code: u8, payload: Vec<u8> },
}

impl Certificate {
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Certificate::Null => {
                out.put_u8(CERT_NULL);
                out.put_u16(0);
            }
            Certificate::Key(kc) => {
                out.put_u8(CERT_KEY);
                out.put_u16(4 + kc.excess_sig_data.len() as u16);
                out.put_u16(kc.sig_type.code());
                out.put_u16(kc.enc_type);
                out.extend_from_slice(&kc.excess_sig_data);
            }
            Certificate::Other { code, payload } => {
                out.put_u8(*code);
                out.put_u16(payload.len() as u16);
                out.extend_from_slice(payload);
            }
        }
    }
}

/// A public-key bundle: encryption key, signing key, certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterIdentity {
    encryption_key: [u8; 256],
    padding: Vec<u8>,
    signing_key: SigningPublicKey,
    certificate: Certificate,
    serialized: Vec<u8>,
    hash: IdentHash,
}

impl RouterIdentity {
    pub fn new(encryption_key: [u8; 256], signing_key: SigningPublicKey) -> Self {
        let sig_type = signing_key.sig_type();
        let (padding, certificate) = if sig_type == SigType::DsaSha1 {
            (Vec::new(), Certificate::Null)
        } else {
            let key_len = sig_type.public_key_len().min(SIGNING_KEY_FIELD_LEN);
            let mut padding = vec![0u8; SIGNING_KEY_FIELD_LEN - key_len];
            rand::rngs::OsRng.fill_bytes(&mut padding);
            let excess = if sig_type.public_key_len() > SIGNING_KEY_FIELD_LEN {
                signing_key.as_bytes()[SIGNING_KEY_FIELD_LEN..].to_vec()
            } else {
                Vec::new()
            };
            (
                padding,
                Certificate::Key(KeyCertificate {
                    sig_type,
                    enc_type: 0,
                    excess_sig_data: excess,
                }),
            )
        };
        Self::assemble(encryption_key, padding, signing_key, certificate)
    }

    fn assemble(
        encryption_key: [u8; 256],
        padding: Vec<u8>,
        signing_key: SigningPublicKey,
        certificate: Certificate,
    ) -> Self {
        let mut serialized = Vec::with_capacity(391);
        serialized.extend_from_slice(&encryption_key);
        serialized.extend_from_slice(&padding);
        let key_bytes = signing_key.as_bytes();
        serialized.extend_from_slice(&key_bytes[..key_bytes.len().min(SIGNING_KEY_FIELD_LEN)]);
        certificate.write(&mut serialized);
        let hash = IdentHash::digest(&serialized);
        Self {
            encryption_key,
            padding,
            signing_key,
            certificate,
            serialized,
            hash,
        }
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let encryption_key: [u8; 256] = reader.read_array()?;
        let field: [u8; SIGNING_KEY_FIELD_LEN] = reader.read_array()?;
        let cert_code = reader.read_u8()?;
        let cert_len = reader.read_u16()? as usize;
        let cert_payload = reader.take(cert_len)?;

        let (padding, signing_key, certificate) = match cert_code {
            CERT_NULL => (
                Vec::new(),
                SigningPublicKey::new(SigType::DsaSha1, &field)?,
                Certificate::Null,
            ),
            CERT_KEY => {
                if cert_payload.len() < 4 {
                    return Err(CoreError::Malformed("short key certificate"));
                }
                let sig_code = u16::from_be_bytes([cert_payload[0], cert_payload[1]]);
                let enc_type = u16::from_be_bytes([cert_payload[2], cert_payload[3]]);
                let excess = &cert_payload[4..];
                let sig_type = SigType::from_code(sig_code)?;
                let key_len = sig_type.public_key_len();
                let (padding, key_bytes) = if key_len <= SIGNING_KEY_FIELD_LEN {
                    (
                        field[..SIGNING_KEY_FIELD_LEN - key_len].to_vec(),
                        field[SIGNING_KEY_FIELD_LEN - key_len..].to_vec(),
                    )
                } else {
                    if excess.len() != key_len - SIGNING_KEY_FIELD_LEN {
                        return Err(CoreError::Malformed("key certificate size mismatch"));
                    }
                    let mut key_bytes = field.to_vec();
                    key_bytes.extend_from_slice(excess);
                    (Vec::new(), key_bytes)
                };
                (
                    padding,
                    SigningPublicKey::new(sig_type, &key_bytes)?,
                    Certificate::Key(KeyCertificate {
                        sig_type,
                        enc_type,
                        excess_sig_data: excess.to_vec(),
                    }),
                )
            }
            // legacy certificates imply a DSA key in the full field
            code => (
                Vec::new(),
                SigningPublicKey::new(SigType::DsaSha1, &field)?,
                Certificate::Other {
                    code,
                    payload: cert_payload.to_vec(),
                },
            ),
        };
        Ok(Self::assemble(
            encryption_key,
            padding,
            signing_key,
            certificate,
        ))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let identity = Self::read(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(CoreError::Malformed("trailing bytes after identity"));
        }
        Ok(identity)
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.serialized
    }

    pub fn hash(&self) -> IdentHash {
        self.hash
    }

    pub fn encryption_key(&self) -> &[u8; 256] {
        &self.encryption_key
    }

    pub fn signing_key(&self) -> &SigningPublicKey {
        &self.signing_key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

/// The local router's (or a local destination's) full key material.
#[derive(Clone)]
pub struct PrivateKeys {
    identity: RouterIdentity,
    encryption: ElGamalKeypair,
    signing: SigningSecretKey,
}

impl PrivateKeys {
    /// Generate a fresh Ed25519-signed identity.
    pub fn generate() -> Result<Self> {
        let encryption = ElGamalKeypair::generate();
        let signing = SigningKeypair::generate(SigType::EdDsaSha512Ed25519)?;
        let identity = RouterIdentity::new(*encryption.public_key(), signing.public);
        Ok(Self {
            identity,
            encryption,
            signing: signing.secret,
        })
    }

    pub fn identity(&self) -> &RouterIdentity {
        &self.identity
    }

    pub fn encryption(&self) -> &ElGamalKeypair {
        &self.encryption
    }

    pub fn signing(&self) -> &SigningSecretKey {
        &self.signing
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing.sign(message)?)
    }

    /// `identity || elgamal secret || signing secret`, the `router.keys`
    /// layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.identity.to_bytes());
        out.extend_from_slice(self.encryption.secret_key());
        out.extend_from_slice(self.signing.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let identity = RouterIdentity::read(&mut reader)?;
        let secret: [u8; 256] = reader.read_array()?;
        let sig_type = identity.signing_key().sig_type();
        let signing_bytes = reader.take(sig_type.secret_key_len())?;
        if reader.remaining() != 0 {
            return Err(CoreError::Malformed("trailing bytes after private keys"));
        }
        let encryption = ElGamalKeypair::from_parts(*identity.encryption_key(), secret);
        Ok(Self {
            identity,
            encryption,
            signing: SigningSecretKey::new(sig_type, signing_bytes)?,
        })
    }

    pub fn write_file(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn read_file(path: &std::path::Path) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip_ed25519() {
        let keys = PrivateKeys::generate().unwrap();
        let bytes = keys.identity().to_bytes().to_vec();
        let parsed = RouterIdentity::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.to_bytes(), &bytes[..]);
        assert_eq!(parsed.hash(), keys.identity().hash());
        assert_eq!(
            parsed.signing_key().sig_type(),
            SigType::EdDsaSha512Ed25519
        );
    }

    #[test]
    fn test_identity_hash_is_sha256_of_bytes() {
        let keys = PrivateKeys::generate().unwrap();
        let identity = keys.identity();
        assert_eq!(
            identity.hash(),
            IdentHash::digest(identity.to_bytes())
        );
    }

    #[test]
    fn test_identity_roundtrip_dsa() {
        let encryption = ElGamalKeypair::generate();
        let signing = SigningKeypair::generate(SigType::DsaSha1).unwrap();
        let identity = RouterIdentity::new(*encryption.public_key(), signing.public);
        assert_eq!(identity.certificate(), &Certificate::Null);
        // null-cert identity is exactly 387 bytes
        assert_eq!(identity.to_bytes().len(), 387);

        let parsed = RouterIdentity::from_bytes(identity.to_bytes()).unwrap();
        assert_eq!(parsed, identity);
    }

    #[test]
    fn test_identity_roundtrip_ecdsa() {
        let encryption = ElGamalKeypair::generate();
        let signing = SigningKeypair::generate(SigType::EcdsaSha256P256).unwrap();
        let identity = RouterIdentity::new(*encryption.public_key(), signing.public.clone());
        let parsed = RouterIdentity::from_bytes(identity.to_bytes()).unwrap();
        assert_eq!(parsed.signing_key(), &signing.public);
    }

    #[test]
    fn test_identity_rejects_truncated() {
        let keys = PrivateKeys::generate().unwrap();
        let bytes = keys.identity().to_bytes();
        assert!(RouterIdentity::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_private_keys_roundtrip() {
        let keys = PrivateKeys::generate().unwrap();
        let bytes = keys.to_bytes();
        let parsed = PrivateKeys::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.identity(), keys.identity());

        // restored bundle still signs verifiably
        let sig = parsed.sign(b"message").unwrap();
        assert!(parsed
            .identity()
            .signing_key()
            .verify(b"message", &sig)
            .is_ok());
    }

    #[test]
    fn test_private_keys_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.keys");
        let keys = PrivateKeys::generate().unwrap();
        keys.write_file(&path).unwrap();
        let loaded = PrivateKeys::read_file(&path).unwrap();
        assert_eq!(loaded.identity().hash(), keys.identity().hash());
    }
}
