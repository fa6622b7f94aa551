//! Signature type negotiation and dispatch.
//!
//! Every type a peer may advertise must verify; locally generated identities
//! sign with Ed25519. Keys and signatures use the raw wire encodings (no DER),
//! so ECDSA keys are untagged x||y points and ECDSA/DSA signatures are fixed
//! r||s concatenations.

use ed25519_dalek::{
    Signature as Ed25519Signature, SigningKey as Ed25519SigningKey,
    VerifyingKey as Ed25519VerifyingKey,
};
use p256::elliptic_curve::generic_array::GenericArray;
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint as RsaBigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use signature::{SignatureEncoding, Signer, Verifier};

use crate::dsa::{dsa_generate_keypair, dsa_sign, dsa_verify};
use crate::{CryptoError, Result};

const RSA_E: u32 = 65537;

/// Signature type codes as they appear in key certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigType {
    DsaSha1,
    EcdsaSha256P256,
    EcdsaSha384P384,
    EcdsaSha512P521,
    RsaSha2562048,
    RsaSha3843072,
    RsaSha5124096,
    EdDsaSha512Ed25519,
}

impl SigType {
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            0 => Ok(SigType::DsaSha1),
            1 => Ok(SigType::EcdsaSha256P256),
            2 => Ok(SigType::EcdsaSha384P384),
            3 => Ok(SigType::EcdsaSha512P521),
            4 => Ok(SigType::RsaSha2562048),
            5 => Ok(SigType::RsaSha3843072),
            6 => Ok(SigType::RsaSha5124096),
            7 => Ok(SigType::EdDsaSha512Ed25519),
            other => Err(CryptoError::UnknownSigType(other)),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            SigType::DsaSha1 => 0,
            SigType::EcdsaSha256P256 => 1,
            SigType::EcdsaSha384P384 => 2,
            SigType::EcdsaSha512P521 => 3,
            SigType::RsaSha2562048 => 4,
            SigType::RsaSha3843072 => 5,
            SigType::RsaSha5124096 => 6,
            SigType::EdDsaSha512Ed25519 => 7,
        }
    }

    pub fn public_key_len(&self) -> usize {
        match self {
            SigType::DsaSha1 => 128,
            SigType::EcdsaSha256P256 => 64,
            SigType::EcdsaSha384P384 => 96,
            SigType::EcdsaSha512P521 => 132,
            SigType::RsaSha2562048 => 256,
            SigType::RsaSha3843072 => 384,
            SigType::RsaSha5124096 => 512,
            SigType::EdDsaSha512Ed25519 => 32,
        }
    }

    pub fn signature_len(&self) -> usize {
        match self {
            SigType::DsaSha1 => 40,
            SigType::EcdsaSha256P256 => 64,
            SigType::EcdsaSha384P384 => 96,
            SigType::EcdsaSha512P521 => 132,
            SigType::RsaSha2562048 => 256,
            SigType::RsaSha3843072 => 384,
            SigType::RsaSha5124096 => 512,
            SigType::EdDsaSha512Ed25519 => 64,
        }
    }

    pub fn secret_key_len(&self) -> usize {
        match self {
            SigType::DsaSha1 => 20,
            SigType::EcdsaSha256P256 => 32,
            SigType::EcdsaSha384P384 => 48,
            SigType::EcdsaSha512P521 => 66,
            // modulus followed by private exponent
            SigType::RsaSha2562048 => 512,
            SigType::RsaSha3843072 => 768,
            SigType::RsaSha5124096 => 1024,
            SigType::EdDsaSha512Ed25519 => 32,
        }
    }
}

/// A raw signing public key tagged with its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningPublicKey {
    sig_type: SigType,
    data: Vec<u8>,
}

impl SigningPublicKey {
    pub fn new(sig_type: SigType, data: &[u8]) -> Result<Self> {
        if data.len() != sig_type.public_key_len() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Self {
            sig_type,
            data: data.to_vec(),
        })
    }

    pub fn sig_type(&self) -> SigType {
        self.sig_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        if signature.len() != self.sig_type.signature_len() {
            return Err(CryptoError::InvalidSignature);
        }
        match self.sig_type {
            SigType::DsaSha1 => {
                if dsa_verify(&self.data, message, signature) {
                    Ok(())
                } else {
                    Err(CryptoError::BadSignature)
                }
            }
            SigType::EcdsaSha256P256 => {
                let point = p256::EncodedPoint::from_untagged_bytes(GenericArray::from_slice(
                    &self.data,
                ));
                let key = p256::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                let sig = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| CryptoError::InvalidSignature)?;
                key.verify(message, &sig).map_err(|_| CryptoError::BadSignature)
            }
            SigType::EcdsaSha384P384 => {
                let point = p384::EncodedPoint::from_untagged_bytes(GenericArray::from_slice(
                    &self.data,
                ));
                let key = p384::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                let sig = p384::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| CryptoError::InvalidSignature)?;
                key.verify(message, &sig).map_err(|_| CryptoError::BadSignature)
            }
            SigType::EcdsaSha512P521 => {
                let point = p521::EncodedPoint::from_untagged_bytes(GenericArray::from_slice(
                    &self.data,
                ));
                let key = p521::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                let sig = p521::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| CryptoError::InvalidSignature)?;
                key.verify(message, &sig).map_err(|_| CryptoError::BadSignature)
            }
            SigType::RsaSha2562048 => {
                let key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(self.rsa_public_key()?);
                let sig = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| CryptoError::InvalidSignature)?;
                key.verify(message, &sig).map_err(|_| CryptoError::BadSignature)
            }
            SigType::RsaSha3843072 => {
                let key = rsa::pkcs1v15::VerifyingKey::<Sha384>::new(self.rsa_public_key()?);
                let sig = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| CryptoError::InvalidSignature)?;
                key.verify(message, &sig).map_err(|_| CryptoError::BadSignature)
            }
            SigType::RsaSha5124096 => {
                let key = rsa::pkcs1v15::VerifyingKey::<Sha512>::new(self.rsa_public_key()?);
                let sig = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| CryptoError::InvalidSignature)?;
                key.verify(message, &sig).map_err(|_| CryptoError::BadSignature)
            }
            SigType::EdDsaSha512Ed25519 => {
                let bytes: &[u8; 32] =
                    self.data.as_slice().try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
                let key = Ed25519VerifyingKey::from_bytes(bytes)
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                let sig_bytes: &[u8; 64] =
                    signature.try_into().map_err(|_| CryptoError::InvalidSignature)?;
                let sig = Ed25519Signature::from_bytes(sig_bytes);
                key.verify(message, &sig).map_err(|_| CryptoError::BadSignature)
            }
        }
    }

    fn rsa_public_key(&self) -> Result<RsaPublicKey> {
        RsaPublicKey::new(
            RsaBigUint::from_bytes_be(&self.data),
            RsaBigUint::from(RSA_E),
        )
        .map_err(|_| CryptoError::InvalidPublicKey)
    }
}

/// A raw signing secret key tagged with its type.
#[derive(Clone)]
pub struct SigningSecretKey {
    sig_type: SigType,
    data: Vec<u8>,
}

impl SigningSecretKey {
    pub fn new(sig_type: SigType, data: &[u8]) -> Result<Self> {
        if data.len() != sig_type.secret_key_len() {
            return Err(CryptoError::InvalidSecretKey);
        }
        Ok(Self {
            sig_type,
            data: data.to_vec(),
        })
    }

    pub fn sig_type(&self) -> SigType {
        self.sig_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self.sig_type {
            SigType::DsaSha1 => Ok(dsa_sign(&self.data, message)?.to_vec()),
            SigType::EcdsaSha256P256 => {
                let key = p256::ecdsa::SigningKey::from_slice(&self.data)
                    .map_err(|_| CryptoError::InvalidSecretKey)?;
                let sig: p256::ecdsa::Signature =
                    key.try_sign(message).map_err(|_| CryptoError::SigningUnsupported)?;
                Ok(sig.to_bytes().to_vec())
            }
            SigType::EcdsaSha384P384 => {
                let key = p384::ecdsa::SigningKey::from_slice(&self.data)
                    .map_err(|_| CryptoError::InvalidSecretKey)?;
                let sig: p384::ecdsa::Signature =
                    key.try_sign(message).map_err(|_| CryptoError::SigningUnsupported)?;
                Ok(sig.to_bytes().to_vec())
            }
            SigType::EcdsaSha512P521 => {
                let key = p521::ecdsa::SigningKey::from_slice(&self.data)
                    .map_err(|_| CryptoError::InvalidSecretKey)?;
                let sig: p521::ecdsa::Signature =
                    key.try_sign(message).map_err(|_| CryptoError::SigningUnsupported)?;
                Ok(sig.to_bytes().to_vec())
            }
            SigType::RsaSha2562048 => {
                let key = rsa::pkcs1v15::SigningKey::<Sha256>::new(self.rsa_private_key()?);
                let sig = key.try_sign(message).map_err(|_| CryptoError::SigningUnsupported)?;
                Ok(sig.to_vec())
            }
            SigType::RsaSha3843072 => {
                let key = rsa::pkcs1v15::SigningKey::<Sha384>::new(self.rsa_private_key()?);
                let sig = key.try_sign(message).map_err(|_| CryptoError::SigningUnsupported)?;
                Ok(sig.to_vec())
            }
            SigType::RsaSha5124096 => {
                let key = rsa::pkcs1v15::SigningKey::<Sha512>::new(self.rsa_private_key()?);
                let sig = key.try_sign(message).map_err(|_| CryptoError::SigningUnsupported)?;
                Ok(sig.to_vec())
            }
            SigType::EdDsaSha512Ed25519 => {
                let bytes: &[u8; 32] =
                    self.data.as_slice().try_into().map_err(|_| CryptoError::InvalidSecretKey)?;
                let key = Ed25519SigningKey::from_bytes(bytes);
                Ok(key.sign(message).to_bytes().to_vec())
            }
        }
    }

    fn rsa_private_key(&self) -> Result<RsaPrivateKey> {
        let half = self.data.len() / 2;
        let n = RsaBigUint::from_bytes_be(&self.data[..half]);
        let d = RsaBigUint::from_bytes_be(&self.data[half..]);
        RsaPrivateKey::from_components(n, RsaBigUint::from(RSA_E), d, vec![])
            .map_err(|_| CryptoError::InvalidSecretKey)
    }
}

/// Public and secret halves together.
#[derive(Clone)]
pub struct SigningKeypair {
    pub public: SigningPublicKey,
    pub secret: SigningSecretKey,
}

impl SigningKeypair {
    pub fn generate(sig_type: SigType) -> Result<Self> {
        match sig_type {
            SigType::DsaSha1 => {
                let (public, secret) = dsa_generate_keypair();
                Ok(Self {
                    public: SigningPublicKey::new(sig_type, &public)?,
                    secret: SigningSecretKey::new(sig_type, &secret)?,
                })
            }
            SigType::EcdsaSha256P256 => {
                let key = p256::ecdsa::SigningKey::random(&mut OsRng);
                let point = key.verifying_key().to_encoded_point(false);
                Ok(Self {
                    public: SigningPublicKey::new(sig_type, &point.as_bytes()[1..])?,
                    secret: SigningSecretKey::new(sig_type, &key.to_bytes())?,
                })
            }
            SigType::EcdsaSha384P384 => {
                let key = p384::ecdsa::SigningKey::random(&mut OsRng);
                let point = key.verifying_key().to_encoded_point(false);
                Ok(Self {
                    public: SigningPublicKey::new(sig_type, &point.as_bytes()[1..])?,
                    secret: SigningSecretKey::new(sig_type, &key.to_bytes())?,
                })
            }
            SigType::EcdsaSha512P521 => {
                let key = p521::ecdsa::SigningKey::random(&mut OsRng);
                let verifying_key = p521::ecdsa::VerifyingKey::from(&key);
                let point = verifying_key.to_encoded_point(false);
                Ok(Self {
                    public: SigningPublicKey::new(sig_type, &point.as_bytes()[1..])?,
                    secret: SigningSecretKey::new(sig_type, &key.to_bytes())?,
                })
            }
            SigType::RsaSha2562048 | SigType::RsaSha3843072 | SigType::RsaSha5124096 => {
                let bits = sig_type.public_key_len() * 8;
                let key = RsaPrivateKey::new(&mut OsRng, bits)
                    .map_err(|_| CryptoError::SigningUnsupported)?;
                let public = rsa_pad(&key.to_public_key().n().to_bytes_be(), sig_type.public_key_len());
                let mut secret = public.clone();
                secret.extend_from_slice(&rsa_pad(&key.d().to_bytes_be(), sig_type.public_key_len()));
                Ok(Self {
                    public: SigningPublicKey::new(sig_type, &public)?,
                    secret: SigningSecretKey::new(sig_type, &secret)?,
                })
            }
            SigType::EdDsaSha512Ed25519 => {
                let key = Ed25519SigningKey::generate(&mut OsRng);
                Ok(Self {
                    public: SigningPublicKey::new(sig_type, key.verifying_key().as_bytes())?,
                    secret: SigningSecretKey::new(sig_type, &key.to_bytes())?,
                })
            }
        }
    }
}

fn rsa_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    out[len - bytes.len()..].copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [SigType; 8] = [
        SigType::DsaSha1,
        SigType::EcdsaSha256P256,
        SigType::EcdsaSha384P384,
        SigType::EcdsaSha512P521,
        SigType::RsaSha2562048,
        SigType::RsaSha3843072,
        SigType::RsaSha5124096,
        SigType::EdDsaSha512Ed25519,
    ];

    #[test]
    fn test_sig_type_codes_roundtrip() {
        for sig_type in ALL_TYPES {
            assert_eq!(SigType::from_code(sig_type.code()).unwrap(), sig_type);
        }
        assert!(SigType::from_code(200).is_err());
    }

    #[test]
    fn test_ed25519_sign_verify() {
        let keys = SigningKeypair::generate(SigType::EdDsaSha512Ed25519).unwrap();
        let sig = keys.secret.sign(b"lease set bytes").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(keys.public.verify(b"lease set bytes", &sig).is_ok());
        assert!(keys.public.verify(b"other bytes", &sig).is_err());
    }

    #[test]
    fn test_ecdsa_p256_sign_verify() {
        let keys = SigningKeypair::generate(SigType::EcdsaSha256P256).unwrap();
        let sig = keys.secret.sign(b"payload").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(keys.public.verify(b"payload", &sig).is_ok());
        assert!(keys.public.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn test_dsa_keypair_sign_verify() {
        let keys = SigningKeypair::generate(SigType::DsaSha1).unwrap();
        let sig = keys.secret.sign(b"payload").unwrap();
        assert_eq!(sig.len(), 40);
        assert!(keys.public.verify(b"payload", &sig).is_ok());
    }

    #[test]
    fn test_wrong_length_key_rejected() {
        assert!(SigningPublicKey::new(SigType::EdDsaSha512Ed25519, &[0u8; 31]).is_err());
        assert!(SigningPublicKey::new(SigType::DsaSha1, &[0u8; 127]).is_err());
    }

    #[test]
    fn test_wrong_length_signature_rejected() {
        let keys = SigningKeypair::generate(SigType::EdDsaSha512Ed25519).unwrap();
        assert!(keys.public.verify(b"msg", &[0u8; 63]).is_err());
    }
}
