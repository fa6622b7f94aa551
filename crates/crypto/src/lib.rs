//! GarlicRoute cryptographic primitives
//!
//! Everything the router core needs below the protocol layer: the 2048-bit
//! ElGamal scheme, AES-256 in CBC / ECB / tunnel-layer modes, the hash and
//! HMAC helpers, every signature family a peer may advertise, the I2P
//! base32/base64 alphabets, and gzip for RouterInfo transport.

mod aes;
mod base;
mod constants;
mod dh;
mod dsa;
mod elgamal;
mod gzip;
mod hash;
mod sign;

pub use aes::{ecb_decrypt_block, ecb_encrypt_block, LayerCipher, CbcAes};
pub use base::{BASE32_I2P, BASE64_I2P};
pub use dh::DhKeypair;
pub use dsa::{dsa_generate_keypair, dsa_sign, dsa_verify};
pub use elgamal::{
    elgamal_decrypt, elgamal_encrypt, ElGamalKeypair, ELGAMAL_CIPHERTEXT_LEN,
    ELGAMAL_CIPHERTEXT_PADDED_LEN, ELGAMAL_DATA_LEN,
};
pub use gzip::{gunzip, gzip};
pub use hash::{hmac_sha256, sha256, sha512, Sha256Digest};
pub use sign::{SigType, SigningKeypair, SigningPublicKey, SigningSecretKey};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid secret key")]
    InvalidSecretKey,

    #[error("Invalid signature encoding")]
    InvalidSignature,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Unknown signature type code {0}")]
    UnknownSigType(u16),

    #[error("Signing not supported for this key")]
    SigningUnsupported,

    #[error("Ciphertext too short")]
    CiphertextTooShort,

    #[error("Plaintext too long: {0} bytes")]
    PlaintextTooLong(usize),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Compression failed: {0}")]
    Compression(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
