//! ElGamal over the fixed 2048-bit group.
//!
//! The plaintext block is 255 bytes: a 0xFF marker, the SHA-256 of the data
//! field, then 222 bytes of data (zero-filled past the caller's input). The
//! ciphertext is the two 256-byte group elements, optionally with a zero byte
//! before each half (the 514-byte garlic form; tunnel build records use the
//! unpadded 512-byte form).

use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::rngs::OsRng;

use crate::constants::{to_fixed_be, ELGAMAL_G, ELGAMAL_P};
use crate::hash::sha256;
use crate::{CryptoError, Result};

/// Usable data bytes per ElGamal block.
pub const ELGAMAL_DATA_LEN: usize = 222;
/// Unpadded ciphertext length (tunnel build records).
pub const ELGAMAL_CIPHERTEXT_LEN: usize = 512;
/// Zero-padded ciphertext length (garlic ElGamal block).
pub const ELGAMAL_CIPHERTEXT_PADDED_LEN: usize = 514;

/// A 256-byte public / 256-byte secret ElGamal keypair.
#[derive(Clone)]
pub struct ElGamalKeypair {
    public: [u8; 256],
    secret: [u8; 256],
}

impl ElGamalKeypair {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let x = rng.gen_biguint_below(&(&*ELGAMAL_P - BigUint::one()));
        let y = ELGAMAL_G.modpow(&x, &ELGAMAL_P);
        let mut public = [0u8; 256];
        let mut secret = [0u8; 256];
        public.copy_from_slice(&to_fixed_be(&y, 256));
        secret.copy_from_slice(&to_fixed_be(&x, 256));
        Self { public, secret }
    }

    pub fn from_parts(public: [u8; 256], secret: [u8; 256]) -> Self {
        Self { public, secret }
    }

    pub fn public_key(&self) -> &[u8; 256] {
        &self.public
    }

    pub fn secret_key(&self) -> &[u8; 256] {
        &self.secret
    }
}

/// Encrypt up to 222 bytes to `public_key`.
pub fn elgamal_encrypt(public_key: &[u8; 256], data: &[u8], zero_padding: bool) -> Result<Vec<u8>> {
    if data.len() > ELGAMAL_DATA_LEN {
        return Err(CryptoError::PlaintextTooLong(data.len()));
    }

    let y = BigUint::from_bytes_be(public_key);
    let mut rng = OsRng;
    let k = rng.gen_biguint_range(&BigUint::one(), &(&*ELGAMAL_P - BigUint::one()));
    let a = ELGAMAL_G.modpow(&k, &ELGAMAL_P);

    let mut block = [0u8; 255];
    block[0] = 0xff;
    block[33..33 + data.len()].copy_from_slice(data);
    let digest = sha256(&block[33..255]);
    block[1..33].copy_from_slice(&digest);

    let m = BigUint::from_bytes_be(&block);
    let b = (y.modpow(&k, &ELGAMAL_P) * m) % &*ELGAMAL_P;

    let mut out = Vec::with_capacity(if zero_padding {
        ELGAMAL_CIPHERTEXT_PADDED_LEN
    } else {
        ELGAMAL_CIPHERTEXT_LEN
    });
    if zero_padding {
        out.push(0);
    }
    out.extend_from_slice(&to_fixed_be(&a, 256));
    if zero_padding {
        out.push(0);
    }
    out.extend_from_slice(&to_fixed_be(&b, 256));
    Ok(out)
}

/// Decrypt an ElGamal block, returning the 222-byte data field.
pub fn elgamal_decrypt(
    secret_key: &[u8; 256],
    encrypted: &[u8],
    zero_padding: bool,
) -> Result<Vec<u8>> {
    let expected = if zero_padding {
        ELGAMAL_CIPHERTEXT_PADDED_LEN
    } else {
        ELGAMAL_CIPHERTEXT_LEN
    };
    if encrypted.len() < expected {
        return Err(CryptoError::CiphertextTooShort);
    }
    let (a_bytes, b_bytes) = if zero_padding {
        (&encrypted[1..257], &encrypted[258..514])
    } else {
        (&encrypted[0..256], &encrypted[256..512])
    };

    let x = BigUint::from_bytes_be(secret_key);
    let a = BigUint::from_bytes_be(a_bytes);
    let b = BigUint::from_bytes_be(b_bytes);

    // b * a^(p-1-x) = b * a^-x (mod p)
    let exp = &*ELGAMAL_P - BigUint::one() - x;
    let m = (b * a.modpow(&exp, &ELGAMAL_P)) % &*ELGAMAL_P;
    let block = to_fixed_be(&m, 255);

    let digest = sha256(&block[33..255]);
    if digest != block[1..33] {
        return Err(CryptoError::DecryptionFailed);
    }
    Ok(block[33..255].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elgamal_roundtrip_padded() {
        let keys = ElGamalKeypair::generate();
        let data = b"wrapped session key material";

        let encrypted = elgamal_encrypt(keys.public_key(), data, true).unwrap();
        assert_eq!(encrypted.len(), ELGAMAL_CIPHERTEXT_PADDED_LEN);

        let decrypted = elgamal_decrypt(keys.secret_key(), &encrypted, true).unwrap();
        assert_eq!(decrypted.len(), ELGAMAL_DATA_LEN);
        assert_eq!(&decrypted[..data.len()], data);
        assert!(decrypted[data.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_elgamal_roundtrip_unpadded() {
        let keys = ElGamalKeypair::generate();
        let data = [0xabu8; ELGAMAL_DATA_LEN];

        let encrypted = elgamal_encrypt(keys.public_key(), &data, false).unwrap();
        assert_eq!(encrypted.len(), ELGAMAL_CIPHERTEXT_LEN);

        let decrypted = elgamal_decrypt(keys.secret_key(), &encrypted, false).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_elgamal_wrong_key_fails() {
        let keys = ElGamalKeypair::generate();
        let other = ElGamalKeypair::generate();

        let encrypted = elgamal_encrypt(keys.public_key(), b"secret", true).unwrap();
        assert!(elgamal_decrypt(other.secret_key(), &encrypted, true).is_err());
    }

    #[test]
    fn test_elgamal_rejects_oversize() {
        let keys = ElGamalKeypair::generate();
        let data = [0u8; ELGAMAL_DATA_LEN + 1];
        assert!(elgamal_encrypt(keys.public_key(), &data, true).is_err());
    }

    #[test]
    fn test_elgamal_rejects_short_ciphertext() {
        let keys = ElGamalKeypair::generate();
        assert!(elgamal_decrypt(keys.secret_key(), &[0u8; 100], true).is_err());
    }
}
