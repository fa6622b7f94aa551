//! DSA-SHA1 over the network's fixed 1024-bit parameters.
//!
//! Keys and signatures use the raw wire encodings: a 128-byte public y, a
//! 20-byte secret x, and a 40-byte r||s signature.

use num_bigint::{BigUint, RandBigInt};
use num_traits::Zero;
use rand::rngs::OsRng;
use sha1::{Digest, Sha1};

use crate::constants::{to_fixed_be, DSA_G, DSA_P, DSA_Q};
use crate::{CryptoError, Result};

fn sha1_digest(data: &[u8]) -> BigUint {
    let mut hasher = Sha1::new();
    hasher.update(data);
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Generate a keypair: 128-byte public key, 20-byte secret key.
pub fn dsa_generate_keypair() -> ([u8; 128], [u8; 20]) {
    let mut rng = OsRng;
    let x = rng.gen_biguint_range(&BigUint::from(1u32), &DSA_Q);
    let y = DSA_G.modpow(&x, &DSA_P);

    let mut public = [0u8; 128];
    let mut secret = [0u8; 20];
    public.copy_from_slice(&to_fixed_be(&y, 128));
    secret.copy_from_slice(&to_fixed_be(&x, 20));
    (public, secret)
}

/// Sign `data`, returning the 40-byte r||s signature.
pub fn dsa_sign(secret_key: &[u8], data: &[u8]) -> Result<[u8; 40]> {
    if secret_key.len() != 20 {
        return Err(CryptoError::InvalidSecretKey);
    }
    let x = BigUint::from_bytes_be(secret_key);
    let h = sha1_digest(data);
    let mut rng = OsRng;

    loop {
        let k = rng.gen_biguint_range(&BigUint::from(1u32), &DSA_Q);
        let r = DSA_G.modpow(&k, &DSA_P) % &*DSA_Q;
        if r.is_zero() {
            continue;
        }
        let k_inv = match k.modinv(&DSA_Q) {
            Some(inv) => inv,
            None => continue,
        };
        let s = (k_inv * (&h + &x * &r)) % &*DSA_Q;
        if s.is_zero() {
            continue;
        }

        let mut sig = [0u8; 40];
        sig[..20].copy_from_slice(&to_fixed_be(&r, 20));
        sig[20..].copy_from_slice(&to_fixed_be(&s, 20));
        return Ok(sig);
    }
}

/// Verify a 40-byte r||s signature against a 128-byte public key.
pub fn dsa_verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    if public_key.len() != 128 || signature.len() != 40 {
        return false;
    }
    let y = BigUint::from_bytes_be(public_key);
    let r = BigUint::from_bytes_be(&signature[..20]);
    let s = BigUint::from_bytes_be(&signature[20..]);
    if r.is_zero() || s.is_zero() || r >= *DSA_Q || s >= *DSA_Q {
        return false;
    }

    let w = match s.modinv(&DSA_Q) {
        Some(inv) => inv,
        None => return false,
    };
    let h = sha1_digest(data);
    let u1 = (&h * &w) % &*DSA_Q;
    let u2 = (&r * &w) % &*DSA_Q;
    let v = ((DSA_G.modpow(&u1, &DSA_P) * y.modpow(&u2, &DSA_P)) % &*DSA_P) % &*DSA_Q;
    v == r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dsa_sign_verify() {
        let (public, secret) = dsa_generate_keypair();
        let sig = dsa_sign(&secret, b"router info bytes").unwrap();
        assert!(dsa_verify(&public, b"router info bytes", &sig));
    }

    #[test]
    fn test_dsa_rejects_tampered_message() {
        let (public, secret) = dsa_generate_keypair();
        let sig = dsa_sign(&secret, b"original").unwrap();
        assert!(!dsa_verify(&public, b"tampered", &sig));
    }

    #[test]
    fn test_dsa_rejects_wrong_key() {
        let (_, secret) = dsa_generate_keypair();
        let (other_public, _) = dsa_generate_keypair();
        let sig = dsa_sign(&secret, b"message").unwrap();
        assert!(!dsa_verify(&other_public, b"message", &sig));
    }

    #[test]
    fn test_dsa_rejects_zero_signature() {
        let (public, _) = dsa_generate_keypair();
        assert!(!dsa_verify(&public, b"message", &[0u8; 40]));
    }
}
