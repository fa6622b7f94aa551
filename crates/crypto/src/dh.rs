//! Diffie-Hellman over the shared 2048-bit group, consumed by the external
//! transport handshakes.

use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::rngs::OsRng;

use crate::constants::{to_fixed_be, ELGAMAL_G, ELGAMAL_P};

pub struct DhKeypair {
    secret: BigUint,
    public: [u8; 256],
}

impl DhKeypair {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let secret = rng.gen_biguint_below(&(&*ELGAMAL_P - BigUint::one()));
        let public_int = ELGAMAL_G.modpow(&secret, &ELGAMAL_P);
        let mut public = [0u8; 256];
        public.copy_from_slice(&to_fixed_be(&public_int, 256));
        Self { secret, public }
    }

    pub fn public_key(&self) -> &[u8; 256] {
        &self.public
    }

    /// The 256-byte shared secret with a peer's public value.
    pub fn agree(&self, their_public: &[u8; 256]) -> [u8; 256] {
        let theirs = BigUint::from_bytes_be(their_public);
        let shared = theirs.modpow(&self.secret, &ELGAMAL_P);
        let mut out = [0u8; 256];
        out.copy_from_slice(&to_fixed_be(&shared, 256));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_agrees() {
        let alice = DhKeypair::generate();
        let bob = DhKeypair::generate();
        assert_eq!(
            alice.agree(bob.public_key()),
            bob.agree(alice.public_key())
        );
    }

    #[test]
    fn test_distinct_peers_distinct_secrets() {
        let alice = DhKeypair::generate();
        let bob = DhKeypair::generate();
        let carol = DhKeypair::generate();
        assert_ne!(
            alice.agree(bob.public_key()),
            alice.agree(carol.public_key())
        );
    }
}
