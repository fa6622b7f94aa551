//! AES-256 in the three shapes the router needs: plain CBC for garlic blocks
//! and build records, single-block ECB for tunnel IV transforms, and the
//! combined layer transform applied at every tunnel hop.

use aes::cipher::{
    block_padding::NoPadding, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut,
    KeyInit, KeyIvInit,
};
use aes::Aes256;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-256-CBC over whole blocks (no padding). Buffer length must be a
/// multiple of 16.
pub struct CbcAes {
    key: [u8; 32],
}

impl CbcAes {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, iv: &[u8; 16], buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % 16, 0);
        let len = buf.len();
        Aes256CbcEnc::new((&self.key).into(), iv.into())
            .encrypt_padded_mut::<NoPadding>(buf, len)
            .expect("whole blocks");
    }

    pub fn decrypt(&self, iv: &[u8; 16], buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % 16, 0);
        Aes256CbcDec::new((&self.key).into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(buf)
            .expect("whole blocks");
    }
}

/// Encrypt one 16-byte block in place (AES-256-ECB).
pub fn ecb_encrypt_block(key: &[u8; 32], block: &mut [u8; 16]) {
    Aes256::new(key.into()).encrypt_block(block.into());
}

/// Decrypt one 16-byte block in place (AES-256-ECB).
pub fn ecb_decrypt_block(key: &[u8; 32], block: &mut [u8; 16]) {
    Aes256::new(key.into()).decrypt_block(block.into());
}

/// The per-hop tunnel layer transform.
///
/// A transit hop calls [`LayerCipher::decrypt`]: the leading 16 bytes are
/// ECB-encrypted under the IV key to derive the CBC IV, the body is
/// CBC-decrypted under the layer key, and the leading bytes are ECB-encrypted
/// once more to become the outgoing IV. The tunnel creator calls
/// [`LayerCipher::encrypt`], the exact inverse, once per hop, so that the
/// composition over the full hop chain is the identity.
#[derive(Clone)]
pub struct LayerCipher {
    layer_key: [u8; 32],
    iv_key: [u8; 32],
}

impl LayerCipher {
    pub fn new(layer_key: [u8; 32], iv_key: [u8; 32]) -> Self {
        Self { layer_key, iv_key }
    }

    /// Transit-hop direction. `payload` is IV (16 bytes) followed by a
    /// whole-block body.
    pub fn decrypt(&self, payload: &mut [u8]) {
        debug_assert!(payload.len() > 16 && payload.len() % 16 == 0);
        let (iv, body) = payload.split_at_mut(16);
        let iv: &mut [u8; 16] = iv.try_into().expect("16-byte iv");
        ecb_encrypt_block(&self.iv_key, iv);
        CbcAes::new(self.layer_key).decrypt(iv, body);
        ecb_encrypt_block(&self.iv_key, iv);
    }

    /// Creator direction, inverse of [`LayerCipher::decrypt`].
    pub fn encrypt(&self, payload: &mut [u8]) {
        debug_assert!(payload.len() > 16 && payload.len() % 16 == 0);
        let (iv, body) = payload.split_at_mut(16);
        let iv: &mut [u8; 16] = iv.try_into().expect("16-byte iv");
        ecb_decrypt_block(&self.iv_key, iv);
        CbcAes::new(self.layer_key).encrypt(iv, body);
        ecb_decrypt_block(&self.iv_key, iv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbc_roundtrip() {
        let cbc = CbcAes::new([3u8; 32]);
        let iv = [9u8; 16];
        let mut buf = [0u8; 64];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = i as u8;
        }
        let original = buf;

        cbc.encrypt(&iv, &mut buf);
        assert_ne!(buf, original);
        cbc.decrypt(&iv, &mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_ecb_block_roundtrip() {
        let key = [7u8; 32];
        let mut block = *b"0123456789abcdef";
        let original = block;
        ecb_encrypt_block(&key, &mut block);
        assert_ne!(block, original);
        ecb_decrypt_block(&key, &mut block);
        assert_eq!(block, original);
    }

    #[test]
    fn test_layer_cipher_inverse() {
        let cipher = LayerCipher::new([1u8; 32], [2u8; 32]);
        let mut payload = vec![0u8; 1024];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let original = payload.clone();

        cipher.encrypt(&mut payload);
        cipher.decrypt(&mut payload);
        assert_eq!(payload, original);
    }

    #[test]
    fn test_layer_chain_cancels() {
        // creator applies the inverse once per hop (endpoint first); hops
        // then peel their layer in path order
        let hops: Vec<LayerCipher> = (0..3u8)
            .map(|i| LayerCipher::new([i + 1; 32], [i + 101; 32]))
            .collect();
        let mut payload = vec![0x5au8; 1024];
        let original = payload.clone();

        for hop in hops.iter().rev() {
            hop.encrypt(&mut payload);
        }
        for hop in hops.iter() {
            hop.decrypt(&mut payload);
        }
        assert_eq!(payload, original);
    }
}
