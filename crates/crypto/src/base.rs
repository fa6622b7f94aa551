//! The I2P base32 and base64 alphabets.
//!
//! Base64 substitutes `-~` for the standard `+/` so encoded hashes survive
//! inside URLs and filenames; base32 is RFC 4648 lowercase without padding.

use data_encoding::{Encoding, Specification};
use lazy_static::lazy_static;

lazy_static! {
    pub static ref BASE32_I2P: Encoding = {
        let mut spec = Specification::new();
        spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
        spec.encoding().expect("valid base32 spec")
    };
    pub static ref BASE64_I2P: Encoding = {
        let mut spec = Specification::new();
        spec.symbols
            .push_str("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~");
        spec.padding = Some('=');
        spec.encoding().expect("valid base64 spec")
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_roundtrip() {
        let data = b"\x00\x01\x02\xfe\xff garlic";
        let encoded = BASE64_I2P.encode(data);
        assert_eq!(BASE64_I2P.decode(encoded.as_bytes()).unwrap(), data);
    }

    #[test]
    fn test_base64_uses_i2p_alphabet() {
        // 0xff 0xff 0xff encodes to four chars from the high end of the table
        let encoded = BASE64_I2P.encode(&[0xff, 0xff, 0xff]);
        assert_eq!(encoded, "~~~~");
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn test_base32_roundtrip() {
        let data = [7u8; 32];
        let encoded = BASE32_I2P.encode(&data);
        assert!(encoded.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(BASE32_I2P.decode(encoded.as_bytes()).unwrap(), data);
    }

    #[test]
    fn test_base64_arbitrary_lengths() {
        for len in 0..48 {
            let data: Vec<u8> = (0..len as u8).collect();
            let encoded = BASE64_I2P.encode(&data);
            assert_eq!(BASE64_I2P.decode(encoded.as_bytes()).unwrap(), data);
        }
    }
}
