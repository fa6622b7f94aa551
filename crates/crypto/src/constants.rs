//! Fixed group parameters.
//!
//! The ElGamal modulus is the 2048-bit MODP group (RFC 3526 group 14) with
//! generator 2. The DSA parameters are the network-wide 1024-bit primes every
//! router signs DSA-SHA1 records with.

use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::Num;

const ELGAMAL_P_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF"
);

const DSA_P_HEX: &str = concat!(
    "9C05B2AA960D9B97B8931963C9CC9E8C3026E9B8ED92FAD0",
    "A69CC886D5BF8015FCADAE31A0AD18FAB3F01B00A358DE23",
    "7655C4964AFAA2B337E96AD316B9FB1CC564B5AEC5B69A9F",
    "F6C3E4548707FEF8503D91DD8602E867E6D35D2235C1869C",
    "E2479C3B9D5401DE04E0727FB33D6511285D4CF29538D9E3",
    "B6051F5B22CC1C93"
);

const DSA_Q_HEX: &str = "A5DFC28FEF4CA1E286744CD8EED9D29D684046B7";

const DSA_G_HEX: &str = concat!(
    "0C1F4D27D40093B429E962D7223824E0BBC47E7C832A3923",
    "6FC683AF84889581075FF9082ED32353D4374D7301CDA1D2",
    "3C431F4698599DDA02451824FF369752593647CC3DDC197D",
    "E985E43D136CDCFC6BD5409CD2F450821142A5E6F8EB1C3A",
    "B5D0484B8129FCF17BCE4F7F33321C3CB3DBB14A905E7B2B",
    "3E93BE4708CBCC82"
);

lazy_static! {
    pub(crate) static ref ELGAMAL_P: BigUint =
        BigUint::from_str_radix(ELGAMAL_P_HEX, 16).expect("valid modulus");
    pub(crate) static ref ELGAMAL_G: BigUint = BigUint::from(2u32);
    pub(crate) static ref DSA_P: BigUint =
        BigUint::from_str_radix(DSA_P_HEX, 16).expect("valid modulus");
    pub(crate) static ref DSA_Q: BigUint =
        BigUint::from_str_radix(DSA_Q_HEX, 16).expect("valid modulus");
    pub(crate) static ref DSA_G: BigUint =
        BigUint::from_str_radix(DSA_G_HEX, 16).expect("valid generator");
}

/// Big-endian encoding left-padded with zeros to `len` bytes.
pub(crate) fn to_fixed_be(n: &BigUint, len: usize) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    debug_assert!(bytes.len() <= len);
    let mut out = vec![0u8; len];
    out[len - bytes.len()..].copy_from_slice(&bytes);
    out
}
