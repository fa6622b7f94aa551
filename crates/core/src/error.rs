use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Short read: needed {needed} bytes, {remaining} remaining")]
    ShortRead { needed: usize, remaining: usize },

    #[error("Invalid certificate type {0}")]
    InvalidCertificate(u8),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Missing signature")]
    MissingSignature,

    #[error("Malformed structure: {0}")]
    Malformed(&'static str),

    #[error("Crypto error: {0}")]
    Crypto(#[from] garlicroute_crypto::CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
