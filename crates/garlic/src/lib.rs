//! Garlic / ElGamal-AES session layer
//!
//! Wraps inner I2NP messages as cloves under a hybrid scheme: the first
//! message to a destination carries an ElGamal block establishing a session
//! key plus a batch of session tags; later messages spend one tag each and
//! skip the public-key work entirely.

mod clove;
mod engine;
mod session;

pub use clove::{CloveSet, DeliveryInstructions, GarlicClove};
pub use engine::GarlicEngine;
pub use session::{wrap_with_tag, GarlicRoutingSession, TAGS_PER_WRAP};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GarlicError {
    #[error("Malformed garlic message: {0}")]
    Malformed(&'static str),

    #[error("Payload digest mismatch")]
    DigestMismatch,

    #[error(transparent)]
    Crypto(#[from] garlicroute_crypto::CryptoError),

    #[error(transparent)]
    Core(#[from] garlicroute_core::CoreError),

    #[error(transparent)]
    I2np(#[from] garlicroute_i2np::I2npError),
}

pub type Result<T> = std::result::Result<T, GarlicError>;
