//! I2NP message layer
//!
//! The tagged, integrity-checked envelope every router-to-router and
//! end-to-end control message travels in, plus typed codecs for each payload
//! the core handles.

mod build;
mod database;
mod message;
mod pool;
mod status;
mod tunnel;

pub use build::{
    record_is_for, BuildRequestRecord, BuildResponseRecord, TunnelBuildMessage,
    BUILD_RECORD_SIZE, BUILD_RESPONSE_ACCEPT, MAX_BUILD_RECORDS, STANDARD_BUILD_RECORDS,
};
pub use database::{
    DatabaseLookup, DatabaseSearchReply, DatabaseStore, LookupKind, StoredData,
};
pub use message::{
    I2npMessage, MessageType, Payload, EXPIRATION_SLACK_MS, I2NP_HEADER_SIZE,
    MESSAGE_EXPIRATION_MS,
};
pub use pool::{MessagePool, TunnelDataBuffer};
pub use status::DeliveryStatus;
pub use tunnel::{
    DataMessage, TunnelDataMessage, TunnelGatewayMessage, TUNNEL_DATA_ENCRYPTED_SIZE,
    TUNNEL_DATA_MSG_SIZE,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum I2npError {
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Message expired {0} ms ago")]
    Expired(u64),

    #[error("Unknown message type {0}")]
    UnknownType(u8),

    #[error("Declared size {declared} exceeds buffer ({actual} bytes)")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("Malformed payload: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Core(#[from] garlicroute_core::CoreError),

    #[error(transparent)]
    Crypto(#[from] garlicroute_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, I2npError>;
