//! Tunnel engine
//!
//! Everything between "pick some hops" and "bytes for the transport": build
//! records and their onion reply handling, the layer-encrypted data plane
//! (gateway fragmentation, participant transform, endpoint reassembly),
//! transit tunnels we carry for others, and the pools that keep local
//! tunnels topped up, tested, and replaced before expiry.

mod build;
mod config;
mod endpoint;
mod engine;
mod gateway;
mod pool;
mod transit;
mod tunnel;

pub use build::{create_build_message, handle_build_request, process_build_reply, BuildOutcome};
pub use config::{HopCandidate, TunnelConfig, TunnelHopConfig, TunnelKind};
pub use endpoint::TunnelEndpoint;
pub use engine::{EngineAction, HopSelector, TunnelEngine, TUNNEL_MANAGE_INTERVAL_S};
pub use gateway::{TunnelGatewayProcessor, TunnelMessageBlock};
pub use pool::{PoolConfig, TunnelPool, TUNNEL_TEST_TIMEOUT_S};
pub use transit::{TransitRole, TransitTunnel};
pub use tunnel::{
    Tunnel, TunnelDelivery, TunnelState, TUNNEL_CREATION_TIMEOUT_S, TUNNEL_EXPIRATION_S,
    TUNNEL_EXPIRING_THRESHOLD_S, TUNNEL_RECREATION_THRESHOLD_S,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Malformed tunnel payload: {0}")]
    Malformed(&'static str),

    #[error("Tunnel {0} not found")]
    NotFound(u32),

    #[error("Checksum mismatch in tunnel data")]
    ChecksumMismatch,

    #[error("No hops available")]
    NoHops,

    #[error(transparent)]
    Crypto(#[from] garlicroute_crypto::CryptoError),

    #[error(transparent)]
    Core(#[from] garlicroute_core::CoreError),

    #[error(transparent)]
    I2np(#[from] garlicroute_i2np::I2npError),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
