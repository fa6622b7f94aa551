//! Router assembly
//!
//! The `RouterCore` aggregate wires the NetDB, tunnel, and garlic workers
//! together over their queues, owns the local identity and published
//! RouterInfo, exposes the transport boundary, and implements graceful
//! shutdown (stop accepting transit, drain, persist).

mod context;
mod core;
mod destination;
mod transport;

pub use context::{RouterContext, RouterStatus};
pub use core::RouterCore;
pub use destination::LocalDestination;
pub use transport::{PeerErrorTracker, Transport, PEER_ERROR_THRESHOLD};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error(transparent)]
    Core(#[from] garlicroute_core::CoreError),

    #[error(transparent)]
    Settings(#[from] garlicroute_settings::SettingsError),

    #[error(transparent)]
    NetDb(#[from] garlicroute_netdb::NetDbError),

    #[error("Worker unavailable: {0}")]
    WorkerGone(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RouterError>;
