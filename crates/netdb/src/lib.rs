//! Network database
//!
//! The distributed directory of RouterInfos and LeaseSets: a read-mostly
//! store shared across workers, floodfill selection over the daily-rotated
//! keyspace, the lookup state machine, periodic publish and exploratory
//! probing, and disk persistence.

mod engine;
pub mod persist;
mod profiles;
mod requests;
mod routing_key;
mod store;

pub use engine::{NetDbAction, NetDbEngine, EXPLORE_INTERVAL_S, PUBLISH_INTERVAL_S};
pub use profiles::RouterProfile;
pub use requests::{
    LookupResult, RequestTracker, LOOKUP_HARD_TIMEOUT_S, LOOKUP_MAX_ATTEMPTS,
    LOOKUP_SOFT_TIMEOUT_S,
};
pub use routing_key::{routing_key, xor_distance, RoutingKeyCache};
pub use store::NetDbStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetDbError {
    #[error("Record rejected: {0}")]
    Rejected(&'static str),

    #[error(transparent)]
    Core(#[from] garlicroute_core::CoreError),

    #[error(transparent)]
    I2np(#[from] garlicroute_i2np::I2npError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetDbError>;
