//! GarlicRoute core types
//!
//! The data model shared by every other crate: ident hashes, router and
//! destination identities, RouterInfos, LeaseSets, private key bundles, and
//! the checked big-endian reader/writer the wire codecs are built on.

mod error;
mod identity;
mod lease_set;
mod router_info;
mod types;
pub mod wire;

pub use error::{CoreError, Result};
pub use identity::{Certificate, KeyCertificate, PrivateKeys, RouterIdentity};
pub use lease_set::{Lease, LeaseSet, MAX_LEASES};
pub use router_info::{caps, RouterAddress, RouterInfo, ROUTER_INFO_EXPIRATION_MS};
pub use types::{timestamp_ms, timestamp_s, IdentHash, Mapping, TunnelId};
