//! The boundary to the external transport drivers.

use std::collections::HashMap;
use std::sync::Mutex;

use garlicroute_core::IdentHash;
use garlicroute_i2np::I2npMessage;

/// Peers exceeding this many malformed messages get their session dropped.
pub const PEER_ERROR_THRESHOLD: u32 = 10;

/// What the core consumes from the transport layer. The handshake has
/// already authenticated the peer, so sends are addressed by ident hash.
/// Implementations must not block and may drop when no session exists.
pub trait Transport: Send + Sync {
    fn send(&self, to: IdentHash, message: I2npMessage);

    /// Advice from the core that the peer's session should be torn down
    /// (too many malformed messages). Default: ignore.
    fn drop_peer(&self, _peer: IdentHash) {}
}

/// Counts malformed messages per peer.
#[derive(Default)]
pub struct PeerErrorTracker {
    errors: Mutex<HashMap<IdentHash, u32>>,
}

impl PeerErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one error; returns true when the peer crossed the threshold
    /// (and the counter resets).
    pub fn record(&self, peer: IdentHash) -> bool {
        let mut errors = self.errors.lock().expect("error lock");
        let count = errors.entry(peer).or_insert(0);
        *count += 1;
        if *count >= PEER_ERROR_THRESHOLD {
            errors.remove(&peer);
            true
        } else {
            false
        }
    }

    pub fn clear(&self, peer: &IdentHash) {
        self.errors.lock().expect("error lock").remove(peer);
    }
}
