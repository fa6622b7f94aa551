//! Tunnel pools: desired counts, hop filters, and liveness tests.

use std::collections::HashMap;

use garlicroute_core::{IdentHash, TunnelId};

/// Round-trip tests must come back within this.
pub const TUNNEL_TEST_TIMEOUT_S: u64 = 5;

/// Per-destination (or exploratory) pool dimensions.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub name: String,
    pub num_inbound_hops: usize,
    pub num_outbound_hops: usize,
    pub num_inbound_tunnels: usize,
    pub num_outbound_tunnels: usize,
    /// When set, hops are drawn only from these peers.
    pub explicit_peers: Option<Vec<IdentHash>>,
}

impl PoolConfig {
    /// The shared exploratory pool: 2 hops, 5 tunnels each way.
    pub fn exploratory() -> Self {
        Self {
            name: "exploratory".to_string(),
            num_inbound_hops: 2,
            num_outbound_hops: 2,
            num_inbound_tunnels: 5,
            num_outbound_tunnels: 5,
            explicit_peers: None,
        }
    }
}

/// Pool state beyond the tunnels themselves (which live in the engine maps).
pub struct TunnelPool {
    pub config: PoolConfig,
    /// Outstanding round-trip tests: msg id -> (outbound, inbound, sent at).
    pending_tests: HashMap<u32, (TunnelId, TunnelId, u64)>,
    active: bool,
}

impl TunnelPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pending_tests: HashMap::new(),
            active: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// A peer passes the pool's filters.
    pub fn allows(&self, peer: &IdentHash) -> bool {
        match &self.config.explicit_peers {
            Some(peers) => peers.contains(peer),
            None => true,
        }
    }

    pub fn record_test(&mut self, msg_id: u32, outbound: TunnelId, inbound: TunnelId, now_s: u64) {
        self.pending_tests.insert(msg_id, (outbound, inbound, now_s));
    }

    /// A delivery status came back; returns the tested pair on match.
    pub fn complete_test(&mut self, msg_id: u32) -> Option<(TunnelId, TunnelId)> {
        self.pending_tests
            .remove(&msg_id)
            .map(|(out_id, in_id, _)| (out_id, in_id))
    }

    /// Drop timed-out tests, returning the pairs that failed.
    pub fn expire_tests(&mut self, now_s: u64) -> Vec<(TunnelId, TunnelId)> {
        let mut failed = Vec::new();
        self.pending_tests.retain(|_, (out_id, in_id, sent)| {
            if now_s > *sent + TUNNEL_TEST_TIMEOUT_S {
                failed.push((*out_id, *in_id));
                false
            } else {
                true
            }
        });
        failed
    }

    pub fn outstanding_tests(&self) -> usize {
        self.pending_tests.len()
    }
}
