//! Hop chains for tunnels under construction.

use rand::{rngs::OsRng, Rng, RngCore};

use garlicroute_core::{IdentHash, TunnelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    Inbound,
    Outbound,
}

/// A peer eligible to carry a tunnel hop.
#[derive(Clone)]
pub struct HopCandidate {
    pub ident: IdentHash,
    pub encryption_key: [u8; 256],
}

/// Everything one hop needs to know, plus the keys it will encrypt with.
#[derive(Clone)]
pub struct TunnelHopConfig {
    pub ident: IdentHash,
    pub encryption_key: [u8; 256],
    /// Tunnel id the hop receives on.
    pub tunnel_id: TunnelId,
    pub next_ident: IdentHash,
    pub next_tunnel_id: TunnelId,
    pub layer_key: [u8; 32],
    pub iv_key: [u8; 32],
    pub reply_key: [u8; 32],
    pub reply_iv: [u8; 16],
    pub is_gateway: bool,
    pub is_endpoint: bool,
    /// Slot this hop's record landed in; set while building.
    pub record_index: usize,
}

fn random_tunnel_id() -> TunnelId {
    loop {
        let id = OsRng.next_u32();
        if id != 0 {
            return id;
        }
    }
}

fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// The full hop chain of a tunnel being built, gateway first.
pub struct TunnelConfig {
    pub kind: TunnelKind,
    pub hops: Vec<TunnelHopConfig>,
    /// For inbound tunnels: the id we will receive on.
    pub receive_tunnel_id: TunnelId,
}

impl TunnelConfig {
    /// Chain `peers` into an inbound tunnel ending at `our_ident`.
    pub fn inbound(peers: &[HopCandidate], our_ident: IdentHash) -> Self {
        let receive_tunnel_id = random_tunnel_id();
        let mut hops = Self::chain(peers);
        let count = hops.len();
        for (i, hop) in hops.iter_mut().enumerate() {
            hop.is_gateway = i == 0;
            if i == count - 1 {
                hop.next_ident = our_ident;
                hop.next_tunnel_id = receive_tunnel_id;
            }
        }
        Self {
            kind: TunnelKind::Inbound,
            hops,
            receive_tunnel_id,
        }
    }

    /// Chain `peers` into an outbound tunnel whose endpoint forwards the
    /// build reply to `reply_gateway` / `reply_tunnel_id` (an inbound tunnel
    /// of ours).
    pub fn outbound(
        peers: &[HopCandidate],
        reply_gateway: IdentHash,
        reply_tunnel_id: TunnelId,
    ) -> Self {
        let mut hops = Self::chain(peers);
        let count = hops.len();
        for (i, hop) in hops.iter_mut().enumerate() {
            if i == count - 1 {
                hop.is_endpoint = true;
                hop.next_ident = reply_gateway;
                hop.next_tunnel_id = reply_tunnel_id;
            }
        }
        Self {
            kind: TunnelKind::Outbound,
            hops,
            receive_tunnel_id: 0,
        }
    }

    fn chain(peers: &[HopCandidate]) -> Vec<TunnelHopConfig> {
        let mut hops: Vec<TunnelHopConfig> = peers
            .iter()
            .map(|peer| TunnelHopConfig {
                ident: peer.ident,
                encryption_key: peer.encryption_key,
                tunnel_id: random_tunnel_id(),
                next_ident: IdentHash::default(),
                next_tunnel_id: 0,
                layer_key: random_key(),
                iv_key: random_key(),
                reply_key: random_key(),
                reply_iv: {
                    let mut iv = [0u8; 16];
                    OsRng.fill_bytes(&mut iv);
                    iv
                },
                is_gateway: false,
                is_endpoint: false,
                record_index: 0,
            })
            .collect();
        for i in 0..hops.len().saturating_sub(1) {
            hops[i].next_ident = hops[i + 1].ident;
            hops[i].next_tunnel_id = hops[i + 1].tunnel_id;
        }
        hops
    }

    /// The id the tunnel is addressed by: the gateway hop's receive id for
    /// outbound tunnels, our own receive id for inbound ones.
    pub fn tunnel_id(&self) -> TunnelId {
        match self.kind {
            TunnelKind::Inbound => self.receive_tunnel_id,
            TunnelKind::Outbound => self.hops.first().map(|h| h.tunnel_id).unwrap_or(0),
        }
    }

    pub fn num_hops(&self) -> usize {
        self.hops.len()
    }

    /// Idents of every hop, for exclusion lists and profiles.
    pub fn peers(&self) -> Vec<IdentHash> {
        self.hops.iter().map(|h| h.ident).collect()
    }

    /// A request-time value in hours, as carried in build records.
    pub fn request_time_hours() -> u32 {
        (garlicroute_core::timestamp_s() / 3600) as u32
    }

    pub fn random_msg_id() -> u32 {
        loop {
            let id = OsRng.gen::<u32>();
            if id != 0 {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(n: usize) -> Vec<HopCandidate> {
        (0..n)
            .map(|i| HopCandidate {
                ident: IdentHash([i as u8 + 1; 32]),
                encryption_key: [0u8; 256],
            })
            .collect()
    }

    #[test]
    fn test_inbound_chain_links_hops() {
        let our_ident = IdentHash([99; 32]);
        let config = TunnelConfig::inbound(&candidates(3), our_ident);

        assert_eq!(config.kind, TunnelKind::Inbound);
        assert_eq!(config.num_hops(), 3);
        assert!(config.hops[0].is_gateway);
        assert!(!config.hops[1].is_gateway);

        // middle hops point at their successor
        assert_eq!(config.hops[0].next_ident, config.hops[1].ident);
        assert_eq!(config.hops[0].next_tunnel_id, config.hops[1].tunnel_id);
        // last hop points home
        assert_eq!(config.hops[2].next_ident, our_ident);
        assert_eq!(config.hops[2].next_tunnel_id, config.receive_tunnel_id);
        assert_eq!(config.tunnel_id(), config.receive_tunnel_id);
    }

    #[test]
    fn test_outbound_chain_marks_endpoint() {
        let reply_gateway = IdentHash([88; 32]);
        let config = TunnelConfig::outbound(&candidates(3), reply_gateway, 4242);

        assert!(config.hops[2].is_endpoint);
        assert!(!config.hops[0].is_endpoint);
        assert_eq!(config.hops[2].next_ident, reply_gateway);
        assert_eq!(config.hops[2].next_tunnel_id, 4242);
        assert_eq!(config.tunnel_id(), config.hops[0].tunnel_id);
    }

    #[test]
    fn test_keys_are_distinct_per_hop() {
        let config = TunnelConfig::inbound(&candidates(2), IdentHash([9; 32]));
        assert_ne!(config.hops[0].layer_key, config.hops[1].layer_key);
        assert_ne!(config.hops[0].reply_key, config.hops[1].reply_key);
    }
}
