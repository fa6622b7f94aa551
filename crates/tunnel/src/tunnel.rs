//! Local tunnels: state machine, creator-side layer contexts, leases.

use garlicroute_core::{timestamp_s, IdentHash, Lease, TunnelId};
use garlicroute_crypto::LayerCipher;
use garlicroute_i2np::TunnelBuildMessage;

use crate::build::process_build_reply;
use crate::config::{TunnelConfig, TunnelKind};
use crate::endpoint::TunnelEndpoint;
use crate::gateway::TunnelGatewayProcessor;
use crate::Result;

/// Hard tunnel lifetime.
pub const TUNNEL_EXPIRATION_S: u64 = 600;
/// Pending builds are abandoned after this long.
pub const TUNNEL_CREATION_TIMEOUT_S: u64 = 30;
/// Start building a replacement this long before expiry.
pub const TUNNEL_RECREATION_THRESHOLD_S: u64 = 120;
/// Stop handing the tunnel out this long before expiry.
pub const TUNNEL_EXPIRING_THRESHOLD_S: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Pending,
    BuildReplyReceived,
    Established,
    TestFailed,
    BuildFailed,
    Failed,
    Expiring,
}

/// Where a reassembled (or to-be-fragmented) message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelDelivery {
    Local,
    Router(IdentHash),
    Tunnel {
        gateway: IdentHash,
        tunnel_id: TunnelId,
    },
}

/// A tunnel we created, inbound or outbound.
pub struct Tunnel {
    kind: TunnelKind,
    tunnel_id: TunnelId,
    first_hop: IdentHash,
    /// Inbound: the gateway hop's receive id, the one leases advertise.
    gateway_tunnel_id: TunnelId,
    peers: Vec<IdentHash>,
    hops: Vec<LayerCipher>,
    state: TunnelState,
    created_s: u64,
    pool: Option<String>,
    recreated: bool,
    use_count: u64,
    config: Option<TunnelConfig>,
    pub gateway: TunnelGatewayProcessor,
    pub endpoint: TunnelEndpoint,
}

impl Tunnel {
    /// A tunnel whose build message is in flight.
    pub fn pending(config: TunnelConfig, pool: Option<String>) -> Self {
        let (first_hop, gateway_tunnel_id) = match config.kind {
            TunnelKind::Inbound => (
                config.hops.first().map(|h| h.ident).unwrap_or_default(),
                config.hops.first().map(|h| h.tunnel_id).unwrap_or(0),
            ),
            TunnelKind::Outbound => (
                config.hops.first().map(|h| h.ident).unwrap_or_default(),
                config.tunnel_id(),
            ),
        };
        Self {
            kind: config.kind,
            tunnel_id: config.tunnel_id(),
            first_hop,
            gateway_tunnel_id,
            peers: config.peers(),
            hops: Vec::new(),
            state: TunnelState::Pending,
            created_s: timestamp_s(),
            pool,
            recreated: false,
            use_count: 0,
            config: Some(config),
            gateway: TunnelGatewayProcessor::new(),
            endpoint: TunnelEndpoint::new(),
        }
    }

    /// An inbound tunnel with no hops: gateway and endpoint are both us.
    pub fn zero_hop_inbound(our_ident: IdentHash) -> Self {
        let config = TunnelConfig::inbound(&[], our_ident);
        let tunnel_id = config.receive_tunnel_id;
        Self {
            kind: TunnelKind::Inbound,
            tunnel_id,
            first_hop: our_ident,
            gateway_tunnel_id: tunnel_id,
            peers: Vec::new(),
            hops: Vec::new(),
            state: TunnelState::Established,
            created_s: timestamp_s(),
            pool: None,
            recreated: false,
            use_count: 0,
            config: None,
            gateway: TunnelGatewayProcessor::new(),
            endpoint: TunnelEndpoint::new(),
        }
    }

    pub fn kind(&self) -> TunnelKind {
        self.kind
    }

    pub fn tunnel_id(&self) -> TunnelId {
        self.tunnel_id
    }

    /// Outbound: the router we hand TunnelData to. Inbound: the gateway.
    pub fn first_hop(&self) -> IdentHash {
        self.first_hop
    }

    pub fn gateway_tunnel_id(&self) -> TunnelId {
        self.gateway_tunnel_id
    }

    pub fn peers(&self) -> &[IdentHash] {
        &self.peers
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn set_state(&mut self, state: TunnelState) {
        self.state = state;
    }

    pub fn created_s(&self) -> u64 {
        self.created_s
    }

    pub fn pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, TunnelState::Established | TunnelState::Expiring)
    }

    pub fn is_usable(&self) -> bool {
        self.state == TunnelState::Established
    }

    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    pub fn mark_used(&mut self) {
        self.use_count += 1;
    }

    pub fn is_recreated(&self) -> bool {
        self.recreated
    }

    pub fn set_recreated(&mut self) {
        self.recreated = true;
    }

    pub fn expires_at_s(&self) -> u64 {
        self.created_s + TUNNEL_EXPIRATION_S
    }

    pub fn is_expired(&self, now_s: u64) -> bool {
        now_s > self.expires_at_s()
    }

    pub fn should_recreate(&self, now_s: u64) -> bool {
        self.is_established() && !self.recreated
            && now_s + TUNNEL_RECREATION_THRESHOLD_S > self.expires_at_s()
    }

    pub fn should_mark_expiring(&self, now_s: u64) -> bool {
        self.state == TunnelState::Established
            && now_s + TUNNEL_EXPIRING_THRESHOLD_S > self.expires_at_s()
    }

    pub fn build_timed_out(&self, now_s: u64) -> bool {
        self.state == TunnelState::Pending
            && now_s > self.created_s + TUNNEL_CREATION_TIMEOUT_S
    }

    /// The lease this inbound tunnel contributes to a LeaseSet.
    pub fn lease(&self) -> Option<Lease> {
        if self.kind != TunnelKind::Inbound || !self.is_established() {
            return None;
        }
        Some(Lease {
            tunnel_gateway: self.first_hop,
            tunnel_id: self.gateway_tunnel_id,
            end_date: self.expires_at_s() * 1000,
        })
    }

    pub fn config(&self) -> Option<&TunnelConfig> {
        self.config.as_ref()
    }

    pub fn config_mut(&mut self) -> Option<&mut TunnelConfig> {
        self.config.as_mut()
    }

    /// Process the build reply. Returns true when every hop accepted; the
    /// layer contexts are then installed and the tunnel is established.
    pub fn handle_build_reply(&mut self, message: &TunnelBuildMessage) -> Result<bool> {
        self.state = TunnelState::BuildReplyReceived;
        let Some(config) = self.config.as_ref() else {
            return Ok(false);
        };
        let responses = process_build_reply(config, message)?;
        if responses.iter().all(|&r| r == 0) {
            self.hops = config
                .hops
                .iter()
                .map(|hop| LayerCipher::new(hop.layer_key, hop.iv_key))
                .collect();
            self.state = TunnelState::Established;
            self.config = None;
            Ok(true)
        } else {
            self.state = TunnelState::BuildFailed;
            Ok(false)
        }
    }

    /// Apply the creator-side compensation once per hop, nearest-endpoint
    /// first, so the hops' own transforms cancel along the path.
    pub fn encrypt_payload(&self, payload: &mut [u8]) {
        for cipher in self.hops.iter().rev() {
            cipher.encrypt(payload);
        }
    }
}
