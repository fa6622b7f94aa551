//! The tunnel worker's state: local tunnels, transit tunnels, pending
//! builds, and pools. Processing is synchronous message-in / actions-out;
//! the async worker that owns this engine executes the actions.

use std::collections::HashMap;

use rand::{rngs::OsRng, RngCore};
use tracing::{debug, info, warn};

use garlicroute_core::{timestamp_s, IdentHash, Lease, TunnelId};
use garlicroute_i2np::{
    DeliveryStatus, I2npMessage, MessagePool, MessageType, TunnelBuildMessage,
    TunnelDataMessage, TunnelGatewayMessage,
};

use crate::build::{create_build_message, handle_build_request};
use crate::config::{HopCandidate, TunnelConfig, TunnelKind};
use crate::gateway::TunnelMessageBlock;
use crate::pool::{PoolConfig, TunnelPool};
use crate::transit::TransitTunnel;
use crate::tunnel::{Tunnel, TunnelDelivery, TunnelState};

/// Housekeeping cadence for the tunnel worker.
pub const TUNNEL_MANAGE_INTERVAL_S: u64 = 15;

const DEFAULT_MAX_TRANSIT: usize = 2500;
/// Response byte for declined build requests.
const BUILD_REJECT: u8 = 30;

/// Supplies hop candidates; implemented over the NetDB by the router.
pub trait HopSelector {
    fn select_hops(
        &self,
        count: usize,
        excluded: &[IdentHash],
        allowed: Option<&[IdentHash]>,
    ) -> Option<Vec<HopCandidate>>;
}

/// What the engine wants done outside itself.
#[derive(Debug)]
pub enum EngineAction {
    /// Hand to the transport layer.
    Send { to: IdentHash, message: I2npMessage },
    /// Surface at the local router's dispatcher.
    DeliverLocal(I2npMessage),
}

pub struct TunnelEngine {
    our_ident: IdentHash,
    decryption_key: [u8; 256],
    inbound: HashMap<TunnelId, Tunnel>,
    outbound: HashMap<TunnelId, Tunnel>,
    transit: HashMap<TunnelId, TransitTunnel>,
    pending_inbound: HashMap<u32, Tunnel>,
    pending_outbound: HashMap<u32, Tunnel>,
    pools: HashMap<String, TunnelPool>,
    /// Recycled tunnel-data buffers for the forwarding fast path.
    pool_buffers: MessagePool,
    accepts_transit: bool,
    max_transit: usize,
    successes: u64,
    failures: u64,
}

impl TunnelEngine {
    pub fn new(our_ident: IdentHash, decryption_key: [u8; 256]) -> Self {
        Self {
            our_ident,
            decryption_key,
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            transit: HashMap::new(),
            pending_inbound: HashMap::new(),
            pending_outbound: HashMap::new(),
            pools: HashMap::new(),
            pool_buffers: MessagePool::default(),
            accepts_transit: true,
            max_transit: DEFAULT_MAX_TRANSIT,
            successes: 0,
            failures: 0,
        }
    }

    pub fn our_ident(&self) -> IdentHash {
        self.our_ident
    }

    pub fn set_accepts_transit(&mut self, accepts: bool) {
        self.accepts_transit = accepts;
    }

    pub fn accepts_transit(&self) -> bool {
        self.accepts_transit
    }

    pub fn set_max_transit(&mut self, max: usize) {
        self.max_transit = max;
    }

    pub fn transit_count(&self) -> usize {
        self.transit.len()
    }

    /// Seconds until the longest-lived transit tunnel expires.
    pub fn transit_remaining_s(&self, now_s: u64) -> u64 {
        self.transit
            .values()
            .map(|t| t.expires_at_s().saturating_sub(now_s))
            .max()
            .unwrap_or(0)
    }

    pub fn add_pool(&mut self, config: PoolConfig) {
        self.pools
            .insert(config.name.clone(), TunnelPool::new(config));
    }

    pub fn remove_pool(&mut self, name: &str) {
        self.pools.remove(name);
        for tunnel in self.inbound.values_mut().chain(self.outbound.values_mut()) {
            if tunnel.pool() == Some(name) {
                tunnel.set_state(TunnelState::Expiring);
            }
        }
    }

    pub fn build_stats(&self) -> (u64, u64) {
        (self.successes, self.failures)
    }

    // ---- tunnel selection -------------------------------------------------

    fn select_from<'a>(
        tunnels: impl Iterator<Item = &'a Tunnel>,
        pool: Option<&str>,
    ) -> Option<TunnelId> {
        tunnels
            .filter(|t| t.is_usable() && (pool.is_none() || t.pool() == pool))
            .min_by_key(|t| t.use_count())
            .map(|t| t.tunnel_id())
    }

    /// Least-used established outbound tunnel of `pool` (any pool if None).
    pub fn select_outbound(&self, pool: Option<&str>) -> Option<TunnelId> {
        Self::select_from(self.outbound.values(), pool)
    }

    /// Least-used established inbound tunnel of `pool` (any pool if None).
    pub fn select_inbound(&self, pool: Option<&str>) -> Option<TunnelId> {
        Self::select_from(self.inbound.values(), pool)
    }

    /// The reply path into us: an inbound tunnel's gateway and its receive
    /// id there.
    pub fn inbound_reply_path(&self, pool: Option<&str>) -> Option<(IdentHash, TunnelId)> {
        self.select_inbound(pool)
            .or_else(|| self.select_inbound(None))
            .and_then(|id| self.inbound.get(&id))
            .map(|t| (t.first_hop(), t.gateway_tunnel_id()))
    }

    /// Current leases contributed by a pool's inbound tunnels.
    pub fn leases(&self, pool: Option<&str>) -> Vec<Lease> {
        self.inbound
            .values()
            .filter(|t| t.is_usable() && (pool.is_none() || t.pool() == pool))
            .filter_map(|t| t.lease())
            .collect()
    }

    // ---- building ---------------------------------------------------------

    /// Launch an inbound build through `hops`; the build message leaves via
    /// an outbound tunnel when one exists, directly otherwise.
    pub fn build_inbound(
        &mut self,
        pool: Option<String>,
        hops: Vec<HopCandidate>,
    ) -> Vec<EngineAction> {
        let mut config = TunnelConfig::inbound(&hops, self.our_ident);
        let reply_msg_id = TunnelConfig::random_msg_id();
        let build = match create_build_message(&mut config, reply_msg_id) {
            Ok(build) => build,
            Err(e) => {
                warn!(error = %e, "inbound build message failed");
                return Vec::new();
            }
        };
        let tunnel = Tunnel::pending(config, pool);
        let first_hop = tunnel.first_hop();
        debug!(tunnel = tunnel.tunnel_id(), %first_hop, "building inbound tunnel");
        self.pending_inbound.insert(reply_msg_id, tunnel);

        let message = I2npMessage::new(MessageType::VariableTunnelBuild, build.encode(), None);
        if let Some(out_id) = self.select_outbound(None) {
            self.send_through(
                out_id,
                vec![TunnelMessageBlock {
                    delivery: TunnelDelivery::Router(first_hop),
                    message,
                }],
            )
        } else {
            vec![EngineAction::Send {
                to: first_hop,
                message,
            }]
        }
    }

    /// Launch an outbound build through `hops`. The endpoint returns the
    /// reply through one of our inbound tunnels.
    pub fn build_outbound(
        &mut self,
        pool: Option<String>,
        hops: Vec<HopCandidate>,
    ) -> Vec<EngineAction> {
        let Some((reply_gateway, reply_tunnel)) = self.inbound_reply_path(pool.as_deref()) else {
            debug!("no inbound reply path for outbound build");
            return Vec::new();
        };
        let mut config = TunnelConfig::outbound(&hops, reply_gateway, reply_tunnel);
        let reply_msg_id = TunnelConfig::random_msg_id();
        let build = match create_build_message(&mut config, reply_msg_id) {
            Ok(build) => build,
            Err(e) => {
                warn!(error = %e, "outbound build message failed");
                return Vec::new();
            }
        };
        let tunnel = Tunnel::pending(config, pool);
        let first_hop = tunnel.first_hop();
        debug!(tunnel = tunnel.tunnel_id(), %first_hop, "building outbound tunnel");
        self.pending_outbound.insert(reply_msg_id, tunnel);

        vec![EngineAction::Send {
            to: first_hop,
            message: I2npMessage::new(MessageType::VariableTunnelBuild, build.encode(), None),
        }]
    }

    // ---- data plane -------------------------------------------------------

    /// Queue blocks into an outbound tunnel and emit the layered TunnelData
    /// burst.
    pub fn send_through(
        &mut self,
        tunnel_id: TunnelId,
        blocks: Vec<TunnelMessageBlock>,
    ) -> Vec<EngineAction> {
        let Some(tunnel) = self.outbound.get_mut(&tunnel_id) else {
            debug!(tunnel = tunnel_id, "send through unknown outbound tunnel");
            return Vec::new();
        };
        for block in blocks {
            tunnel.gateway.put(block);
        }
        tunnel.mark_used();
        let first_hop = tunnel.first_hop();
        let id = tunnel.tunnel_id();
        let payloads = tunnel.gateway.flush(&self.pool_buffers);
        let mut actions = Vec::with_capacity(payloads.len());
        for mut payload in payloads {
            tunnel.encrypt_payload(&mut payload[..]);
            let message = TunnelDataMessage {
                tunnel_id: id,
                payload,
            };
            let bytes = message.encode();
            self.pool_buffers.put(message.payload);
            actions.push(EngineAction::Send {
                to: first_hop,
                message: I2npMessage::new(MessageType::TunnelData, bytes, None),
            });
        }
        actions
    }

    /// Dispatch one message from the engine's inbox.
    pub fn handle_message(&mut self, message: I2npMessage) -> Vec<EngineAction> {
        match message.msg_type {
            MessageType::TunnelData => self.handle_tunnel_data(&message),
            MessageType::TunnelGateway => self.handle_tunnel_gateway(&message),
            MessageType::TunnelBuild | MessageType::VariableTunnelBuild => {
                self.handle_build(&message)
            }
            MessageType::TunnelBuildReply | MessageType::VariableTunnelBuildReply => {
                self.handle_build_reply(&message)
            }
            other => {
                debug!(msg_type = ?other, "unexpected message type at tunnel engine");
                Vec::new()
            }
        }
    }

    fn handle_tunnel_data(&mut self, message: &I2npMessage) -> Vec<EngineAction> {
        let data = match TunnelDataMessage::decode_pooled(&message.payload, &self.pool_buffers) {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, "malformed tunnel data");
                return Vec::new();
            }
        };

        if let Some(tunnel) = self.inbound.get_mut(&data.tunnel_id) {
            if tunnel.state() == TunnelState::TestFailed {
                // traffic proves it alive after all
                tunnel.set_state(TunnelState::Established);
            }
            tunnel.mark_used();
            let tunnel_id = data.tunnel_id;
            let mut payload = data.payload;
            tunnel.encrypt_payload(&mut payload[..]);
            let delivered = match tunnel.endpoint.handle_payload(&payload) {
                Ok(delivered) => delivered,
                Err(e) => {
                    debug!(tunnel = tunnel_id, error = %e, "inbound payload rejected");
                    self.pool_buffers.put(payload);
                    return Vec::new();
                }
            };
            self.pool_buffers.put(payload);
            return self.route_deliveries(delivered);
        }

        if let Some(transit) = self.transit.get_mut(&data.tunnel_id) {
            let tunnel_id = data.tunnel_id;
            return match transit.handle_tunnel_data(data, &self.our_ident, &self.pool_buffers) {
                Ok(actions) => actions,
                Err(e) => {
                    debug!(tunnel = tunnel_id, error = %e, "transit payload rejected");
                    Vec::new()
                }
            };
        }

        debug!(tunnel = data.tunnel_id, "tunnel data for unknown tunnel");
        self.pool_buffers.put(data.payload);
        Vec::new()
    }

    fn route_deliveries(
        &mut self,
        delivered: Vec<(TunnelDelivery, I2npMessage)>,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::with_capacity(delivered.len());
        for (delivery, inner) in delivered {
            match delivery {
                TunnelDelivery::Local => actions.push(EngineAction::DeliverLocal(inner)),
                TunnelDelivery::Router(hash) if hash == self.our_ident => {
                    actions.push(EngineAction::DeliverLocal(inner))
                }
                TunnelDelivery::Router(hash) => actions.push(EngineAction::Send {
                    to: hash,
                    message: inner,
                }),
                TunnelDelivery::Tunnel { gateway, tunnel_id } => {
                    let wrapped = TunnelGatewayMessage {
                        tunnel_id,
                        payload: inner.to_bytes(),
                    };
                    actions.push(EngineAction::Send {
                        to: gateway,
                        message: I2npMessage::new(
                            MessageType::TunnelGateway,
                            wrapped.encode(),
                            None,
                        ),
                    });
                }
            }
        }
        actions
    }

    fn handle_tunnel_gateway(&mut self, message: &I2npMessage) -> Vec<EngineAction> {
        let gateway_msg = match TunnelGatewayMessage::decode(&message.payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "malformed tunnel gateway message");
                return Vec::new();
            }
        };
        let inner = match I2npMessage::decode(&gateway_msg.payload) {
            Ok(inner) => inner,
            Err(e) => {
                debug!(error = %e, "malformed message inside tunnel gateway");
                return Vec::new();
            }
        };

        // zero-hop inbound tunnels terminate here
        if self.inbound.contains_key(&gateway_msg.tunnel_id) {
            return vec![EngineAction::DeliverLocal(inner)];
        }

        if let Some(transit) = self.transit.get_mut(&gateway_msg.tunnel_id) {
            let mut actions = Vec::new();
            // stores riding a transit tunnel may carry fresh peer records
            if matches!(
                inner.msg_type,
                MessageType::DatabaseStore | MessageType::DatabaseSearchReply
            ) {
                actions.push(EngineAction::DeliverLocal(inner.clone()));
            }
            actions.extend(transit.handle_tunnel_gateway(inner, &self.pool_buffers));
            return actions;
        }

        debug!(tunnel = gateway_msg.tunnel_id, "gateway message for unknown tunnel");
        Vec::new()
    }

    fn handle_build(&mut self, message: &I2npMessage) -> Vec<EngineAction> {
        let variable = message.msg_type == MessageType::VariableTunnelBuild;

        // an inbound build that has traversed its hops comes back to us
        // under the reply msg id we chose
        if self.pending_inbound.contains_key(&message.msg_id)
            || self.pending_outbound.contains_key(&message.msg_id)
        {
            return self.handle_build_reply(message);
        }

        let build = match TunnelBuildMessage::decode(&message.payload, variable) {
            Ok(build) => build,
            Err(e) => {
                debug!(error = %e, "malformed tunnel build message");
                return Vec::new();
            }
        };

        let response = if self.accepts_transit && self.transit.len() < self.max_transit {
            0
        } else {
            BUILD_REJECT
        };

        let Some(outcome) = handle_build_request(
            &build,
            &self.our_ident,
            &self.decryption_key,
            response,
        ) else {
            debug!("tunnel build with no record for us");
            return Vec::new();
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(error = %e, "tunnel build record rejected");
                return Vec::new();
            }
        };
        let request = &outcome.request;

        if response == 0 {
            let transit = TransitTunnel::from_request(request);
            let id = transit.tunnel_id();
            if self.transit.contains_key(&id) {
                warn!(tunnel = id, "transit tunnel id already exists");
            } else {
                info!(
                    tunnel = id,
                    role = ?transit.role(),
                    "transit tunnel accepted"
                );
                self.transit.insert(id, transit);
            }
        }

        let reply_type = if variable {
            MessageType::VariableTunnelBuildReply
        } else {
            MessageType::TunnelBuildReply
        };
        if request.is_endpoint {
            // outbound build: the reply rides a tunnel back to the creator
            let reply = I2npMessage::new(
                reply_type,
                outcome.message.encode(),
                Some(request.next_msg_id),
            );
            let wrapped = TunnelGatewayMessage {
                tunnel_id: request.next_tunnel,
                payload: reply.to_bytes(),
            };
            vec![EngineAction::Send {
                to: request.next_ident,
                message: I2npMessage::new(MessageType::TunnelGateway, wrapped.encode(), None),
            }]
        } else {
            vec![EngineAction::Send {
                to: request.next_ident,
                message: I2npMessage::new(
                    MessageType::VariableTunnelBuild,
                    outcome.message.encode(),
                    Some(request.next_msg_id),
                ),
            }]
        }
    }

    fn handle_build_reply(&mut self, message: &I2npMessage) -> Vec<EngineAction> {
        let variable = matches!(
            message.msg_type,
            MessageType::VariableTunnelBuild | MessageType::VariableTunnelBuildReply
        );
        let build = match TunnelBuildMessage::decode(&message.payload, variable) {
            Ok(build) => build,
            Err(e) => {
                debug!(error = %e, "malformed build reply");
                return Vec::new();
            }
        };

        let tunnel = self
            .pending_inbound
            .remove(&message.msg_id)
            .or_else(|| self.pending_outbound.remove(&message.msg_id));
        let Some(mut tunnel) = tunnel else {
            debug!(msg_id = message.msg_id, "build reply with no pending tunnel");
            return Vec::new();
        };

        match tunnel.handle_build_reply(&build) {
            Ok(true) => {
                info!(
                    tunnel = tunnel.tunnel_id(),
                    kind = ?tunnel.kind(),
                    "tunnel established"
                );
                self.successes += 1;
                match tunnel.kind() {
                    TunnelKind::Inbound => {
                        self.inbound.insert(tunnel.tunnel_id(), tunnel);
                    }
                    TunnelKind::Outbound => {
                        self.outbound.insert(tunnel.tunnel_id(), tunnel);
                    }
                }
            }
            Ok(false) => {
                info!(tunnel = tunnel.tunnel_id(), "tunnel build declined");
                self.failures += 1;
            }
            Err(e) => {
                debug!(error = %e, "build reply processing failed");
                self.failures += 1;
            }
        }
        Vec::new()
    }

    // ---- tests ------------------------------------------------------------

    /// Offer a delivery-status msg id to the pools' outstanding tests.
    pub fn complete_tunnel_test(&mut self, msg_id: u32) -> bool {
        for pool in self.pools.values_mut() {
            if let Some((out_id, in_id)) = pool.complete_test(msg_id) {
                for (map, id) in [(&mut self.outbound, out_id), (&mut self.inbound, in_id)] {
                    if let Some(tunnel) = map.get_mut(&id) {
                        if tunnel.state() == TunnelState::TestFailed {
                            tunnel.set_state(TunnelState::Established);
                        }
                    }
                }
                return true;
            }
        }
        false
    }

    // ---- housekeeping -----------------------------------------------------

    pub fn manage(&mut self, now_s: u64, selector: &dyn HopSelector) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        self.manage_pending(now_s);
        self.manage_tunnels(now_s, selector, &mut actions);
        self.manage_transit(now_s);
        self.manage_pools(now_s, selector, &mut actions);
        actions
    }

    fn manage_pending(&mut self, now_s: u64) {
        let mut failures = 0;
        for pending in [&mut self.pending_inbound, &mut self.pending_outbound] {
            pending.retain(|msg_id, tunnel| {
                if tunnel.build_timed_out(now_s) {
                    debug!(msg_id, "pending build timed out");
                    failures += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.failures += failures;
    }

    fn manage_tunnels(
        &mut self,
        now_s: u64,
        selector: &dyn HopSelector,
        actions: &mut Vec<EngineAction>,
    ) {
        let mut recreations: Vec<(TunnelKind, Option<String>, usize)> = Vec::new();

        for (kind, map) in [
            (TunnelKind::Inbound, &mut self.inbound),
            (TunnelKind::Outbound, &mut self.outbound),
        ] {
            map.retain(|id, tunnel| {
                if tunnel.is_expired(now_s) {
                    debug!(tunnel = id, ?kind, "tunnel expired");
                    false
                } else {
                    true
                }
            });
            for tunnel in map.values_mut() {
                if tunnel.should_recreate(now_s) && tunnel.pool().is_some() {
                    tunnel.set_recreated();
                    recreations.push((
                        kind,
                        tunnel.pool().map(|p| p.to_string()),
                        tunnel.peers().len(),
                    ));
                }
                if tunnel.should_mark_expiring(now_s) {
                    tunnel.set_state(TunnelState::Expiring);
                }
                if kind == TunnelKind::Inbound {
                    tunnel.endpoint.expire(now_s);
                }
            }
        }

        for (kind, pool, num_hops) in recreations {
            actions.extend(self.launch_build(kind, pool, num_hops, selector));
        }

        if self.inbound.is_empty() && self.pending_inbound.is_empty() {
            info!("no inbound tunnels, creating zero-hop fallback");
            let tunnel = Tunnel::zero_hop_inbound(self.our_ident);
            self.inbound.insert(tunnel.tunnel_id(), tunnel);
        }
    }

    fn manage_transit(&mut self, now_s: u64) {
        self.transit.retain(|id, tunnel| {
            if tunnel.is_expired(now_s) {
                debug!(tunnel = id, "transit tunnel expired");
                false
            } else {
                true
            }
        });
        for tunnel in self.transit.values_mut() {
            tunnel.expire_reassembly(now_s);
        }
    }

    fn manage_pools(
        &mut self,
        now_s: u64,
        selector: &dyn HopSelector,
        actions: &mut Vec<EngineAction>,
    ) {
        let pool_names: Vec<String> = self.pools.keys().cloned().collect();
        for name in pool_names {
            // expire outstanding tests and fail their tunnels
            let failed = self
                .pools
                .get_mut(&name)
                .map(|p| p.expire_tests(now_s))
                .unwrap_or_default();
            for (out_id, in_id) in failed {
                for (map, id) in [(&mut self.outbound, out_id), (&mut self.inbound, in_id)] {
                    if let Some(tunnel) = map.get_mut(&id) {
                        if tunnel.state() == TunnelState::Established {
                            info!(tunnel = id, "tunnel failed its test");
                            tunnel.set_state(TunnelState::TestFailed);
                        }
                    }
                }
            }

            let Some(pool) = self.pools.get(&name) else { continue };
            if !pool.is_active() {
                continue;
            }
            let config = pool.config.clone();

            let live = |map: &HashMap<TunnelId, Tunnel>, pending: &HashMap<u32, Tunnel>| {
                map.values()
                    .filter(|t| t.pool() == Some(name.as_str()) && !t.is_expired(now_s))
                    .count()
                    + pending
                        .values()
                        .filter(|t| t.pool() == Some(name.as_str()))
                        .count()
            };
            let inbound_live = live(&self.inbound, &self.pending_inbound);
            let outbound_live = live(&self.outbound, &self.pending_outbound);

            for _ in inbound_live..config.num_inbound_tunnels {
                actions.extend(self.launch_build(
                    TunnelKind::Inbound,
                    Some(name.clone()),
                    config.num_inbound_hops,
                    selector,
                ));
            }
            for _ in outbound_live..config.num_outbound_tunnels {
                actions.extend(self.launch_build(
                    TunnelKind::Outbound,
                    Some(name.clone()),
                    config.num_outbound_hops,
                    selector,
                ));
            }

            actions.extend(self.test_pool_tunnels(&name, now_s));
        }
    }

    fn launch_build(
        &mut self,
        kind: TunnelKind,
        pool: Option<String>,
        num_hops: usize,
        selector: &dyn HopSelector,
    ) -> Vec<EngineAction> {
        let allowed = pool
            .as_deref()
            .and_then(|name| self.pools.get(name))
            .and_then(|p| p.config.explicit_peers.clone());
        let excluded = vec![self.our_ident];
        let Some(hops) = selector.select_hops(num_hops, &excluded, allowed.as_deref()) else {
            debug!(?kind, "no hops available for build");
            return Vec::new();
        };
        match kind {
            TunnelKind::Inbound => self.build_inbound(pool, hops),
            TunnelKind::Outbound => self.build_outbound(pool, hops),
        }
    }

    /// Send one round-trip probe per pool tick: out through an outbound
    /// member, back through an inbound member's gateway.
    fn test_pool_tunnels(&mut self, pool_name: &str, now_s: u64) -> Vec<EngineAction> {
        let Some(out_id) = self.select_outbound(Some(pool_name)) else {
            return Vec::new();
        };
        let Some(in_id) = self.select_inbound(Some(pool_name)) else {
            return Vec::new();
        };
        let Some(in_tunnel) = self.inbound.get(&in_id) else {
            return Vec::new();
        };
        let gateway = in_tunnel.first_hop();
        let gateway_tunnel = in_tunnel.gateway_tunnel_id();

        let test_id = OsRng.next_u32();
        let status = I2npMessage::new(
            MessageType::DeliveryStatus,
            DeliveryStatus::new(test_id).encode(),
            None,
        );
        if let Some(pool) = self.pools.get_mut(pool_name) {
            pool.record_test(test_id, out_id, in_id, now_s);
        }
        self.send_through(
            out_id,
            vec![TunnelMessageBlock {
                delivery: TunnelDelivery::Tunnel {
                    gateway,
                    tunnel_id: gateway_tunnel,
                },
                message: status,
            }],
        )
    }
}
