//! Tunnels we carry for other routers.

use tracing::{debug, warn};

use garlicroute_core::{timestamp_s, IdentHash, TunnelId};
use garlicroute_crypto::LayerCipher;
use garlicroute_i2np::{
    BuildRequestRecord, I2npMessage, MessagePool, MessageType, TunnelDataMessage,
    TunnelGatewayMessage,
};

use crate::engine::EngineAction;
use crate::gateway::{TunnelGatewayProcessor, TunnelMessageBlock};
use crate::endpoint::TunnelEndpoint;
use crate::tunnel::{TunnelDelivery, TUNNEL_EXPIRATION_S};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitRole {
    Gateway,
    Participant,
    Endpoint,
}

/// One hop's worth of someone else's tunnel.
pub struct TransitTunnel {
    tunnel_id: TunnelId,
    next_ident: IdentHash,
    next_tunnel_id: TunnelId,
    cipher: LayerCipher,
    role: TransitRole,
    created_s: u64,
    gateway: TunnelGatewayProcessor,
    endpoint: TunnelEndpoint,
    received: u64,
}

impl TransitTunnel {
    pub fn from_request(request: &BuildRequestRecord) -> Self {
        let role = if request.is_gateway {
            TransitRole::Gateway
        } else if request.is_endpoint {
            TransitRole::Endpoint
        } else {
            TransitRole::Participant
        };
        Self {
            tunnel_id: request.receive_tunnel,
            next_ident: request.next_ident,
            next_tunnel_id: request.next_tunnel,
            cipher: LayerCipher::new(request.layer_key, request.iv_key),
            role,
            created_s: timestamp_s(),
            gateway: TunnelGatewayProcessor::new(),
            endpoint: TunnelEndpoint::new(),
            received: 0,
        }
    }

    pub fn tunnel_id(&self) -> TunnelId {
        self.tunnel_id
    }

    pub fn role(&self) -> TransitRole {
        self.role
    }

    pub fn created_s(&self) -> u64 {
        self.created_s
    }

    pub fn expires_at_s(&self) -> u64 {
        self.created_s + TUNNEL_EXPIRATION_S
    }

    pub fn is_expired(&self, now_s: u64) -> bool {
        now_s > self.expires_at_s()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Process a TunnelData message addressed to this tunnel. The message's
    /// payload buffer is reused in place and returned to `pool` once
    /// forwarded or parsed.
    pub fn handle_tunnel_data(
        &mut self,
        message: TunnelDataMessage,
        our_ident: &IdentHash,
        pool: &MessagePool,
    ) -> Result<Vec<EngineAction>> {
        self.received += 1;
        match self.role {
            TransitRole::Gateway => {
                warn!(tunnel = self.tunnel_id, "tunnel data arrived at a transit gateway");
                pool.put(message.payload);
                Ok(Vec::new())
            }
            TransitRole::Participant => {
                let mut payload = message.payload;
                self.cipher.decrypt(&mut payload[..]);
                let forwarded = TunnelDataMessage {
                    tunnel_id: self.next_tunnel_id,
                    payload,
                };
                let bytes = forwarded.encode();
                pool.put(forwarded.payload);
                Ok(vec![EngineAction::Send {
                    to: self.next_ident,
                    message: I2npMessage::new(MessageType::TunnelData, bytes, None),
                }])
            }
            TransitRole::Endpoint => {
                let mut payload = message.payload;
                self.cipher.decrypt(&mut payload[..]);
                let delivered = self.endpoint.handle_payload(&payload)?;
                pool.put(payload);
                let mut actions = Vec::with_capacity(delivered.len());
                for (delivery, inner) in delivered {
                    match delivery {
                        TunnelDelivery::Local => actions.push(EngineAction::DeliverLocal(inner)),
                        TunnelDelivery::Router(hash) if hash == *our_ident => {
                            actions.push(EngineAction::DeliverLocal(inner))
                        }
                        TunnelDelivery::Router(hash) => {
                            actions.push(EngineAction::Send {
                                to: hash,
                                message: inner,
                            })
                        }
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
                Ok(actions)
            }
        }
    }

    /// Inject a message at a transit gateway: fragment, apply our layer,
    /// forward as TunnelData.
    pub fn handle_tunnel_gateway(&mut self, inner: I2npMessage, pool: &MessagePool) -> Vec<EngineAction> {
        if self.role != TransitRole::Gateway {
            debug!(tunnel = self.tunnel_id, "tunnel gateway message for non-gateway transit");
            return Vec::new();
        }
        self.received += 1;
        self.gateway.put(TunnelMessageBlock {
            delivery: TunnelDelivery::Local,
            message: inner,
        });
        self.flush_gateway(pool)
    }

    /// Emit any batched gateway payloads, recycling their buffers.
    pub fn flush_gateway(&mut self, pool: &MessagePool) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        for mut payload in self.gateway.flush(pool) {
            self.cipher.decrypt(&mut payload[..]);
            let message = TunnelDataMessage {
                tunnel_id: self.next_tunnel_id,
                payload,
            };
            let bytes = message.encode();
            pool.put(message.payload);
            actions.push(EngineAction::Send {
                to: self.next_ident,
                message: I2npMessage::new(MessageType::TunnelData, bytes, None),
            });
        }
        actions
    }

    pub fn expire_reassembly(&mut self, now_s: u64) {
        self.endpoint.expire(now_s);
    }
}
