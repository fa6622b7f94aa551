//! Gateway-side preprocessing: batching, fragmentation, padding, checksum.
//!
//! Accumulates I2NP messages and emits 1024-byte tunnel payloads
//! (IV || checksum || padding || 0x00 || fragments), each then layer-
//! encrypted once per hop by the caller.

use rand::{rngs::OsRng, RngCore};

use garlicroute_crypto::sha256;
use garlicroute_i2np::{I2npMessage, MessagePool, TunnelDataBuffer};

use crate::tunnel::TunnelDelivery;

pub(crate) const TUNNEL_DATA_PAYLOAD: usize = 1024;
/// 1008-byte block minus 4-byte checksum and the zero terminator.
pub(crate) const FRAGMENT_AREA: usize = 1003;

const FOLLOW_ON_HEADER: usize = 7;

const DELIVERY_LOCAL: u8 = 0;
const DELIVERY_TUNNEL: u8 = 1;
const DELIVERY_ROUTER: u8 = 2;
const FLAG_FOLLOW_ON: u8 = 0x80;
const FLAG_FRAGMENTED: u8 = 0x08;
const DELIVERY_SHIFT: u8 = 5;

/// One message queued at a gateway with its delivery.
pub struct TunnelMessageBlock {
    pub delivery: TunnelDelivery,
    pub message: I2npMessage,
}

fn first_header_len(delivery: &TunnelDelivery, fragmented: bool) -> usize {
    let delivery_len = match delivery {
        TunnelDelivery::Local => 0,
        TunnelDelivery::Router(_) => 32,
        TunnelDelivery::Tunnel { .. } => 36,
    };
    1 + delivery_len + if fragmented { 4 } else { 0 } + 2
}

fn write_first(
    out: &mut Vec<u8>,
    delivery: &TunnelDelivery,
    fragment_of: Option<u32>,
    data: &[u8],
) {
    let mut flag = match delivery {
        TunnelDelivery::Local => DELIVERY_LOCAL,
        TunnelDelivery::Tunnel { .. } => DELIVERY_TUNNEL,
        TunnelDelivery::Router(_) => DELIVERY_ROUTER,
    } << DELIVERY_SHIFT;
    if fragment_of.is_some() {
        flag |= FLAG_FRAGMENTED;
    }
    out.push(flag);
    match delivery {
        TunnelDelivery::Local => {}
        TunnelDelivery::Router(hash) => out.extend_from_slice(hash.as_bytes()),
        TunnelDelivery::Tunnel { gateway, tunnel_id } => {
            out.extend_from_slice(&tunnel_id.to_be_bytes());
            out.extend_from_slice(gateway.as_bytes());
        }
    }
    if let Some(msg_id) = fragment_of {
        out.extend_from_slice(&msg_id.to_be_bytes());
    }
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

fn write_follow_on(out: &mut Vec<u8>, msg_id: u32, fragment_number: u8, last: bool, data: &[u8]) {
    let flag = FLAG_FOLLOW_ON | (fragment_number << 1) | u8::from(last);
    out.push(flag);
    out.extend_from_slice(&msg_id.to_be_bytes());
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

/// Wrap a filled fragment area into an on-wire plaintext payload drawn
/// from the pool.
fn seal(fragments: &[u8], pool: &MessagePool) -> TunnelDataBuffer {
    debug_assert!(fragments.len() <= FRAGMENT_AREA);
    let mut payload = pool.get();
    OsRng.fill_bytes(&mut payload[..16]);

    let mut checked = Vec::with_capacity(fragments.len() + 16);
    checked.extend_from_slice(fragments);
    checked.extend_from_slice(&payload[..16]);
    let digest = sha256(&checked);

    let pad_len = FRAGMENT_AREA - fragments.len();
    payload[16..20].copy_from_slice(&digest[..4]);
    for byte in payload[20..20 + pad_len].iter_mut() {
        // padding must not contain the terminator
        loop {
            let mut b = [0u8; 1];
            OsRng.fill_bytes(&mut b);
            if b[0] != 0 {
                *byte = b[0];
                break;
            }
        }
    }
    payload[20 + pad_len] = 0;
    payload[21 + pad_len..].copy_from_slice(fragments);
    payload
}

/// Batches outbound messages into tunnel data payloads.
#[derive(Default)]
pub struct TunnelGatewayProcessor {
    queue: Vec<TunnelMessageBlock>,
}

impl TunnelGatewayProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, block: TunnelMessageBlock) {
        self.queue.push(block);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drain the queue into sealed 1024-byte plaintext payloads, their
    /// buffers drawn from `pool`.
    pub fn flush(&mut self, pool: &MessagePool) -> Vec<TunnelDataBuffer> {
        let mut payloads = Vec::new();
        let mut current: Vec<u8> = Vec::with_capacity(FRAGMENT_AREA);

        for block in self.queue.drain(..) {
            let data = block.message.to_bytes();
            let unfragmented_len = first_header_len(&block.delivery, false) + data.len();

            if unfragmented_len <= FRAGMENT_AREA {
                if current.len() + unfragmented_len > FRAGMENT_AREA {
                    payloads.push(seal(&current, pool));
                    current.clear();
                }
                write_first(&mut current, &block.delivery, None, &data);
                continue;
            }

            // fragment across payloads
            let header = first_header_len(&block.delivery, true);
            if current.len() + header + 1 > FRAGMENT_AREA {
                payloads.push(seal(&current, pool));
                current.clear();
            }
            let msg_id = block.message.msg_id;
            let take = (FRAGMENT_AREA - current.len() - header).min(data.len());
            write_first(&mut current, &block.delivery, Some(msg_id), &data[..take]);

            let mut offset = take;
            let mut fragment_number = 1u8;
            while offset < data.len() {
                payloads.push(seal(&current, pool));
                current.clear();

                let take = (FRAGMENT_AREA - FOLLOW_ON_HEADER).min(data.len() - offset);
                let last = offset + take == data.len();
                write_follow_on(
                    &mut current,
                    msg_id,
                    fragment_number,
                    last,
                    &data[offset..offset + take],
                );
                offset += take;
                fragment_number += 1;
            }
        }

        if !current.is_empty() {
            payloads.push(seal(&current, pool));
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::TunnelEndpoint;
    use garlicroute_core::IdentHash;
    use garlicroute_i2np::{DataMessage, MessageType};

    fn data_message(len: usize) -> I2npMessage {
        I2npMessage::new(
            MessageType::Data,
            DataMessage {
                payload: vec![0x42; len],
            }
            .encode(),
            None,
        )
    }

    fn roundtrip(blocks: Vec<TunnelMessageBlock>) -> Vec<(TunnelDelivery, I2npMessage)> {
        let pool = MessagePool::default();
        let mut gateway = TunnelGatewayProcessor::new();
        for block in blocks {
            gateway.put(block);
        }
        let mut endpoint = TunnelEndpoint::new();
        let mut out = Vec::new();
        for payload in gateway.flush(&pool) {
            out.extend(endpoint.handle_payload(&payload).unwrap());
            pool.put(payload);
        }
        out
    }

    #[test]
    fn test_small_message_single_payload() {
        let message = data_message(100);
        let delivered = roundtrip(vec![TunnelMessageBlock {
            delivery: TunnelDelivery::Local,
            message: message.clone(),
        }]);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, TunnelDelivery::Local);
        assert_eq!(delivered[0].1.payload, message.payload);
    }

    #[test]
    fn test_two_messages_share_a_payload() {
        let pool = MessagePool::default();
        let mut gateway = TunnelGatewayProcessor::new();
        gateway.put(TunnelMessageBlock {
            delivery: TunnelDelivery::Local,
            message: data_message(100),
        });
        gateway.put(TunnelMessageBlock {
            delivery: TunnelDelivery::Router(IdentHash([7; 32])),
            message: data_message(100),
        });
        let payloads = gateway.flush(&pool);
        assert_eq!(payloads.len(), 1);

        let mut endpoint = TunnelEndpoint::new();
        let delivered = endpoint.handle_payload(&payloads[0]).unwrap();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1].0, TunnelDelivery::Router(IdentHash([7; 32])));
    }

    #[test]
    fn test_large_message_fragments_and_reassembles() {
        let message = data_message(3000);
        let delivered = roundtrip(vec![TunnelMessageBlock {
            delivery: TunnelDelivery::Tunnel {
                gateway: IdentHash([9; 32]),
                tunnel_id: 33,
            },
            message: message.clone(),
        }]);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.payload, message.payload);
        assert_eq!(
            delivered[0].0,
            TunnelDelivery::Tunnel {
                gateway: IdentHash([9; 32]),
                tunnel_id: 33,
            }
        );
    }

    #[test]
    fn test_fragment_boundary_produces_exactly_two_payloads() {
        // craft a message whose unfragmented form exceeds one payload by one
        // byte: header (3) + i2np envelope (16) + data envelope (4) = 23
        let boundary_payload = FRAGMENT_AREA - 23;
        let message = data_message(boundary_payload + 1);

        let pool = MessagePool::default();
        let mut gateway = TunnelGatewayProcessor::new();
        gateway.put(TunnelMessageBlock {
            delivery: TunnelDelivery::Local,
            message: message.clone(),
        });
        let payloads = gateway.flush(&pool);
        assert_eq!(payloads.len(), 2);

        let mut endpoint = TunnelEndpoint::new();
        let mut delivered = Vec::new();
        for payload in &payloads {
            delivered.extend(endpoint.handle_payload(payload).unwrap());
        }
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.payload, message.payload);
    }

    #[test]
    fn test_exact_fit_stays_single_payload() {
        let boundary_payload = FRAGMENT_AREA - 23;
        let message = data_message(boundary_payload);
        let pool = MessagePool::default();
        let mut gateway = TunnelGatewayProcessor::new();
        gateway.put(TunnelMessageBlock {
            delivery: TunnelDelivery::Local,
            message,
        });
        assert_eq!(gateway.flush(&pool).len(), 1);
    }

    #[test]
    fn test_many_messages_batch_in_order() {
        let blocks: Vec<_> = (0..10u8)
            .map(|i| {
                let message = I2npMessage::new(
                    MessageType::Data,
                    DataMessage {
                        payload: vec![i; 200],
                    }
                    .encode(),
                    None,
                );
                TunnelMessageBlock {
                    delivery: TunnelDelivery::Local,
                    message,
                }
            })
            .collect();
        let delivered = roundtrip(blocks);
        assert_eq!(delivered.len(), 10);
        for (i, (_, message)) in delivered.iter().enumerate() {
            let data = DataMessage::decode(&message.payload).unwrap();
            assert_eq!(data.payload, vec![i as u8; 200]);
        }
    }
}
