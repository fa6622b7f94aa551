//! Endpoint-side parsing and fragment reassembly.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use garlicroute_core::wire::Reader;
use garlicroute_core::{timestamp_s, IdentHash};
use garlicroute_crypto::sha256;
use garlicroute_i2np::I2npMessage;

use crate::gateway::TUNNEL_DATA_PAYLOAD;
use crate::tunnel::TunnelDelivery;
use crate::{Result, TunnelError};

const FLAG_FOLLOW_ON: u8 = 0x80;
const FLAG_FRAGMENTED: u8 = 0x08;
const DELIVERY_SHIFT: u8 = 5;

/// Fragments arriving ahead of their predecessors are buffered up to here.
const MAX_OUT_OF_ORDER: usize = 8;
/// Incomplete messages are abandoned after this long.
const INCOMPLETE_TIMEOUT_S: u64 = 30;

struct PartialMessage {
    delivery: Option<TunnelDelivery>,
    data: Vec<u8>,
    next_fragment: u8,
    out_of_order: BTreeMap<u8, (bool, Vec<u8>)>,
    created_s: u64,
}

impl PartialMessage {
    fn new() -> Self {
        Self {
            delivery: None,
            data: Vec::new(),
            next_fragment: 1,
            out_of_order: BTreeMap::new(),
            created_s: timestamp_s(),
        }
    }
}

/// Reassembles fragments per message id and yields complete inner messages.
#[derive(Default)]
pub struct TunnelEndpoint {
    incomplete: HashMap<u32, PartialMessage>,
}

impl TunnelEndpoint {
    pub fn new() -> Self {
        Self {
            incomplete: HashMap::new(),
        }
    }

    pub fn incomplete_count(&self) -> usize {
        self.incomplete.len()
    }

    /// Parse one decrypted 1024-byte payload.
    pub fn handle_payload(
        &mut self,
        payload: &[u8; TUNNEL_DATA_PAYLOAD],
    ) -> Result<Vec<(TunnelDelivery, I2npMessage)>> {
        let iv = &payload[..16];
        let body = &payload[16..];
        let checksum = &body[..4];

        let zero_pos = body[4..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(TunnelError::Malformed("no padding terminator"))?
            + 4;
        let fragments = &body[zero_pos + 1..];

        let mut checked = Vec::with_capacity(fragments.len() + 16);
        checked.extend_from_slice(fragments);
        checked.extend_from_slice(iv);
        if sha256(&checked)[..4] != *checksum {
            return Err(TunnelError::ChecksumMismatch);
        }

        let mut out = Vec::new();
        let mut reader = Reader::new(fragments);
        while reader.remaining() > 0 {
            let flag = reader.read_u8()?;
            if flag & FLAG_FOLLOW_ON != 0 {
                let fragment_number = (flag >> 1) & 0x3f;
                let last = flag & 0x01 != 0;
                let msg_id = reader.read_u32()?;
                let size = reader.read_u16()? as usize;
                let data = reader.take(size)?;
                self.follow_on(msg_id, fragment_number, last, data, &mut out);
            } else {
                let delivery = match (flag >> DELIVERY_SHIFT) & 0x03 {
                    0 => TunnelDelivery::Local,
                    1 => TunnelDelivery::Tunnel {
                        tunnel_id: reader.read_u32()?,
                        gateway: IdentHash(reader.read_array()?),
                    },
                    2 => TunnelDelivery::Router(IdentHash(reader.read_array()?)),
                    _ => return Err(TunnelError::Malformed("unknown delivery type")),
                };
                let fragmented = flag & FLAG_FRAGMENTED != 0;
                let msg_id = if fragmented { Some(reader.read_u32()?) } else { None };
                let size = reader.read_u16()? as usize;
                let data = reader.take(size)?;

                if let Some(msg_id) = msg_id {
                    let entry = self
                        .incomplete
                        .entry(msg_id)
                        .or_insert_with(PartialMessage::new);
                    entry.delivery = Some(delivery);
                    entry.data.extend_from_slice(data);
                    self.drain_ready(msg_id, &mut out);
                } else {
                    Self::deliver(delivery, data, &mut out);
                }
            }
        }
        Ok(out)
    }

    fn follow_on(
        &mut self,
        msg_id: u32,
        fragment_number: u8,
        last: bool,
        data: &[u8],
        out: &mut Vec<(TunnelDelivery, I2npMessage)>,
    ) {
        let mut finished = false;
        let mut overflowed = false;
        {
            let entry = self
                .incomplete
                .entry(msg_id)
                .or_insert_with(PartialMessage::new);
            if entry.delivery.is_some() && fragment_number == entry.next_fragment {
                entry.data.extend_from_slice(data);
                entry.next_fragment += 1;
                finished = last;
            } else if entry.out_of_order.len() >= MAX_OUT_OF_ORDER {
                overflowed = true;
            } else {
                entry
                    .out_of_order
                    .insert(fragment_number, (last, data.to_vec()));
            }
        }
        if overflowed {
            debug!(msg_id, "dropping reassembly, out-of-order window exceeded");
            self.incomplete.remove(&msg_id);
            return;
        }
        if finished {
            if let Some(partial) = self.incomplete.remove(&msg_id) {
                Self::complete(msg_id, partial, out);
            }
            return;
        }
        self.drain_ready(msg_id, out);
    }

    /// Consume buffered fragments that have become in-order.
    fn drain_ready(&mut self, msg_id: u32, out: &mut Vec<(TunnelDelivery, I2npMessage)>) {
        loop {
            let finished = {
                let Some(entry) = self.incomplete.get_mut(&msg_id) else {
                    return;
                };
                if entry.delivery.is_none() {
                    return;
                }
                let next = entry.next_fragment;
                match entry.out_of_order.remove(&next) {
                    Some((last, data)) => {
                        entry.data.extend_from_slice(&data);
                        entry.next_fragment += 1;
                        last
                    }
                    None => return,
                }
            };
            if finished {
                if let Some(partial) = self.incomplete.remove(&msg_id) {
                    Self::complete(msg_id, partial, out);
                }
                return;
            }
        }
    }

    fn complete(
        msg_id: u32,
        partial: PartialMessage,
        out: &mut Vec<(TunnelDelivery, I2npMessage)>,
    ) {
        let Some(delivery) = partial.delivery else {
            return;
        };
        match I2npMessage::decode(&partial.data) {
            Ok(message) => out.push((delivery, message)),
            Err(e) => debug!(msg_id, error = %e, "reassembled message failed to parse"),
        }
    }

    fn deliver(delivery: TunnelDelivery, data: &[u8], out: &mut Vec<(TunnelDelivery, I2npMessage)>) {
        match I2npMessage::decode(data) {
            Ok(message) => out.push((delivery, message)),
            Err(e) => debug!(error = %e, "inner tunnel message failed to parse"),
        }
    }

    /// Drop reassembly state older than the timeout.
    pub fn expire(&mut self, now_s: u64) {
        self.incomplete
            .retain(|_, partial| now_s < partial.created_s + INCOMPLETE_TIMEOUT_S);
    }
}
