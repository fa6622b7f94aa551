//! Per-destination outbound garlic sessions.

use bytes::BufMut;
use rand::RngCore;

use garlicroute_core::{timestamp_ms, IdentHash};
use garlicroute_crypto::{elgamal_encrypt, sha256, CbcAes};
use garlicroute_i2np::{DeliveryStatus, I2npMessage, MessageType};

use crate::clove::{CloveSet, DeliveryInstructions, GarlicClove};
use crate::Result;

/// Fresh tags delivered with each wrap.
pub const TAGS_PER_WRAP: usize = 40;

/// Keep at most this many unspent tags queued locally.
const MAX_OUTSTANDING_TAGS: usize = 200;

/// Outbound session state for one destination.
pub struct GarlicRoutingSession {
    destination: IdentHash,
    destination_key: [u8; 256],
    session_key: [u8; 32],
    /// Tags the receiver knows; each message spends the front one.
    tags: Vec<[u8; 32]>,
    first_msg_id: u32,
    acknowledged: bool,
}

impl GarlicRoutingSession {
    pub fn new(destination: IdentHash, destination_key: [u8; 256]) -> Self {
        let mut session_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut session_key);
        Self {
            destination,
            destination_key,
            session_key,
            tags: Vec::new(),
            first_msg_id: 0,
            acknowledged: false,
        }
    }

    pub fn destination(&self) -> IdentHash {
        self.destination
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn set_acknowledged(&mut self) {
        self.acknowledged = true;
    }

    pub fn first_msg_id(&self) -> u32 {
        self.first_msg_id
    }

    pub fn available_tags(&self) -> usize {
        self.tags.len()
    }

    /// Wrap cloves for this destination. Uses a session tag when one is
    /// available, otherwise the full ElGamal block. Until the session is
    /// acknowledged, an `ack_route` adds a delivery-status clove referencing
    /// the outer message id so the receiver's ack closes the loop.
    pub fn wrap(
        &mut self,
        mut cloves: Vec<GarlicClove>,
        ack_route: Option<DeliveryInstructions>,
    ) -> Result<I2npMessage> {
        let mut message = I2npMessage::new(MessageType::Garlic, Vec::new(), None);
        if self.first_msg_id == 0 {
            self.first_msg_id = message.msg_id;
        }

        if !self.acknowledged {
            if let Some(route) = ack_route {
                let status = I2npMessage::new(
                    MessageType::DeliveryStatus,
                    DeliveryStatus::new(message.msg_id).encode(),
                    None,
                );
                cloves.push(GarlicClove {
                    instructions: route,
                    message: status,
                    clove_id: rand::rngs::OsRng.next_u32(),
                    expiration: timestamp_ms() + 8_000,
                });
            }
        }
        let cloves = CloveSet::new(cloves, message.msg_id);

        let mut new_tags = Vec::with_capacity(TAGS_PER_WRAP);
        for _ in 0..TAGS_PER_WRAP {
            let mut tag = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut tag);
            new_tags.push(tag);
        }

        // AES block: tag count, new tags, payload size, payload digest, flag,
        // payload, padding to a whole number of blocks
        let payload = cloves.encode();
        let mut block = Vec::with_capacity(2 + 32 * new_tags.len() + 37 + payload.len() + 16);
        block.put_u16(new_tags.len() as u16);
        for tag in &new_tags {
            block.extend_from_slice(tag);
        }
        block.put_u32(payload.len() as u32);
        block.extend_from_slice(&sha256(&payload));
        block.put_u8(0);
        block.extend_from_slice(&payload);
        let rem = block.len() % 16;
        if rem != 0 {
            let mut padding = vec![0u8; 16 - rem];
            rand::rngs::OsRng.fill_bytes(&mut padding);
            block.extend_from_slice(&padding);
        }

        let mut wire = Vec::new();
        let iv: [u8; 16];
        if let Some(tag) = self.take_tag() {
            iv = sha256(&tag)[..16].try_into().expect("16 bytes");
            wire.put_u32((32 + block.len()) as u32);
            wire.extend_from_slice(&tag);
        } else {
            // establish (or re-establish) the session with an ElGamal block
            let mut pre_iv = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut pre_iv);
            iv = sha256(&pre_iv)[..16].try_into().expect("16 bytes");

            let mut elgamal_data = [0u8; 222];
            elgamal_data[..32].copy_from_slice(&self.session_key);
            elgamal_data[32..64].copy_from_slice(&pre_iv);
            rand::rngs::OsRng.fill_bytes(&mut elgamal_data[64..]);
            let encrypted = elgamal_encrypt(&self.destination_key, &elgamal_data, true)?;

            wire.put_u32((encrypted.len() + block.len()) as u32);
            wire.extend_from_slice(&encrypted);
        }

        CbcAes::new(self.session_key).encrypt(&iv, &mut block);
        wire.extend_from_slice(&block);

        self.remember_tags(new_tags);
        message.payload = wire;
        Ok(message)
    }

    fn take_tag(&mut self) -> Option<[u8; 32]> {
        if self.tags.is_empty() {
            None
        } else {
            Some(self.tags.remove(0))
        }
    }

    fn remember_tags(&mut self, new_tags: Vec<[u8; 32]>) {
        self.tags.extend(new_tags);
        if self.tags.len() > MAX_OUTSTANDING_TAGS {
            let excess = self.tags.len() - MAX_OUTSTANDING_TAGS;
            self.tags.drain(..excess);
        }
    }
}

/// Wrap cloves under a session key and tag the peer handed us (encrypted
/// database-lookup replies use this). No ElGamal block and no new tags; the
/// receiver already holds the key.
pub fn wrap_with_tag(
    session_key: &[u8; 32],
    tag: &[u8; 32],
    cloves: Vec<GarlicClove>,
) -> Result<I2npMessage> {
    let mut message = I2npMessage::new(MessageType::Garlic, Vec::new(), None);
    let payload = CloveSet::new(cloves, message.msg_id).encode();

    let mut block = Vec::with_capacity(39 + payload.len() + 16);
    block.put_u16(0);
    block.put_u32(payload.len() as u32);
    block.extend_from_slice(&sha256(&payload));
    block.put_u8(0);
    block.extend_from_slice(&payload);
    let rem = block.len() % 16;
    if rem != 0 {
        let mut padding = vec![0u8; 16 - rem];
        rand::rngs::OsRng.fill_bytes(&mut padding);
        block.extend_from_slice(&padding);
    }

    let iv: [u8; 16] = sha256(tag)[..16].try_into().expect("16 bytes");
    CbcAes::new(*session_key).encrypt(&iv, &mut block);

    let mut wire = Vec::with_capacity(4 + 32 + block.len());
    wire.put_u32((32 + block.len()) as u32);
    wire.extend_from_slice(tag);
    wire.extend_from_slice(&block);
    message.payload = wire;
    Ok(message)
}
