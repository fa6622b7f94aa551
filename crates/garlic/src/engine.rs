//! Process-wide garlic state: outbound sessions per destination, the
//! tag-to-key table for inbound messages, and delivery-status matching.

use std::collections::HashMap;

use tracing::debug;

use garlicroute_core::wire::Reader;
use garlicroute_core::IdentHash;
use garlicroute_crypto::{elgamal_decrypt, sha256, CbcAes};
use garlicroute_i2np::I2npMessage;

use crate::clove::{CloveSet, DeliveryInstructions, GarlicClove};
use crate::session::GarlicRoutingSession;
use crate::{GarlicError, Result};

/// Upper bound on tags announced in one message.
const MAX_TAGS_PER_MESSAGE: usize = 128;

/// Hard cap on the inbound tag table; hitting it flushes everything and
/// peers fall back to ElGamal re-establishment.
const MAX_INBOUND_TAGS: usize = 32 * 1024;

#[derive(Default)]
pub struct GarlicEngine {
    /// Outbound sessions keyed by destination hash.
    sessions: HashMap<IdentHash, GarlicRoutingSession>,
    /// First-message ids awaiting a delivery-status ack.
    pending_acks: HashMap<u32, IdentHash>,
    /// Inbound tag table: tag -> session key.
    inbound_tags: HashMap<[u8; 32], [u8; 32]>,
}

impl GarlicEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `cloves` to `destination`, creating a session on first use.
    pub fn wrap(
        &mut self,
        destination: IdentHash,
        destination_key: &[u8; 256],
        cloves: Vec<GarlicClove>,
        ack_route: Option<DeliveryInstructions>,
    ) -> Result<I2npMessage> {
        let session = self
            .sessions
            .entry(destination)
            .or_insert_with(|| GarlicRoutingSession::new(destination, *destination_key));
        let message = session.wrap(cloves, ack_route)?;
        if !session.is_acknowledged() {
            self.pending_acks.insert(message.msg_id, destination);
        }
        Ok(message)
    }

    /// Match a delivery status against pending sessions. Returns true when it
    /// acknowledged one.
    pub fn handle_delivery_status(&mut self, msg_id: u32) -> bool {
        let Some(destination) = self.pending_acks.remove(&msg_id) else {
            return false;
        };
        if let Some(session) = self.sessions.get_mut(&destination) {
            debug!(%destination, msg_id, "garlic session acknowledged");
            session.set_acknowledged();
            true
        } else {
            false
        }
    }

    /// Unwrap an inbound garlic payload with our ElGamal secret key.
    pub fn unwrap(&mut self, payload: &[u8], secret_key: &[u8; 256]) -> Result<CloveSet> {
        let mut reader = Reader::new(payload);
        let length = reader.read_u32()? as usize;
        let content = reader.take(length)?;

        if content.len() >= 32 {
            let tag: [u8; 32] = content[..32].try_into().expect("32 bytes");
            // a consumed tag is retired whether or not the block decrypts
            if let Some(session_key) = self.inbound_tags.remove(&tag) {
                let iv: [u8; 16] = sha256(&tag)[..16].try_into().expect("16 bytes");
                return self.decrypt_block(session_key, iv, &content[32..]);
            }
        }

        if content.len() < 514 {
            return Err(GarlicError::Malformed("garlic shorter than elgamal block"));
        }
        let data = elgamal_decrypt(secret_key, &content[..514], true)?;
        let session_key: [u8; 32] = data[..32].try_into().expect("32 bytes");
        let pre_iv: [u8; 32] = data[32..64].try_into().expect("32 bytes");
        let iv: [u8; 16] = sha256(&pre_iv)[..16].try_into().expect("16 bytes");
        self.decrypt_block(session_key, iv, &content[514..])
    }

    fn decrypt_block(
        &mut self,
        session_key: [u8; 32],
        iv: [u8; 16],
        encrypted: &[u8],
    ) -> Result<CloveSet> {
        if encrypted.is_empty() || encrypted.len() % 16 != 0 {
            return Err(GarlicError::Malformed("aes block not whole blocks"));
        }
        let mut block = encrypted.to_vec();
        CbcAes::new(session_key).decrypt(&iv, &mut block);

        let mut reader = Reader::new(&block);
        let tag_count = reader.read_u16()? as usize;
        if tag_count > MAX_TAGS_PER_MESSAGE {
            return Err(GarlicError::Malformed("implausible tag count"));
        }
        let mut new_tags = Vec::with_capacity(tag_count);
        for _ in 0..tag_count {
            new_tags.push(reader.read_array::<32>()?);
        }
        let payload_size = reader.read_u32()? as usize;
        let digest: [u8; 32] = reader.read_array()?;
        let _flag = reader.read_u8()?;
        let payload = reader.take(payload_size)?;
        if sha256(payload) != digest {
            return Err(GarlicError::DigestMismatch);
        }

        if self.inbound_tags.len() + new_tags.len() > MAX_INBOUND_TAGS {
            debug!("inbound tag table full, flushing");
            self.inbound_tags.clear();
        }
        for tag in new_tags {
            self.inbound_tags.insert(tag, session_key);
        }
        CloveSet::decode(payload)
    }

    /// Register a tag we handed out ourselves (encrypted lookup replies come
    /// back under it).
    pub fn add_inbound_tag(&mut self, tag: [u8; 32], session_key: [u8; 32]) {
        self.inbound_tags.insert(tag, session_key);
    }

    pub fn known_inbound_tags(&self) -> usize {
        self.inbound_tags.len()
    }

    pub fn session_to(&self, destination: &IdentHash) -> Option<&GarlicRoutingSession> {
        self.sessions.get(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TAGS_PER_WRAP;
    use garlicroute_core::timestamp_ms;
    use garlicroute_crypto::ElGamalKeypair;
    use garlicroute_i2np::{DataMessage, MessageType};

    fn cloves(byte: u8) -> Vec<GarlicClove> {
        vec![GarlicClove {
            instructions: DeliveryInstructions::Local,
            message: I2npMessage::new(
                MessageType::Data,
                DataMessage {
                    payload: vec![byte; 20],
                }
                .encode(),
                None,
            ),
            clove_id: byte as u32,
            expiration: timestamp_ms() + 5_000,
        }]
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let keys = ElGamalKeypair::generate();
        let destination = IdentHash([1; 32]);
        let mut sender = GarlicEngine::new();
        let mut receiver = GarlicEngine::new();

        let message = sender
            .wrap(destination, keys.public_key(), cloves(7), None)
            .unwrap();
        let set = receiver.unwrap(&message.payload, keys.secret_key()).unwrap();

        assert_eq!(set.cloves.len(), 1);
        assert_eq!(set.msg_id, message.msg_id);
        assert_eq!(
            DataMessage::decode(&set.cloves[0].message.payload).unwrap().payload,
            vec![7; 20]
        );
        assert_eq!(receiver.known_inbound_tags(), TAGS_PER_WRAP);
    }

    #[test]
    fn test_second_message_uses_tag_and_retires_it() {
        let keys = ElGamalKeypair::generate();
        let destination = IdentHash([1; 32]);
        let mut sender = GarlicEngine::new();
        let mut receiver = GarlicEngine::new();

        let first = sender
            .wrap(destination, keys.public_key(), cloves(1), None)
            .unwrap();
        receiver.unwrap(&first.payload, keys.secret_key()).unwrap();

        let second = sender
            .wrap(destination, keys.public_key(), cloves(2), None)
            .unwrap();
        // wire form starts with a 32-byte tag instead of the 514-byte
        // ElGamal block; with identical cloves that is exactly the delta
        assert_eq!(first.payload.len() - second.payload.len(), 514 - 32);

        let tags_before = receiver.known_inbound_tags();
        let set = receiver.unwrap(&second.payload, keys.secret_key()).unwrap();
        assert_eq!(set.cloves.len(), 1);
        // spent one tag, learned forty more
        assert_eq!(
            receiver.known_inbound_tags(),
            tags_before - 1 + TAGS_PER_WRAP
        );
    }

    #[test]
    fn test_delivery_status_acknowledges_session() {
        let keys = ElGamalKeypair::generate();
        let destination = IdentHash([1; 32]);
        let mut sender = GarlicEngine::new();

        let message = sender
            .wrap(
                destination,
                keys.public_key(),
                cloves(1),
                Some(DeliveryInstructions::Router(IdentHash([9; 32]))),
            )
            .unwrap();

        assert!(!sender.session_to(&destination).unwrap().is_acknowledged());
        assert!(sender.handle_delivery_status(message.msg_id));
        assert!(sender.session_to(&destination).unwrap().is_acknowledged());
        // a second status for the same id no longer matches
        assert!(!sender.handle_delivery_status(message.msg_id));
    }

    #[test]
    fn test_wrap_with_shared_tag_roundtrip() {
        let keys = ElGamalKeypair::generate();
        let mut receiver = GarlicEngine::new();
        let session_key = [9u8; 32];
        let tag = [8u8; 32];
        receiver.add_inbound_tag(tag, session_key);

        let message = crate::session::wrap_with_tag(&session_key, &tag, cloves(5)).unwrap();
        let set = receiver.unwrap(&message.payload, keys.secret_key()).unwrap();
        assert_eq!(set.cloves.len(), 1);
        // the tag was single-use
        assert_eq!(receiver.known_inbound_tags(), 0);
    }

    #[test]
    fn test_unwrap_with_wrong_key_fails() {
        let keys = ElGamalKeypair::generate();
        let wrong = ElGamalKeypair::generate();
        let mut sender = GarlicEngine::new();
        let mut receiver = GarlicEngine::new();

        let message = sender
            .wrap(IdentHash([1; 32]), keys.public_key(), cloves(1), None)
            .unwrap();
        assert!(receiver.unwrap(&message.payload, wrong.secret_key()).is_err());
    }

    #[test]
    fn test_corrupted_payload_digest_rejected_and_tag_evicted() {
        let keys = ElGamalKeypair::generate();
        let destination = IdentHash([1; 32]);
        let mut sender = GarlicEngine::new();
        let mut receiver = GarlicEngine::new();

        let first = sender
            .wrap(destination, keys.public_key(), cloves(1), None)
            .unwrap();
        receiver.unwrap(&first.payload, keys.secret_key()).unwrap();

        let second = sender
            .wrap(destination, keys.public_key(), cloves(2), None)
            .unwrap();
        let mut corrupted = second.payload.clone();
        let len = corrupted.len();
        corrupted[len - 1] ^= 0xff;

        let tags_before = receiver.known_inbound_tags();
        assert!(receiver.unwrap(&corrupted, keys.secret_key()).is_err());
        // the consumed tag is gone even though decryption failed
        assert_eq!(receiver.known_inbound_tags(), tags_before - 1);
    }
}
