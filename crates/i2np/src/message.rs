//! The I2NP envelope.
//!
//! Header: type (1) | msg-id (4) | expiration ms (8) | size (2) | checksum
//! (1), all big-endian, followed by `size` payload bytes. The checksum is the
//! first byte of the payload's SHA-256.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BufMut;

use garlicroute_core::wire::Reader;
use garlicroute_core::timestamp_ms;
use garlicroute_crypto::sha256;

use crate::build::TunnelBuildMessage;
use crate::database::{DatabaseLookup, DatabaseSearchReply, DatabaseStore};
use crate::status::DeliveryStatus;
use crate::tunnel::{DataMessage, TunnelDataMessage, TunnelGatewayMessage};
use crate::{I2npError, Result};

pub const I2NP_HEADER_SIZE: usize = 16;

/// Messages are stamped to expire this long after creation.
pub const MESSAGE_EXPIRATION_MS: u64 = 5_000;

/// Received messages older than their expiration by more than this are
/// dropped; the window absorbs clock skew between routers.
pub const EXPIRATION_SLACK_MS: u64 = 30_000;

static NEXT_MSG_ID: AtomicU32 = AtomicU32::new(1);

fn next_msg_id() -> u32 {
    NEXT_MSG_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    DatabaseStore = 1,
    DatabaseLookup = 2,
    DatabaseSearchReply = 3,
    DeliveryStatus = 10,
    Garlic = 11,
    TunnelData = 18,
    TunnelGateway = 19,
    Data = 20,
    TunnelBuild = 21,
    TunnelBuildReply = 22,
    VariableTunnelBuild = 23,
    VariableTunnelBuildReply = 24,
}

impl MessageType {
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            1 => MessageType::DatabaseStore,
            2 => MessageType::DatabaseLookup,
            3 => MessageType::DatabaseSearchReply,
            10 => MessageType::DeliveryStatus,
            11 => MessageType::Garlic,
            18 => MessageType::TunnelData,
            19 => MessageType::TunnelGateway,
            20 => MessageType::Data,
            21 => MessageType::TunnelBuild,
            22 => MessageType::TunnelBuildReply,
            23 => MessageType::VariableTunnelBuild,
            24 => MessageType::VariableTunnelBuildReply,
            other => return Err(I2npError::UnknownType(other)),
        })
    }
}

/// An owned I2NP message. Moves between workers; never shared mutably.
#[derive(Debug, Clone)]
pub struct I2npMessage {
    pub msg_type: MessageType,
    pub msg_id: u32,
    pub expiration: u64,
    pub payload: Vec<u8>,
}

impl I2npMessage {
    /// Build a message around `payload`. A fresh msg-id is stamped unless
    /// `reply_msg_id` pins one (tunnel build replies must echo the id the
    /// requester chose).
    pub fn new(msg_type: MessageType, payload: Vec<u8>, reply_msg_id: Option<u32>) -> Self {
        Self {
            msg_type,
            msg_id: reply_msg_id.unwrap_or_else(next_msg_id),
            expiration: timestamp_ms() + MESSAGE_EXPIRATION_MS,
            payload,
        }
    }

    /// Append the encoded message to `out`. Callers that frame for a
    /// transport write their prefix into `out` first; nothing is copied
    /// twice.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(I2NP_HEADER_SIZE + self.payload.len());
        out.put_u8(self.msg_type as u8);
        out.put_u32(self.msg_id);
        out.put_u64(self.expiration);
        out.put_u16(self.payload.len() as u16);
        out.put_u8(sha256(&self.payload)[0]);
        out.extend_from_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(I2NP_HEADER_SIZE + self.payload.len());
        self.encode_into(&mut out);
        out
    }

    /// Parse and validate one message. Rejects unknown types, payloads the
    /// buffer cannot hold, stale expirations, and checksum mismatches.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let msg_type = MessageType::from_code(reader.read_u8()?)?;
        let msg_id = reader.read_u32()?;
        let expiration = reader.read_u64()?;
        let size = reader.read_u16()? as usize;
        let checksum = reader.read_u8()?;

        if reader.remaining() < size {
            return Err(I2npError::SizeMismatch {
                declared: size,
                actual: reader.remaining(),
            });
        }
        let payload = reader.take(size)?;

        let now = timestamp_ms();
        if expiration + EXPIRATION_SLACK_MS < now {
            return Err(I2npError::Expired(now - expiration));
        }
        if sha256(payload)[0] != checksum {
            return Err(I2npError::ChecksumMismatch);
        }
        Ok(Self {
            msg_type,
            msg_id,
            expiration,
            payload: payload.to_vec(),
        })
    }

    /// Decode the payload into its typed form.
    pub fn parse_payload(&self) -> Result<Payload> {
        Ok(match self.msg_type {
            MessageType::DatabaseStore => Payload::DatabaseStore(DatabaseStore::decode(&self.payload)?),
            MessageType::DatabaseLookup => {
                Payload::DatabaseLookup(DatabaseLookup::decode(&self.payload)?)
            }
            MessageType::DatabaseSearchReply => {
                Payload::DatabaseSearchReply(DatabaseSearchReply::decode(&self.payload)?)
            }
            MessageType::DeliveryStatus => {
                Payload::DeliveryStatus(DeliveryStatus::decode(&self.payload)?)
            }
            MessageType::Garlic => Payload::Garlic(self.payload.clone()),
            MessageType::TunnelData => {
                Payload::TunnelData(TunnelDataMessage::decode(&self.payload)?)
            }
            MessageType::TunnelGateway => {
                Payload::TunnelGateway(TunnelGatewayMessage::decode(&self.payload)?)
            }
            MessageType::Data => Payload::Data(DataMessage::decode(&self.payload)?),
            MessageType::TunnelBuild | MessageType::VariableTunnelBuild => {
                Payload::TunnelBuild(TunnelBuildMessage::decode(
                    &self.payload,
                    self.msg_type == MessageType::VariableTunnelBuild,
                )?)
            }
            MessageType::TunnelBuildReply | MessageType::VariableTunnelBuildReply => {
                Payload::TunnelBuildReply(TunnelBuildMessage::decode(
                    &self.payload,
                    self.msg_type == MessageType::VariableTunnelBuildReply,
                )?)
            }
        })
    }
}

/// Typed payloads of every message type the core handles.
#[derive(Debug, Clone)]
pub enum Payload {
    DatabaseStore(DatabaseStore),
    DatabaseLookup(DatabaseLookup),
    DatabaseSearchReply(DatabaseSearchReply),
    DeliveryStatus(DeliveryStatus),
    Garlic(Vec<u8>),
    TunnelData(TunnelDataMessage),
    TunnelGateway(TunnelGatewayMessage),
    Data(DataMessage),
    TunnelBuild(TunnelBuildMessage),
    TunnelBuildReply(TunnelBuildMessage),
}
