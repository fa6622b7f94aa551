//! TunnelData, TunnelGateway, and Data payloads.

use bytes::BufMut;

use garlicroute_core::wire::Reader;
use garlicroute_core::TunnelId;

use crate::pool::MessagePool;
use crate::{I2npError, Result};

/// The layer-encrypted portion: 16-byte IV plus 1008-byte block.
pub const TUNNEL_DATA_ENCRYPTED_SIZE: usize = 1024;
/// Full TunnelData payload including the tunnel id.
pub const TUNNEL_DATA_MSG_SIZE: usize = TUNNEL_DATA_ENCRYPTED_SIZE + 4;

/// Fixed-size tunnel data message. The payload is boxed so queued messages
/// stay small to move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelDataMessage {
    pub tunnel_id: TunnelId,
    pub payload: Box<[u8; TUNNEL_DATA_ENCRYPTED_SIZE]>,
}

impl TunnelDataMessage {
    pub fn new(tunnel_id: TunnelId, payload: [u8; TUNNEL_DATA_ENCRYPTED_SIZE]) -> Self {
        Self {
            tunnel_id,
            payload: Box::new(payload),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TUNNEL_DATA_MSG_SIZE);
        out.put_u32(self.tunnel_id);
        out.extend_from_slice(&self.payload[..]);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != TUNNEL_DATA_MSG_SIZE {
            return Err(I2npError::Malformed("tunnel data must be 1028 bytes"));
        }
        let mut reader = Reader::new(buf);
        let tunnel_id = reader.read_u32()?;
        let payload: [u8; TUNNEL_DATA_ENCRYPTED_SIZE] = reader.read_array()?;
        Ok(Self {
            tunnel_id,
            payload: Box::new(payload),
        })
    }

    /// Decode into a buffer drawn from `pool`; the forwarding fast path
    /// hands the buffer back through [`MessagePool::put`] once done.
    pub fn decode_pooled(buf: &[u8], pool: &MessagePool) -> Result<Self> {
        if buf.len() != TUNNEL_DATA_MSG_SIZE {
            return Err(I2npError::Malformed("tunnel data must be 1028 bytes"));
        }
        let tunnel_id = u32::from_be_bytes(buf[..4].try_into().expect("4 bytes"));
        let mut payload = pool.get();
        payload.copy_from_slice(&buf[4..]);
        Ok(Self { tunnel_id, payload })
    }
}

/// Injects a complete I2NP message at a tunnel gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelGatewayMessage {
    pub tunnel_id: TunnelId,
    pub payload: Vec<u8>,
}

impl TunnelGatewayMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.payload.len());
        out.put_u32(self.tunnel_id);
        out.put_u16(self.payload.len() as u16);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let tunnel_id = reader.read_u32()?;
        let len = reader.read_u16()? as usize;
        let payload = reader.take(len)?.to_vec();
        Ok(Self { tunnel_id, payload })
    }
}

/// Opaque application datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub payload: Vec<u8>,
}

impl DataMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.put_u32(self.payload.len() as u32);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let len = reader.read_u32()? as usize;
        let payload = reader.take(len)?.to_vec();
        Ok(Self { payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_data_roundtrip() {
        let mut payload = [0u8; TUNNEL_DATA_ENCRYPTED_SIZE];
        payload[0] = 0xaa;
        payload[1023] = 0xbb;
        let msg = TunnelDataMessage::new(1234, payload);
        let decoded = TunnelDataMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_tunnel_data_wrong_size_rejected() {
        assert!(TunnelDataMessage::decode(&[0u8; 1027]).is_err());
        assert!(TunnelDataMessage::decode(&[0u8; 1029]).is_err());
        let pool = MessagePool::default();
        assert!(TunnelDataMessage::decode_pooled(&[0u8; 1027], &pool).is_err());
    }

    #[test]
    fn test_pooled_decode_matches_plain() {
        let mut payload = [0u8; TUNNEL_DATA_ENCRYPTED_SIZE];
        payload[7] = 0x77;
        let msg = TunnelDataMessage::new(42, payload);
        let bytes = msg.encode();

        let pool = MessagePool::new(4);
        let decoded = TunnelDataMessage::decode_pooled(&bytes, &pool).unwrap();
        assert_eq!(decoded, msg);

        // the buffer cycles back for the next message
        pool.put(decoded.payload);
        assert_eq!(pool.pooled(), 1);
        let again = TunnelDataMessage::decode_pooled(&bytes, &pool).unwrap();
        assert_eq!(again, msg);
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn test_tunnel_gateway_roundtrip() {
        let msg = TunnelGatewayMessage {
            tunnel_id: 9,
            payload: vec![1, 2, 3, 4, 5],
        };
        let decoded = TunnelGatewayMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_data_roundtrip() {
        let msg = DataMessage {
            payload: b"datagram bytes".to_vec(),
        };
        let decoded = DataMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_gateway_length_beyond_buffer_rejected() {
        let msg = TunnelGatewayMessage {
            tunnel_id: 1,
            payload: vec![1, 2, 3],
        };
        let mut bytes = msg.encode();
        bytes[5] = 200;
        assert!(TunnelGatewayMessage::decode(&bytes).is_err());
    }
}
