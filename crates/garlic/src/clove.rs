//! Cloves and their delivery instructions.

use bytes::BufMut;

use garlicroute_core::wire::Reader;
use garlicroute_core::{timestamp_ms, IdentHash, TunnelId};
use garlicroute_i2np::{I2npMessage, I2NP_HEADER_SIZE};

use crate::{GarlicError, Result};

const TYPE_LOCAL: u8 = 0;
const TYPE_DESTINATION: u8 = 1;
const TYPE_ROUTER: u8 = 2;
const TYPE_TUNNEL: u8 = 3;
const TYPE_SHIFT: u8 = 5;

/// Where a clove's inner message goes after unwrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryInstructions {
    Local,
    Destination(IdentHash),
    Router(IdentHash),
    Tunnel {
        gateway: IdentHash,
        tunnel_id: TunnelId,
    },
}

impl DeliveryInstructions {
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            DeliveryInstructions::Local => out.put_u8(TYPE_LOCAL << TYPE_SHIFT),
            DeliveryInstructions::Destination(hash) => {
                out.put_u8(TYPE_DESTINATION << TYPE_SHIFT);
                out.extend_from_slice(hash.as_bytes());
            }
            DeliveryInstructions::Router(hash) => {
                out.put_u8(TYPE_ROUTER << TYPE_SHIFT);
                out.extend_from_slice(hash.as_bytes());
            }
            DeliveryInstructions::Tunnel { gateway, tunnel_id } => {
                out.put_u8(TYPE_TUNNEL << TYPE_SHIFT);
                out.extend_from_slice(gateway.as_bytes());
                out.put_u32(*tunnel_id);
            }
        }
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let flag = reader.read_u8()?;
        Ok(match (flag >> TYPE_SHIFT) & 0x03 {
            TYPE_LOCAL => DeliveryInstructions::Local,
            TYPE_DESTINATION => DeliveryInstructions::Destination(IdentHash(reader.read_array()?)),
            TYPE_ROUTER => DeliveryInstructions::Router(IdentHash(reader.read_array()?)),
            _ => DeliveryInstructions::Tunnel {
                gateway: IdentHash(reader.read_array()?),
                tunnel_id: reader.read_u32()?,
            },
        })
    }
}

/// One inner message with its routing.
#[derive(Debug, Clone)]
pub struct GarlicClove {
    pub instructions: DeliveryInstructions,
    pub message: I2npMessage,
    pub clove_id: u32,
    pub expiration: u64,
}

/// The decrypted garlic payload: cloves plus the envelope trailer.
#[derive(Debug, Clone)]
pub struct CloveSet {
    pub cloves: Vec<GarlicClove>,
    pub msg_id: u32,
    pub expiration: u64,
}

impl CloveSet {
    pub fn new(cloves: Vec<GarlicClove>, msg_id: u32) -> Self {
        Self {
            cloves,
            msg_id,
            expiration: timestamp_ms() + 8_000,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u8(self.cloves.len() as u8);
        for clove in &self.cloves {
            clove.instructions.write(&mut out);
            clove.message.encode_into(&mut out);
            out.put_u32(clove.clove_id);
            out.put_u64(clove.expiration);
            out.extend_from_slice(&[0u8; 3]); // clove certificate
        }
        out.extend_from_slice(&[0u8; 3]); // message certificate
        out.put_u32(self.msg_id);
        out.put_u64(self.expiration);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        let count = reader.read_u8()? as usize;
        let mut cloves = Vec::with_capacity(count);
        for _ in 0..count {
            let instructions = DeliveryInstructions::read(&mut reader)?;
            // peek the inner header to size the embedded message
            let remaining = reader.remaining();
            if remaining < I2NP_HEADER_SIZE {
                return Err(GarlicError::Malformed("clove shorter than i2np header"));
            }
            let start = reader.position();
            let header = reader.take(I2NP_HEADER_SIZE)?;
            let size = u16::from_be_bytes([header[13], header[14]]) as usize;
            reader.take(size)?;
            let message_bytes = &buf[start..start + I2NP_HEADER_SIZE + size];
            let message = I2npMessage::decode(message_bytes)?;
            let clove_id = reader.read_u32()?;
            let expiration = reader.read_u64()?;
            reader.take(3)?;
            cloves.push(GarlicClove {
                instructions,
                message,
                clove_id,
                expiration,
            });
        }
        reader.take(3)?;
        let msg_id = reader.read_u32()?;
        let expiration = reader.read_u64()?;
        Ok(Self {
            cloves,
            msg_id,
            expiration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garlicroute_i2np::{DataMessage, MessageType};

    fn data_message(byte: u8) -> I2npMessage {
        I2npMessage::new(
            MessageType::Data,
            DataMessage {
                payload: vec![byte; 10],
            }
            .encode(),
            None,
        )
    }

    #[test]
    fn test_clove_set_roundtrip() {
        let set = CloveSet::new(
            vec![
                GarlicClove {
                    instructions: DeliveryInstructions::Local,
                    message: data_message(1),
                    clove_id: 11,
                    expiration: timestamp_ms() + 5_000,
                },
                GarlicClove {
                    instructions: DeliveryInstructions::Tunnel {
                        gateway: IdentHash([9; 32]),
                        tunnel_id: 77,
                    },
                    message: data_message(2),
                    clove_id: 12,
                    expiration: timestamp_ms() + 5_000,
                },
            ],
            4242,
        );

        let decoded = CloveSet::decode(&set.encode()).unwrap();
        assert_eq!(decoded.msg_id, 4242);
        assert_eq!(decoded.cloves.len(), 2);
        assert_eq!(decoded.cloves[0].instructions, DeliveryInstructions::Local);
        assert_eq!(decoded.cloves[0].message.payload, set.cloves[0].message.payload);
        assert_eq!(
            decoded.cloves[1].instructions,
            DeliveryInstructions::Tunnel {
                gateway: IdentHash([9; 32]),
                tunnel_id: 77,
            }
        );
    }

    #[test]
    fn test_destination_instructions_roundtrip() {
        let set = CloveSet::new(
            vec![GarlicClove {
                instructions: DeliveryInstructions::Destination(IdentHash([5; 32])),
                message: data_message(3),
                clove_id: 1,
                expiration: timestamp_ms() + 5_000,
            }],
            1,
        );
        let decoded = CloveSet::decode(&set.encode()).unwrap();
        assert_eq!(
            decoded.cloves[0].instructions,
            DeliveryInstructions::Destination(IdentHash([5; 32]))
        );
    }

    #[test]
    fn test_truncated_clove_set_rejected() {
        let set = CloveSet::new(
            vec![GarlicClove {
                instructions: DeliveryInstructions::Local,
                message: data_message(1),
                clove_id: 1,
                expiration: 0,
            }],
            1,
        );
        let bytes = set.encode();
        assert!(CloveSet::decode(&bytes[..bytes.len() / 2]).is_err());
    }
}
