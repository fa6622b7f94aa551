use bytes::BufMut;

use garlicroute_core::timestamp_ms;
use garlicroute_core::wire::Reader;

use crate::Result;

/// Acknowledges receipt of the message whose id it echoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub msg_id: u32,
    pub timestamp: u64,
}

impl DeliveryStatus {
    pub fn new(msg_id: u32) -> Self {
        Self {
            msg_id,
            timestamp: timestamp_ms(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.put_u32(self.msg_id);
        out.put_u64(self.timestamp);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        Ok(Self {
            msg_id: reader.read_u32()?,
            timestamp: reader.read_u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let status = DeliveryStatus::new(0xdeadbeef);
        let decoded = DeliveryStatus::decode(&status.encode()).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn test_truncated_rejected() {
        assert!(DeliveryStatus::decode(&[0, 1, 2]).is_err());
    }
}
