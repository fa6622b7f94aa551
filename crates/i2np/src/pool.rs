//! Bounded buffer reuse for the tunnel-data fast path.

use std::sync::Mutex;

use crate::tunnel::TUNNEL_DATA_ENCRYPTED_SIZE;

/// A recycled tunnel-data buffer. Every producer overwrites all 1024 bytes,
/// so buffers are handed back out as-is.
pub type TunnelDataBuffer = Box<[u8; TUNNEL_DATA_ENCRYPTED_SIZE]>;

/// Recycles the fixed-size tunnel-data payload buffers so steady-state
/// forwarding does not allocate per message. Holds at most `max_buffers`;
/// excess returns are simply dropped.
pub struct MessagePool {
    buffers: Mutex<Vec<TunnelDataBuffer>>,
    max_buffers: usize,
}

impl MessagePool {
    pub fn new(max_buffers: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_buffers)),
            max_buffers,
        }
    }

    pub fn get(&self) -> TunnelDataBuffer {
        let mut buffers = self.buffers.lock().expect("pool lock");
        buffers
            .pop()
            .unwrap_or_else(|| Box::new([0u8; TUNNEL_DATA_ENCRYPTED_SIZE]))
    }

    pub fn put(&self, buffer: TunnelDataBuffer) {
        let mut buffers = self.buffers.lock().expect("pool lock");
        if buffers.len() < self.max_buffers {
            buffers.push(buffer);
        }
    }

    pub fn pooled(&self) -> usize {
        self.buffers.lock().expect("pool lock").len()
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuses_buffers() {
        let pool = MessagePool::new(2);
        let mut buffer = pool.get();
        buffer[0] = 7;
        let ptr = buffer.as_ptr();
        pool.put(buffer);
        assert_eq!(pool.pooled(), 1);

        let buffer = pool.get();
        assert_eq!(buffer.as_ptr(), ptr);
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn test_bounded() {
        let pool = MessagePool::new(1);
        pool.put(Box::new([0u8; TUNNEL_DATA_ENCRYPTED_SIZE]));
        pool.put(Box::new([0u8; TUNNEL_DATA_ENCRYPTED_SIZE]));
        assert_eq!(pool.pooled(), 1);
    }
}
