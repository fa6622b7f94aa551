//! The daily-rotated Kademlia coordinate.
//!
//! `SHA256(ident || YYYYMMDD)` over the current UTC date. At midnight UTC
//! every coordinate changes, shuffling the keyspace; cached keys must be
//! recomputed when the date string rolls over.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};

use garlicroute_core::IdentHash;
use garlicroute_crypto::sha256;

pub fn date_string(now_ms: u64) -> String {
    let time = Utc
        .timestamp_millis_opt(now_ms as i64)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().expect("epoch"));
    time.format("%Y%m%d").to_string()
}

pub fn routing_key(ident: &IdentHash, date: &str) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 + date.len());
    buf.extend_from_slice(ident.as_bytes());
    buf.extend_from_slice(date.as_bytes());
    sha256(&buf)
}

/// XOR metric between a routing key and a target key.
pub fn xor_distance(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

/// Routing keys for the current date, rebuilt when the date rolls over.
#[derive(Default)]
pub struct RoutingKeyCache {
    date: String,
    keys: HashMap<IdentHash, [u8; 32]>,
}

impl RoutingKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached key for `ident`, recomputing everything after midnight.
    pub fn key(&mut self, ident: &IdentHash, now_ms: u64) -> [u8; 32] {
        let today = date_string(now_ms);
        if today != self.date {
            self.date = today;
            self.keys.clear();
        }
        if let Some(key) = self.keys.get(ident) {
            return *key;
        }
        let key = routing_key(ident, &self.date);
        self.keys.insert(*ident, key);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_string_format() {
        // 2024-01-31 12:00:00 UTC
        assert_eq!(date_string(1_706_702_400_000), "20240131");
    }

    #[test]
    fn test_routing_key_changes_at_midnight() {
        let ident = IdentHash([7; 32]);
        let before = routing_key(&ident, "20240131");
        let after = routing_key(&ident, "20240201");
        assert_ne!(before, after);
    }

    #[test]
    fn test_cache_rolls_over() {
        let ident = IdentHash([7; 32]);
        let mut cache = RoutingKeyCache::new();
        // 2024-01-31 23:59:59 and 2024-02-01 00:00:01
        let before = cache.key(&ident, 1_706_745_599_000);
        let after = cache.key(&ident, 1_706_745_601_000);
        assert_ne!(before, after);
        assert_eq!(after, routing_key(&ident, "20240201"));
    }

    #[test]
    fn test_xor_distance_orders() {
        let a = [0u8; 32];
        let mut near = [0u8; 32];
        near[31] = 1;
        let mut far = [0u8; 32];
        far[0] = 1;
        assert!(xor_distance(&a, &near) < xor_distance(&a, &far));
    }
}
