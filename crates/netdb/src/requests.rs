//! Outstanding lookup requests and their completion callbacks.

use std::collections::{HashMap, HashSet};

use garlicroute_core::{IdentHash, LeaseSet, RouterInfo};
use garlicroute_i2np::LookupKind;

pub const LOOKUP_SOFT_TIMEOUT_S: u64 = 5;
pub const LOOKUP_HARD_TIMEOUT_S: u64 = 60;
pub const LOOKUP_MAX_ATTEMPTS: usize = 7;

#[derive(Debug, Clone)]
pub enum LookupResult {
    RouterInfo(RouterInfo),
    LeaseSet(LeaseSet),
}

pub type Completion = Box<dyn FnOnce(Option<LookupResult>) + Send>;

pub struct PendingRequest {
    pub key: IdentHash,
    pub kind: LookupKind,
    pub excluded: HashSet<IdentHash>,
    pub attempts: usize,
    pub created_s: u64,
    pub last_sent_s: u64,
    completions: Vec<Completion>,
}

impl PendingRequest {
    pub fn soft_expired(&self, now_s: u64) -> bool {
        now_s >= self.last_sent_s + LOOKUP_SOFT_TIMEOUT_S
    }

    pub fn hard_expired(&self, now_s: u64) -> bool {
        now_s >= self.created_s + LOOKUP_HARD_TIMEOUT_S
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= LOOKUP_MAX_ATTEMPTS
    }
}

/// One entry per outstanding key; every registered callback fires exactly
/// once, with the record or with None.
#[derive(Default)]
pub struct RequestTracker {
    requests: HashMap<IdentHash, PendingRequest>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`. Returns true when this created a new
    /// request (and a lookup should be sent).
    pub fn register(
        &mut self,
        key: IdentHash,
        kind: LookupKind,
        now_s: u64,
        completion: Option<Completion>,
    ) -> bool {
        if let Some(pending) = self.requests.get_mut(&key) {
            if let Some(completion) = completion {
                pending.completions.push(completion);
            }
            return false;
        }
        let mut completions = Vec::new();
        if let Some(completion) = completion {
            completions.push(completion);
        }
        self.requests.insert(
            key,
            PendingRequest {
                key,
                kind,
                excluded: HashSet::new(),
                attempts: 0,
                created_s: now_s,
                last_sent_s: now_s,
                completions,
            },
        );
        true
    }

    pub fn get(&self, key: &IdentHash) -> Option<&PendingRequest> {
        self.requests.get(key)
    }

    pub fn get_mut(&mut self, key: &IdentHash) -> Option<&mut PendingRequest> {
        self.requests.get_mut(key)
    }

    pub fn outstanding(&self) -> usize {
        self.requests.len()
    }

    /// The record arrived; fire callbacks with success.
    pub fn complete(&mut self, key: &IdentHash, result: LookupResult) -> bool {
        let Some(pending) = self.requests.remove(key) else {
            return false;
        };
        for completion in pending.completions {
            completion(Some(result.clone()));
        }
        true
    }

    /// Give up on `key`; fire callbacks with None.
    pub fn fail(&mut self, key: &IdentHash) -> bool {
        let Some(pending) = self.requests.remove(key) else {
            return false;
        };
        for completion in pending.completions {
            completion(None);
        }
        true
    }

    /// Keys whose requests passed the hard deadline or ran out of peers.
    pub fn expired_keys(&self, now_s: u64) -> Vec<IdentHash> {
        self.requests
            .values()
            .filter(|r| r.hard_expired(now_s) || r.exhausted())
            .map(|r| r.key)
            .collect()
    }

    /// Keys needing a resend after the soft timeout.
    pub fn stalled_keys(&self, now_s: u64) -> Vec<IdentHash> {
        self.requests
            .values()
            .filter(|r| !r.hard_expired(now_s) && !r.exhausted() && r.soft_expired(now_s))
            .map(|r| r.key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key(n: u8) -> IdentHash {
        IdentHash([n; 32])
    }

    #[test]
    fn test_single_completion_per_request() {
        let mut tracker = RequestTracker::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        assert!(tracker.register(
            key(1),
            LookupKind::RouterInfo,
            100,
            Some(Box::new(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            })),
        ));
        // second interest in the same key piggybacks
        let f = fired.clone();
        assert!(!tracker.register(
            key(1),
            LookupKind::RouterInfo,
            101,
            Some(Box::new(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            })),
        ));

        assert!(tracker.fail(&key(1)));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        // already gone
        assert!(!tracker.fail(&key(1)));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_timeout_classification() {
        let mut tracker = RequestTracker::new();
        tracker.register(key(1), LookupKind::LeaseSet, 100, None);

        assert!(tracker.stalled_keys(100 + LOOKUP_SOFT_TIMEOUT_S).contains(&key(1)));
        assert!(tracker.expired_keys(100 + LOOKUP_SOFT_TIMEOUT_S).is_empty());
        assert!(tracker
            .expired_keys(100 + LOOKUP_HARD_TIMEOUT_S)
            .contains(&key(1)));
    }

    #[test]
    fn test_exhausted_after_max_attempts() {
        let mut tracker = RequestTracker::new();
        tracker.register(key(1), LookupKind::RouterInfo, 100, None);
        tracker.get_mut(&key(1)).unwrap().attempts = LOOKUP_MAX_ATTEMPTS;
        assert!(tracker.expired_keys(101).contains(&key(1)));
    }
}
