//! The shared record store.
//!
//! Two maps behind independent locks, read from any worker; the floodfill
//! list is rebuilt on change, never mutated in place.

use std::collections::HashSet;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use tracing::debug;

use garlicroute_core::{timestamp_ms, IdentHash, LeaseSet, RouterInfo};

use crate::profiles::RouterProfile;
use crate::routing_key::{routing_key, xor_distance};
use crate::{NetDbError, Result};

pub struct NetDbStore {
    our_ident: IdentHash,
    netid: u32,
    router_infos: RwLock<HashMap<IdentHash, RouterInfo>>,
    lease_sets: RwLock<HashMap<IdentHash, LeaseSet>>,
    floodfills: RwLock<Vec<IdentHash>>,
    profiles: Mutex<HashMap<IdentHash, RouterProfile>>,
}

impl NetDbStore {
    pub fn new(our_ident: IdentHash) -> Self {
        Self::with_netid(our_ident, 2)
    }

    pub fn with_netid(our_ident: IdentHash, netid: u32) -> Self {
        Self {
            our_ident,
            netid,
            router_infos: RwLock::new(HashMap::new()),
            lease_sets: RwLock::new(HashMap::new()),
            floodfills: RwLock::new(Vec::new()),
            profiles: Mutex::new(HashMap::new()),
        }
    }

    pub fn our_ident(&self) -> IdentHash {
        self.our_ident
    }

    /// Verify and admit a RouterInfo. Returns true when the store changed.
    pub fn add_router_info(&self, bytes: &[u8]) -> Result<bool> {
        let info = RouterInfo::from_bytes(bytes)?;
        info.verify()
            .map_err(|_| NetDbError::Rejected("router info signature"))?;
        let now = timestamp_ms();
        if !info.is_fresh(now) {
            return Err(NetDbError::Rejected("router info too old"));
        }
        if info.published() > now + garlicroute_i2np::EXPIRATION_SLACK_MS {
            return Err(NetDbError::Rejected("router info from the future"));
        }
        if let Some(declared) = info.options().get("netId") {
            if declared.parse::<u32>().ok() != Some(self.netid) {
                return Err(NetDbError::Rejected("incompatible netid"));
            }
        }

        let hash = info.hash();
        let mut infos = self.router_infos.write().expect("router info lock");
        match infos.get(&hash) {
            Some(existing) if existing.published() >= info.published() => Ok(false),
            _ => {
                let is_floodfill = info.is_floodfill();
                infos.insert(hash, info);
                drop(infos);
                self.rebuild_floodfills_if(hash, is_floodfill);
                Ok(true)
            }
        }
    }

    fn rebuild_floodfills_if(&self, hash: IdentHash, is_floodfill: bool) {
        let mut floodfills = self.floodfills.write().expect("floodfill lock");
        let present = floodfills.contains(&hash);
        if is_floodfill && !present {
            let mut next = floodfills.clone();
            next.push(hash);
            *floodfills = next;
        } else if !is_floodfill && present {
            *floodfills = floodfills.iter().copied().filter(|h| *h != hash).collect();
        }
    }

    /// Verify and admit a LeaseSet. Returns true when the store changed.
    pub fn add_lease_set(&self, bytes: &[u8]) -> Result<bool> {
        let lease_set = LeaseSet::from_bytes(bytes)?;
        lease_set
            .verify()
            .map_err(|_| NetDbError::Rejected("lease set signature"))?;
        if !lease_set.is_ready(timestamp_ms()) {
            return Err(NetDbError::Rejected("lease set fully expired"));
        }

        let hash = lease_set.hash();
        let mut sets = self.lease_sets.write().expect("lease set lock");
        match sets.get(&hash) {
            Some(existing) if existing.expires() >= lease_set.expires() => Ok(false),
            _ => {
                sets.insert(hash, lease_set);
                Ok(true)
            }
        }
    }

    pub fn find_router_info(&self, hash: &IdentHash) -> Option<RouterInfo> {
        self.router_infos
            .read()
            .expect("router info lock")
            .get(hash)
            .cloned()
    }

    pub fn find_lease_set(&self, hash: &IdentHash) -> Option<LeaseSet> {
        self.lease_sets
            .read()
            .expect("lease set lock")
            .get(hash)
            .cloned()
    }

    pub fn router_count(&self) -> usize {
        self.router_infos.read().expect("router info lock").len()
    }

    pub fn floodfill_count(&self) -> usize {
        self.floodfills.read().expect("floodfill lock").len()
    }

    /// The `count` floodfills closest to `key` by XOR over today's routing
    /// keys, skipping unreachable peers, the requester itself, and `excluded`.
    pub fn closest_floodfills(
        &self,
        key: &IdentHash,
        count: usize,
        excluded: &HashSet<IdentHash>,
        date: &str,
    ) -> Vec<IdentHash> {
        let target = routing_key(key, date);
        let floodfills = self.floodfills.read().expect("floodfill lock").clone();
        let infos = self.router_infos.read().expect("router info lock");

        let mut candidates: Vec<(IdentHash, [u8; 32])> = floodfills
            .into_iter()
            .filter(|hash| *hash != self.our_ident)
            .filter(|hash| !excluded.contains(hash))
            .filter(|hash| {
                infos
                    .get(hash)
                    .map(|info| !info.is_unreachable())
                    .unwrap_or(false)
            })
            .map(|hash| {
                let distance = xor_distance(&routing_key(&hash, date), &target);
                (hash, distance)
            })
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1));
        candidates.truncate(count);
        candidates.into_iter().map(|(hash, _)| hash).collect()
    }

    /// Closest non-floodfill routers, for exploratory search replies.
    pub fn closest_routers(
        &self,
        key: &IdentHash,
        count: usize,
        excluded: &HashSet<IdentHash>,
        date: &str,
    ) -> Vec<IdentHash> {
        let target = routing_key(key, date);
        let infos = self.router_infos.read().expect("router info lock");
        let mut candidates: Vec<(IdentHash, [u8; 32])> = infos
            .iter()
            .filter(|(hash, info)| {
                **hash != self.our_ident && !excluded.contains(*hash) && !info.is_floodfill()
            })
            .map(|(hash, _)| {
                let distance = xor_distance(&routing_key(hash, date), &target);
                (*hash, distance)
            })
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1));
        candidates.truncate(count);
        candidates.into_iter().map(|(hash, _)| hash).collect()
    }

    /// A uniformly random known router other than us (and not excluded).
    pub fn random_router(&self, excluded: &HashSet<IdentHash>) -> Option<RouterInfo> {
        use rand::seq::IteratorRandom;
        let infos = self.router_infos.read().expect("router info lock");
        infos
            .values()
            .filter(|info| info.hash() != self.our_ident && !excluded.contains(&info.hash()))
            .choose(&mut rand::rngs::OsRng)
            .cloned()
    }

    /// All router infos, for persistence sweeps.
    pub fn all_router_infos(&self) -> Vec<RouterInfo> {
        self.router_infos
            .read()
            .expect("router info lock")
            .values()
            .cloned()
            .collect()
    }

    /// Drop stale RouterInfos and dead LeaseSets; rebuild the floodfill
    /// list.
    pub fn expire(&self, now_ms: u64) {
        let mut removed = 0;
        {
            let mut infos = self.router_infos.write().expect("router info lock");
            infos.retain(|_, info| {
                let keep = info.is_fresh(now_ms);
                if !keep {
                    removed += 1;
                }
                keep
            });
            let rebuilt: Vec<IdentHash> = infos
                .values()
                .filter(|info| info.is_floodfill())
                .map(|info| info.hash())
                .collect();
            *self.floodfills.write().expect("floodfill lock") = rebuilt;
        }
        {
            let mut sets = self.lease_sets.write().expect("lease set lock");
            sets.retain(|_, set| set.is_ready(now_ms));
        }
        if removed > 0 {
            debug!(removed, "expired router infos");
        }
    }

    // ---- peer profiles ----------------------------------------------------

    pub fn update_profile(&self, ident: &IdentHash, update: impl FnOnce(&mut RouterProfile)) {
        let mut profiles = self.profiles.lock().expect("profile lock");
        update(profiles.entry(*ident).or_default());
    }

    pub fn profile(&self, ident: &IdentHash) -> Option<RouterProfile> {
        self.profiles.lock().expect("profile lock").get(ident).cloned()
    }

    pub fn all_profiles(&self) -> Vec<(IdentHash, RouterProfile)> {
        self.profiles
            .lock()
            .expect("profile lock")
            .iter()
            .map(|(hash, profile)| (*hash, profile.clone()))
            .collect()
    }

    pub fn load_profiles(&self, profiles: Vec<(IdentHash, RouterProfile)>) {
        let mut map = self.profiles.lock().expect("profile lock");
        for (hash, profile) in profiles {
            map.insert(hash, profile);
        }
    }
}
