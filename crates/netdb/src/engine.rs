//! The NetDB worker: serves queries, drives lookups, publishes, floods,
//! explores, persists. Synchronous message-in / actions-out like the tunnel
//! engine; the router's async worker executes the actions.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use tracing::{debug, info, warn};

use garlicroute_core::{timestamp_ms, timestamp_s, IdentHash, TunnelId};
use garlicroute_garlic::{wrap_with_tag, DeliveryInstructions, GarlicClove};
use garlicroute_i2np::{
    DatabaseLookup, DatabaseSearchReply, DatabaseStore, DeliveryStatus, I2npMessage, LookupKind,
    MessageType, Payload, StoredData, TunnelGatewayMessage,
};

use crate::persist;
use crate::requests::{Completion, LookupResult, RequestTracker};
use crate::routing_key::date_string;
use crate::store::NetDbStore;

/// Republish the local RouterInfo this often.
pub const PUBLISH_INTERVAL_S: u64 = 40 * 60;
/// Exploratory probing cadence.
pub const EXPLORE_INTERVAL_S: u64 = 30;

const SAVE_INTERVAL_S: u64 = 60;
const PUBLISH_CONFIRM_TIMEOUT_S: u64 = 10;
const FLOOD_COUNT: usize = 3;
const SEARCH_REPLY_PEERS: usize = 3;
const MAX_SUGGESTED_FETCHES: usize = 3;

/// What the NetDB wants done outside itself.
#[derive(Debug)]
pub enum NetDbAction {
    /// Direct transport send.
    Send { to: IdentHash, message: I2npMessage },
    /// Prefer an exploratory outbound tunnel; fall back to direct.
    SendViaTunnel { to: IdentHash, message: I2npMessage },
}

struct PublishState {
    token: u32,
    targets: Vec<IdentHash>,
    excluded: HashSet<IdentHash>,
    sent_s: u64,
    confirmed: bool,
    verified: bool,
}

pub struct NetDbEngine {
    store: Arc<NetDbStore>,
    requests: RequestTracker,
    is_floodfill: bool,
    data_dir: PathBuf,
    /// Exploratory inbound gateway and tunnel id lookups name as their
    /// reply path.
    reply_path: Option<(IdentHash, TunnelId)>,
    local_router_info: Option<Vec<u8>>,
    publish: Option<PublishState>,
    /// Outstanding LeaseSet publishes: token -> (key, bytes, excluded, sent).
    lease_publishes: HashMap<u32, (IdentHash, Vec<u8>, HashSet<IdentHash>, u64)>,
    last_publish_s: u64,
    last_explore_s: u64,
    last_save_s: u64,
}

impl NetDbEngine {
    pub fn new(store: Arc<NetDbStore>, data_dir: PathBuf, is_floodfill: bool) -> Self {
        Self {
            store,
            requests: RequestTracker::new(),
            is_floodfill,
            data_dir,
            reply_path: None,
            local_router_info: None,
            publish: None,
            lease_publishes: HashMap::new(),
            last_publish_s: 0,
            last_explore_s: 0,
            last_save_s: timestamp_s(),
        }
    }

    pub fn store(&self) -> &Arc<NetDbStore> {
        &self.store
    }

    pub fn set_reply_path(&mut self, path: Option<(IdentHash, TunnelId)>) {
        self.reply_path = path;
    }

    /// The router context pushes its freshly signed RouterInfo here; the
    /// next manage tick republishes.
    pub fn set_local_router_info(&mut self, bytes: Vec<u8>) {
        self.local_router_info = Some(bytes);
        self.last_publish_s = 0;
        self.publish = None;
    }

    pub fn outstanding_requests(&self) -> usize {
        self.requests.outstanding()
    }

    // ---- outbound lookups -------------------------------------------------

    /// Request a record, firing `completion` exactly once. Served straight
    /// from the store when the record is already held.
    pub fn request(
        &mut self,
        key: IdentHash,
        kind: LookupKind,
        completion: Option<Completion>,
    ) -> Vec<NetDbAction> {
        let local = match kind {
            LookupKind::LeaseSet => self
                .store
                .find_lease_set(&key)
                .map(LookupResult::LeaseSet),
            LookupKind::RouterInfo | LookupKind::Any => self
                .store
                .find_router_info(&key)
                .map(LookupResult::RouterInfo),
            LookupKind::Exploration => None,
        };
        if let Some(result) = local {
            if let Some(completion) = completion {
                completion(Some(result));
            }
            return Vec::new();
        }

        let now_s = timestamp_s();
        if !self.requests.register(key, kind, now_s, completion) {
            return Vec::new();
        }
        self.send_lookup(&key)
    }

    /// Compose and address a lookup for `key` to the closest unqueried
    /// floodfill.
    fn send_lookup(&mut self, key: &IdentHash) -> Vec<NetDbAction> {
        let date = date_string(timestamp_ms());
        let Some(pending) = self.requests.get_mut(key) else {
            return Vec::new();
        };
        let target = {
            let closest =
                self.store
                    .closest_floodfills(key, 1, &pending.excluded, &date);
            match closest.first() {
                Some(target) => *target,
                None => {
                    debug!(%key, "no floodfill left to ask");
                    self.requests.fail(key);
                    return Vec::new();
                }
            }
        };

        pending.excluded.insert(target);
        pending.attempts += 1;
        pending.last_sent_s = timestamp_s();

        let (from, reply_tunnel) = match self.reply_path {
            Some((gateway, tunnel_id)) => (gateway, tunnel_id),
            None => (self.store.our_ident(), 0),
        };
        let mut lookup = DatabaseLookup::new(*key, from, pending.kind);
        lookup.reply_tunnel = reply_tunnel;
        lookup.excluded = pending.excluded.iter().copied().collect();

        debug!(%key, %target, attempt = pending.attempts, "sending lookup");
        vec![NetDbAction::SendViaTunnel {
            to: target,
            message: I2npMessage::new(MessageType::DatabaseLookup, lookup.encode(), None),
        }]
    }

    // ---- inbound messages -------------------------------------------------

    pub fn handle_message(&mut self, message: I2npMessage) -> Vec<NetDbAction> {
        let payload = match message.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "malformed netdb message");
                return Vec::new();
            }
        };
        match payload {
            Payload::DatabaseStore(store) => self.handle_store(store),
            Payload::DatabaseLookup(lookup) => self.handle_lookup(lookup),
            Payload::DatabaseSearchReply(reply) => self.handle_search_reply(reply),
            Payload::DeliveryStatus(status) => {
                self.handle_delivery_status(status.msg_id);
                Vec::new()
            }
            other => {
                debug!(payload = ?other, "unexpected payload at netdb");
                Vec::new()
            }
        }
    }

    fn handle_store(&mut self, store_msg: DatabaseStore) -> Vec<NetDbAction> {
        let mut actions = Vec::new();
        let updated = match &store_msg.data {
            StoredData::RouterInfo(bytes) => self.store.add_router_info(bytes),
            StoredData::LeaseSet(bytes) => self.store.add_lease_set(bytes),
        };
        let updated = match updated {
            Ok(updated) => updated,
            Err(e) => {
                debug!(key = %store_msg.key, error = %e, "database store rejected");
                return actions;
            }
        };

        // fire any lookup waiting on this key
        match &store_msg.data {
            StoredData::RouterInfo(_) => {
                if let Some(info) = self.store.find_router_info(&store_msg.key) {
                    self.requests
                        .complete(&store_msg.key, LookupResult::RouterInfo(info));
                }
            }
            StoredData::LeaseSet(_) => {
                if let Some(set) = self.store.find_lease_set(&store_msg.key) {
                    self.requests
                        .complete(&store_msg.key, LookupResult::LeaseSet(set));
                }
            }
        }

        if store_msg.reply_token != 0 {
            let status = I2npMessage::new(
                MessageType::DeliveryStatus,
                DeliveryStatus::new(store_msg.reply_token).encode(),
                None,
            );
            if store_msg.reply_tunnel != 0 {
                let wrapped = TunnelGatewayMessage {
                    tunnel_id: store_msg.reply_tunnel,
                    payload: status.to_bytes(),
                };
                actions.push(NetDbAction::Send {
                    to: store_msg.reply_gateway,
                    message: I2npMessage::new(MessageType::TunnelGateway, wrapped.encode(), None),
                });
            } else {
                actions.push(NetDbAction::Send {
                    to: store_msg.reply_gateway,
                    message: status,
                });
            }
        }

        // a floodfill passes new records to the neighborhood, ack stripped
        if self.is_floodfill && updated {
            let flood = store_msg.clone().without_reply();
            if let Ok(flood_payload) = flood.encode() {
                let date = date_string(timestamp_ms());
                for peer in
                    self.store
                        .closest_floodfills(&store_msg.key, FLOOD_COUNT, &HashSet::new(), &date)
                {
                    actions.push(NetDbAction::Send {
                        to: peer,
                        message: I2npMessage::new(
                            MessageType::DatabaseStore,
                            flood_payload.clone(),
                            None,
                        ),
                    });
                }
            }
        }
        actions
    }

    fn handle_lookup(&mut self, lookup: DatabaseLookup) -> Vec<NetDbAction> {
        let mut excluded: HashSet<IdentHash> = lookup.excluded.iter().copied().collect();
        excluded.insert(lookup.from);

        let found: Option<DatabaseStore> = match lookup.kind {
            LookupKind::LeaseSet => self
                .store
                .find_lease_set(&lookup.key)
                .and_then(|set| set.to_bytes().ok())
                .map(|bytes| DatabaseStore::new(lookup.key, StoredData::LeaseSet(bytes))),
            LookupKind::Exploration => None,
            _ => self
                .store
                .find_router_info(&lookup.key)
                .and_then(|info| info.to_bytes().ok())
                .map(|bytes| DatabaseStore::new(lookup.key, StoredData::RouterInfo(bytes))),
        };

        let reply = match found {
            Some(store_reply) => {
                debug!(key = %lookup.key, "serving lookup from store");
                let Ok(payload) = store_reply.encode() else {
                    return Vec::new();
                };
                let message = I2npMessage::new(MessageType::DatabaseStore, payload, None);
                match lookup.reply_key {
                    Some((session_key, tag)) => {
                        let clove = GarlicClove {
                            instructions: DeliveryInstructions::Local,
                            message,
                            clove_id: OsRng.next_u32(),
                            expiration: timestamp_ms() + 8_000,
                        };
                        match wrap_with_tag(&session_key, &tag, vec![clove]) {
                            Ok(wrapped) => wrapped,
                            Err(e) => {
                                debug!(error = %e, "encrypted lookup reply failed");
                                return Vec::new();
                            }
                        }
                    }
                    None => message,
                }
            }
            None => {
                let date = date_string(timestamp_ms());
                let peers = if lookup.kind == LookupKind::Exploration {
                    self.store
                        .closest_routers(&lookup.key, SEARCH_REPLY_PEERS, &excluded, &date)
                } else {
                    self.store
                        .closest_floodfills(&lookup.key, SEARCH_REPLY_PEERS, &excluded, &date)
                };
                debug!(key = %lookup.key, peers = peers.len(), "lookup missed, redirecting");
                let reply = DatabaseSearchReply {
                    key: lookup.key,
                    peers,
                    from: self.store.our_ident(),
                };
                I2npMessage::new(MessageType::DatabaseSearchReply, reply.encode(), None)
            }
        };

        if lookup.reply_tunnel != 0 {
            let wrapped = TunnelGatewayMessage {
                tunnel_id: lookup.reply_tunnel,
                payload: reply.to_bytes(),
            };
            vec![NetDbAction::Send {
                to: lookup.from,
                message: I2npMessage::new(MessageType::TunnelGateway, wrapped.encode(), None),
            }]
        } else {
            vec![NetDbAction::Send {
                to: lookup.from,
                message: reply,
            }]
        }
    }

    fn handle_search_reply(&mut self, reply: DatabaseSearchReply) -> Vec<NetDbAction> {
        let mut actions = Vec::new();

        if let Some(pending) = self.requests.get_mut(&reply.key) {
            pending.excluded.insert(reply.from);
            if pending.exhausted() {
                debug!(key = %reply.key, "lookup exhausted its attempts");
                self.requests.fail(&reply.key);
            } else {
                // introduce ourselves to the next floodfill, then re-ask
                if let Some(local) = self.local_router_info.clone() {
                    let date = date_string(timestamp_ms());
                    let excluded = self
                        .requests
                        .get(&reply.key)
                        .map(|p| p.excluded.clone())
                        .unwrap_or_default();
                    if let Some(next) = self
                        .store
                        .closest_floodfills(&reply.key, 1, &excluded, &date)
                        .first()
                    {
                        let store_msg = DatabaseStore::new(
                            self.store.our_ident(),
                            StoredData::RouterInfo(local),
                        );
                        if let Ok(payload) = store_msg.encode() {
                            actions.push(NetDbAction::Send {
                                to: *next,
                                message: I2npMessage::new(
                                    MessageType::DatabaseStore,
                                    payload,
                                    None,
                                ),
                            });
                        }
                    }
                }
                actions.extend(self.send_lookup(&reply.key));
            }
        }

        // chase suggested peers we have never heard of
        let mut fetched = 0;
        for peer in &reply.peers {
            if fetched >= MAX_SUGGESTED_FETCHES {
                break;
            }
            if self.store.find_router_info(peer).is_none() && self.requests.get(peer).is_none() {
                actions.extend(self.request(*peer, LookupKind::RouterInfo, None));
                fetched += 1;
            }
        }
        actions
    }

    /// Match delivery statuses against outstanding publish tokens.
    pub fn handle_delivery_status(&mut self, msg_id: u32) -> bool {
        if let Some(publish) = self.publish.as_mut() {
            if publish.token == msg_id && !publish.confirmed {
                info!("router info publish confirmed");
                publish.confirmed = true;
                return true;
            }
        }
        if let Some((key, _, _, _)) = self.lease_publishes.remove(&msg_id) {
            debug!(%key, "lease set publish confirmed");
            return true;
        }
        false
    }

    /// Publish a local destination's LeaseSet to the closest floodfill,
    /// confirmed (or retried) via a reply token like the RouterInfo publish.
    pub fn publish_lease_set(&mut self, key: IdentHash, bytes: Vec<u8>) -> Vec<NetDbAction> {
        self.send_lease_publish(key, bytes, HashSet::new(), timestamp_s())
    }

    fn send_lease_publish(
        &mut self,
        key: IdentHash,
        bytes: Vec<u8>,
        excluded: HashSet<IdentHash>,
        now_s: u64,
    ) -> Vec<NetDbAction> {
        let date = date_string(timestamp_ms());
        let Some(target) = self
            .store
            .closest_floodfills(&key, 1, &excluded, &date)
            .first()
            .copied()
        else {
            debug!(%key, "no floodfill for lease set publish");
            return Vec::new();
        };
        let token = loop {
            let token = OsRng.next_u32();
            if token != 0 && !self.lease_publishes.contains_key(&token) {
                break token;
            }
        };
        let store_msg = DatabaseStore::new(key, StoredData::LeaseSet(bytes.clone()))
            .with_reply(token, 0, self.store.our_ident());
        let Ok(payload) = store_msg.encode() else {
            return Vec::new();
        };
        let mut excluded = excluded;
        excluded.insert(target);
        self.lease_publishes
            .insert(token, (key, bytes, excluded, now_s));
        debug!(%key, %target, "publishing lease set");
        vec![NetDbAction::Send {
            to: target,
            message: I2npMessage::new(MessageType::DatabaseStore, payload, None),
        }]
    }

    // ---- periodic work ----------------------------------------------------

    pub fn manage(&mut self, now_s: u64) -> Vec<NetDbAction> {
        let mut actions = Vec::new();
        self.manage_requests(now_s, &mut actions);
        self.manage_publish(now_s, &mut actions);
        self.manage_lease_publishes(now_s, &mut actions);
        self.manage_explore(now_s, &mut actions);
        self.manage_save(now_s);
        actions
    }

    fn manage_lease_publishes(&mut self, now_s: u64, actions: &mut Vec<NetDbAction>) {
        let stalled: Vec<u32> = self
            .lease_publishes
            .iter()
            .filter(|(_, (_, _, _, sent))| now_s > *sent + PUBLISH_CONFIRM_TIMEOUT_S)
            .map(|(token, _)| *token)
            .collect();
        for token in stalled {
            if let Some((key, bytes, excluded, _)) = self.lease_publishes.remove(&token) {
                actions.extend(self.send_lease_publish(key, bytes, excluded, now_s));
            }
        }
    }

    /// Persist immediately, regardless of the save interval (shutdown path).
    pub fn save_now(&mut self) {
        self.last_save_s = 0;
        self.manage_save(timestamp_s());
    }

    fn manage_requests(&mut self, now_s: u64, actions: &mut Vec<NetDbAction>) {
        for key in self.requests.expired_keys(now_s) {
            debug!(%key, "lookup timed out");
            self.requests.fail(&key);
        }
        for key in self.requests.stalled_keys(now_s) {
            actions.extend(self.send_lookup(&key));
        }
    }

    fn manage_publish(&mut self, now_s: u64, actions: &mut Vec<NetDbAction>) {
        let Some(local) = self.local_router_info.clone() else {
            return;
        };

        // decide this tick's move without holding a borrow on the state
        let mut retry_excluded = None;
        let mut verify_exclude = None;
        match self.publish.as_ref() {
            Some(p) if p.confirmed && !p.verified => verify_exclude = Some(p.targets.clone()),
            Some(p) if !p.confirmed && now_s > p.sent_s + PUBLISH_CONFIRM_TIMEOUT_S => {
                retry_excluded = Some(p.excluded.clone());
            }
            None if now_s > self.last_publish_s + PUBLISH_INTERVAL_S => {
                retry_excluded = Some(HashSet::new())
            }
            _ => {}
        }

        // confirmed: ask a different floodfill whether our record is visible
        if let Some(exclude) = verify_exclude {
            let our_ident = self.store.our_ident();
            if self
                .requests
                .register(our_ident, LookupKind::RouterInfo, now_s, None)
            {
                if let Some(pending) = self.requests.get_mut(&our_ident) {
                    pending.excluded.extend(exclude);
                }
                actions.extend(self.send_lookup(&our_ident));
            }
            if let Some(p) = self.publish.as_mut() {
                p.verified = true;
            }
        }

        if let Some(mut excluded) = retry_excluded {
            let date = date_string(timestamp_ms());
            let our_ident = self.store.our_ident();
            let targets = self
                .store
                .closest_floodfills(&our_ident, 2, &excluded, &date);
            if targets.is_empty() {
                warn!("no floodfill to publish to");
                self.publish = None;
                self.last_publish_s = now_s;
                return;
            }
            let token = loop {
                let token = OsRng.next_u32();
                if token != 0 {
                    break token;
                }
            };
            let store_msg = DatabaseStore::new(our_ident, StoredData::RouterInfo(local))
                .with_reply(token, 0, our_ident);
            match store_msg.encode() {
                Ok(payload) => {
                    for target in &targets {
                        info!(%target, "publishing router info");
                        actions.push(NetDbAction::Send {
                            to: *target,
                            message: I2npMessage::new(
                                MessageType::DatabaseStore,
                                payload.clone(),
                                None,
                            ),
                        });
                    }
                    excluded.extend(targets.iter().copied());
                    self.publish = Some(PublishState {
                        token,
                        targets,
                        excluded,
                        sent_s: now_s,
                        confirmed: false,
                        verified: false,
                    });
                    self.last_publish_s = now_s;
                }
                Err(e) => warn!(error = %e, "could not encode publish"),
            }
        }
    }

    fn manage_explore(&mut self, now_s: u64, actions: &mut Vec<NetDbAction>) {
        if now_s < self.last_explore_s + EXPLORE_INTERVAL_S {
            return;
        }
        self.last_explore_s = now_s;

        let known = self.store.router_count().max(1);
        let probes = (800 / known).clamp(1, 9);
        for _ in 0..probes {
            let mut random_key = [0u8; 32];
            OsRng.fill_bytes(&mut random_key);
            actions.extend(self.request(
                IdentHash(random_key),
                LookupKind::Exploration,
                None,
            ));
        }
        debug!(probes, known, "exploratory probing");
    }

    fn manage_save(&mut self, now_s: u64) {
        if now_s < self.last_save_s + SAVE_INTERVAL_S {
            return;
        }
        self.last_save_s = now_s;
        self.store.expire(timestamp_ms());
        if let Err(e) = persist::save_router_infos(&self.store, &self.data_dir.join("netDb")) {
            warn!(error = %e, "saving router infos failed");
        }
        if let Err(e) = persist::save_profiles(&self.store, &self.data_dir.join("peerProfiles")) {
            warn!(error = %e, "saving profiles failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garlicroute_core::{Lease, LeaseSet, PrivateKeys, RouterInfo};
    use garlicroute_crypto::ElGamalKeypair;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn make_router(caps: &str) -> (PrivateKeys, Vec<u8>, IdentHash) {
        let keys = PrivateKeys::generate().unwrap();
        let mut info = RouterInfo::new(keys.identity().clone());
        info.set_caps(caps);
        info.sign(keys.signing()).unwrap();
        let bytes = info.to_bytes().unwrap();
        let hash = keys.identity().hash();
        (keys, bytes, hash)
    }

    fn make_lease_set() -> (Vec<u8>, IdentHash) {
        let dest = PrivateKeys::generate().unwrap();
        let enc = ElGamalKeypair::generate();
        let mut set = LeaseSet::new(
            dest.identity().clone(),
            *enc.public_key(),
            vec![Lease {
                tunnel_gateway: IdentHash([3; 32]),
                tunnel_id: 42,
                end_date: timestamp_ms() + 600_000,
            }],
        );
        set.sign(dest.signing()).unwrap();
        (set.to_bytes().unwrap(), dest.identity().hash())
    }

    fn engine_with_floodfills(n: usize) -> (NetDbEngine, Vec<IdentHash>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NetDbStore::new(IdentHash([0; 32])));
        let mut floodfills = Vec::new();
        for _ in 0..n {
            let (_, bytes, hash) = make_router("fR");
            store.add_router_info(&bytes).unwrap();
            floodfills.push(hash);
        }
        let engine = NetDbEngine::new(store, dir.path().to_path_buf(), false);
        (engine, floodfills, dir)
    }

    #[test]
    fn test_lookup_goes_to_closest_floodfill() {
        let (mut engine, _, _dir) = engine_with_floodfills(4);
        let key = IdentHash([9; 32]);

        let date = date_string(timestamp_ms());
        let expected = engine
            .store()
            .closest_floodfills(&key, 1, &HashSet::new(), &date)[0];

        let actions = engine.request(key, LookupKind::LeaseSet, None);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            NetDbAction::SendViaTunnel { to, message } => {
                assert_eq!(*to, expected);
                assert_eq!(message.msg_type, MessageType::DatabaseLookup);
                let lookup = DatabaseLookup::decode(&message.payload).unwrap();
                assert_eq!(lookup.key, key);
                assert_eq!(lookup.kind, LookupKind::LeaseSet);
                // the queried floodfill is excluded from any re-ask
                assert!(lookup.excluded.contains(&expected));
            }
            other => panic!("unexpected action: {:?}", other),
        }
        // duplicate interest does not resend
        assert!(engine.request(key, LookupKind::LeaseSet, None).is_empty());
    }

    #[test]
    fn test_store_completes_lookup_with_lease_set() {
        let (mut engine, _, _dir) = engine_with_floodfills(2);
        let (ls_bytes, ls_hash) = make_lease_set();

        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        engine.request(
            ls_hash,
            LookupKind::LeaseSet,
            Some(Box::new(move |result| {
                sink.lock().unwrap().push(result.is_some());
            })),
        );

        let store_msg = DatabaseStore::new(ls_hash, StoredData::LeaseSet(ls_bytes));
        let message =
            I2npMessage::new(MessageType::DatabaseStore, store_msg.encode().unwrap(), None);
        engine.handle_message(message);

        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert!(engine.store().find_lease_set(&ls_hash).is_some());
        assert_eq!(engine.outstanding_requests(), 0);
    }

    #[test]
    fn test_search_reply_redirects_with_exclusion() {
        let (mut engine, floodfills, _dir) = engine_with_floodfills(5);
        engine.set_local_router_info(make_router("LR").1);
        let key = IdentHash([9; 32]);

        let actions = engine.request(key, LookupKind::RouterInfo, None);
        let first = match &actions[0] {
            NetDbAction::SendViaTunnel { to, .. } => *to,
            other => panic!("unexpected action: {:?}", other),
        };

        let reply = DatabaseSearchReply {
            key,
            peers: floodfills.clone(),
            from: first,
        };
        let message =
            I2npMessage::new(MessageType::DatabaseSearchReply, reply.encode(), None);
        let actions = engine.handle_message(message);

        // a store introducing us precedes the re-ask
        let mut next_target = None;
        let mut saw_intro = false;
        for action in &actions {
            match action {
                NetDbAction::Send { message, .. }
                    if message.msg_type == MessageType::DatabaseStore =>
                {
                    saw_intro = true;
                }
                NetDbAction::SendViaTunnel { to, message }
                    if message.msg_type == MessageType::DatabaseLookup =>
                {
                    next_target = Some(*to);
                    let lookup = DatabaseLookup::decode(&message.payload).unwrap();
                    assert!(lookup.excluded.contains(&first));
                }
                _ => {}
            }
        }
        assert!(saw_intro);
        let next_target = next_target.expect("re-ask sent");
        assert_ne!(next_target, first);

        // the re-ask goes to the xor-closest remaining floodfill
        let date = date_string(timestamp_ms());
        let mut excluded = HashSet::new();
        excluded.insert(first);
        let expected = engine.store().closest_floodfills(&key, 1, &excluded, &date)[0];
        assert_eq!(next_target, expected);
    }

    #[test]
    fn test_incoming_lookup_served_from_store() {
        let (mut engine, _, _dir) = engine_with_floodfills(1);
        let (_, bytes, hash) = make_router("LR");
        engine.store().add_router_info(&bytes).unwrap();

        let requester = IdentHash([7; 32]);
        let lookup = DatabaseLookup::new(hash, requester, LookupKind::RouterInfo);
        let message = I2npMessage::new(MessageType::DatabaseLookup, lookup.encode(), None);
        let actions = engine.handle_message(message);

        assert_eq!(actions.len(), 1);
        match &actions[0] {
            NetDbAction::Send { to, message } => {
                assert_eq!(*to, requester);
                assert_eq!(message.msg_type, MessageType::DatabaseStore);
                let store_msg = DatabaseStore::decode(&message.payload).unwrap();
                assert_eq!(store_msg.key, hash);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_incoming_lookup_miss_returns_closest_peers() {
        let (mut engine, floodfills, _dir) = engine_with_floodfills(5);
        let requester = floodfills[0];

        let mut lookup =
            DatabaseLookup::new(IdentHash([9; 32]), requester, LookupKind::RouterInfo);
        lookup.excluded = vec![floodfills[1]];
        let message = I2npMessage::new(MessageType::DatabaseLookup, lookup.encode(), None);
        let actions = engine.handle_message(message);

        match &actions[0] {
            NetDbAction::Send { to, message } => {
                assert_eq!(*to, requester);
                let reply = DatabaseSearchReply::decode(&message.payload).unwrap();
                assert_eq!(reply.peers.len(), 3);
                // never the requester, never the excluded
                assert!(!reply.peers.contains(&requester));
                assert!(!reply.peers.contains(&floodfills[1]));
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_reply_token_acked_and_flooded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NetDbStore::new(IdentHash([0; 32])));
        for _ in 0..4 {
            let (_, bytes, _) = make_router("fR");
            store.add_router_info(&bytes).unwrap();
        }
        let mut engine = NetDbEngine::new(store, dir.path().to_path_buf(), true);

        let (_, new_bytes, new_hash) = make_router("LR");
        let sender = IdentHash([5; 32]);
        let store_msg = DatabaseStore::new(new_hash, StoredData::RouterInfo(new_bytes))
            .with_reply(777, 0, sender);
        let message =
            I2npMessage::new(MessageType::DatabaseStore, store_msg.encode().unwrap(), None);
        let actions = engine.handle_message(message);

        let mut acked = false;
        let mut floods = 0;
        for action in &actions {
            if let NetDbAction::Send { to, message } = action {
                match message.msg_type {
                    MessageType::DeliveryStatus => {
                        assert_eq!(*to, sender);
                        let status = DeliveryStatus::decode(&message.payload).unwrap();
                        assert_eq!(status.msg_id, 777);
                        acked = true;
                    }
                    MessageType::DatabaseStore => {
                        let flooded = DatabaseStore::decode(&message.payload).unwrap();
                        assert_eq!(flooded.reply_token, 0);
                        floods += 1;
                    }
                    _ => {}
                }
            }
        }
        assert!(acked);
        assert_eq!(floods, FLOOD_COUNT);
    }

    #[test]
    fn test_hard_timeout_fails_exactly_once() {
        let (mut engine, _, _dir) = engine_with_floodfills(2);
        let key = IdentHash([9; 32]);
        let fired = Arc::new(AtomicUsize::new(0));
        let sink = fired.clone();
        engine.request(
            key,
            LookupKind::RouterInfo,
            Some(Box::new(move |result| {
                assert!(result.is_none());
                sink.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let later = timestamp_s() + crate::requests::LOOKUP_HARD_TIMEOUT_S + 1;
        engine.manage(later);
        engine.manage(later + 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explore_probe_count_scales_inversely() {
        let (mut engine, _, _dir) = engine_with_floodfills(2);
        // few routers known: probes capped at 9
        let actions = engine.manage(timestamp_s() + EXPLORE_INTERVAL_S + 1);
        let lookups = actions
            .iter()
            .filter(|a| {
                matches!(a, NetDbAction::SendViaTunnel { message, .. }
                    if message.msg_type == MessageType::DatabaseLookup)
            })
            .count();
        assert!(lookups <= 9);
        assert!(lookups >= 1);
    }

    #[test]
    fn test_publish_retry_and_confirm() {
        let (mut engine, _, _dir) = engine_with_floodfills(3);
        engine.set_local_router_info(make_router("LR").1);

        let now = timestamp_s();
        let actions = engine.manage(now);
        let (first_target, token) = actions
            .iter()
            .find_map(|a| match a {
                NetDbAction::Send { to, message }
                    if message.msg_type == MessageType::DatabaseStore =>
                {
                    let store_msg = DatabaseStore::decode(&message.payload).unwrap();
                    assert_ne!(store_msg.reply_token, 0);
                    Some((*to, store_msg.reply_token))
                }
                _ => None,
            })
            .expect("publish sent");

        // no ack: retried against a different floodfill
        let actions = engine.manage(now + PUBLISH_CONFIRM_TIMEOUT_S + 1);
        let second_target = actions
            .iter()
            .find_map(|a| match a {
                NetDbAction::Send { to, message }
                    if message.msg_type == MessageType::DatabaseStore =>
                {
                    Some(*to)
                }
                _ => None,
            })
            .expect("publish retried");
        assert_ne!(second_target, first_target);

        // the retry carries a fresh token; ack the latest one
        assert!(!engine.handle_delivery_status(token));
    }
}
