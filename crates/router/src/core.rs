//! The `RouterCore` aggregate: one NetDB worker, one tunnel worker, one
//! garlic dispatcher, each owning its engine and draining its own inbox.
//! Cross-worker traffic is message passing only; the record store is the
//! one shared read-mostly structure.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::{rngs::OsRng, RngCore};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use garlicroute_core::{timestamp_ms, timestamp_s, IdentHash, Lease, LeaseSet, TunnelId};
use garlicroute_garlic::{DeliveryInstructions, GarlicClove, GarlicEngine};
use garlicroute_i2np::{
    DataMessage, DeliveryStatus, I2npMessage, LookupKind, MessageType, TunnelGatewayMessage,
};
use garlicroute_netdb::{persist, LookupResult, NetDbAction, NetDbEngine, NetDbStore};
use garlicroute_settings::RouterSettings;
use garlicroute_tunnel::{
    EngineAction, HopCandidate, HopSelector, PoolConfig, TunnelDelivery, TunnelEngine,
    TunnelMessageBlock,
};

use crate::context::RouterContext;
use crate::destination::LocalDestination;
use crate::transport::{PeerErrorTracker, Transport};
use crate::{Result, RouterError};

const EXPLORATORY_POOL: &str = "exploratory";
const MANAGE_INTERVAL: Duration = Duration::from_secs(15);
/// Graceful shutdown never waits longer than a transit lifetime plus slack.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(601);

enum NetDbCommand {
    Inbound(I2npMessage),
    Lookup {
        key: IdentHash,
        kind: LookupKind,
        reply: oneshot::Sender<Option<LookupResult>>,
    },
    PublishLocal(Vec<u8>),
    PublishLeaseSet { key: IdentHash, bytes: Vec<u8> },
    SetReplyPath(Option<(IdentHash, TunnelId)>),
    DeliveryStatus(u32),
    Shutdown,
}

enum TunnelCommand {
    Inbound(I2npMessage),
    /// Route through an exploratory outbound tunnel, falling back to a
    /// direct transport send.
    SendVia { to: IdentHash, message: I2npMessage },
    /// Send into a remote destination's inbound tunnel.
    SendToLease {
        gateway: IdentHash,
        tunnel_id: TunnelId,
        message: I2npMessage,
    },
    AddPool(PoolConfig),
    SetAcceptsTransit(bool),
    QueryTransit(oneshot::Sender<(usize, u64)>),
    QueryLeases {
        pool: Option<String>,
        reply: oneshot::Sender<Vec<Lease>>,
    },
    DeliveryStatus(u32),
    Shutdown,
}

enum DispatchCommand {
    Inbound(I2npMessage),
    SendToDestination {
        lease_set: LeaseSet,
        message: I2npMessage,
    },
    RegisterSink {
        destination: Option<IdentHash>,
        /// A destination's own ElGamal secret; garlic addressed to it
        /// cannot be opened with the router key.
        secret: Option<[u8; 256]>,
        sink: mpsc::UnboundedSender<I2npMessage>,
    },
    Shutdown,
}

/// Hop selection over the shared store, profile-aware.
struct StoreSelector {
    store: Arc<NetDbStore>,
}

impl HopSelector for StoreSelector {
    fn select_hops(
        &self,
        count: usize,
        excluded: &[IdentHash],
        allowed: Option<&[IdentHash]>,
    ) -> Option<Vec<HopCandidate>> {
        let mut used: HashSet<IdentHash> = excluded.iter().copied().collect();
        let mut hops = Vec::with_capacity(count);
        for _ in 0..count {
            let candidate = match allowed {
                Some(allowed) => allowed
                    .iter()
                    .copied()
                    .filter(|hash| !used.contains(hash))
                    .find_map(|hash| self.store.find_router_info(&hash)),
                None => {
                    let mut pick = None;
                    // a few draws to dodge unreachable or badly profiled peers
                    for _ in 0..8 {
                        let Some(info) = self.store.random_router(&used) else {
                            break;
                        };
                        let bad = self
                            .store
                            .profile(&info.hash())
                            .map(|p| p.is_bad())
                            .unwrap_or(false);
                        if !bad && !info.is_unreachable() {
                            pick = Some(info);
                            break;
                        }
                        used.insert(info.hash());
                    }
                    pick
                }
            }?;
            used.insert(candidate.hash());
            hops.push(HopCandidate {
                ident: candidate.hash(),
                encryption_key: *candidate.identity().encryption_key(),
            });
        }
        Some(hops)
    }
}

pub struct RouterCore {
    ident: IdentHash,
    context: std::sync::Mutex<RouterContext>,
    store: Arc<NetDbStore>,
    transport: Arc<dyn Transport>,
    errors: PeerErrorTracker,
    data_dir: PathBuf,
    netdb_tx: mpsc::UnboundedSender<NetDbCommand>,
    tunnel_tx: mpsc::UnboundedSender<TunnelCommand>,
    dispatch_tx: mpsc::UnboundedSender<DispatchCommand>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RouterCore {
    pub async fn start(settings: RouterSettings, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::start_with_interval(settings, transport, MANAGE_INTERVAL).await
    }

    /// Like [`RouterCore::start`] with a custom housekeeping cadence (tests
    /// run it fast).
    pub async fn start_with_interval(
        settings: RouterSettings,
        transport: Arc<dyn Transport>,
        manage_interval: Duration,
    ) -> Result<Self> {
        let context = RouterContext::load_or_create(&settings)?;
        let ident = context.ident();
        info!(%ident, floodfill = context.is_floodfill(), "starting router");

        let store = Arc::new(NetDbStore::with_netid(ident, settings.netid));
        let loaded = persist::load_router_infos(&store, &settings.data_dir.join("netDb"))?;
        persist::load_profiles(&store, &settings.data_dir.join("peerProfiles"))?;
        info!(loaded, "router infos loaded from disk");

        let mut netdb_engine = NetDbEngine::new(
            store.clone(),
            settings.data_dir.clone(),
            context.is_floodfill(),
        );
        netdb_engine.set_local_router_info(context.router_info_bytes()?);

        let mut tunnel_engine = TunnelEngine::new(ident, *context.keys().encryption().secret_key());
        tunnel_engine.set_max_transit(settings.max_transit_tunnels);
        tunnel_engine.add_pool(PoolConfig {
            name: EXPLORATORY_POOL.to_string(),
            num_inbound_hops: settings.exploratory_hops,
            num_outbound_hops: settings.exploratory_hops,
            num_inbound_tunnels: settings.exploratory_tunnels,
            num_outbound_tunnels: settings.exploratory_tunnels,
            explicit_peers: None,
        });

        let (netdb_tx, netdb_rx) = mpsc::unbounded_channel();
        let (tunnel_tx, tunnel_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let mut handles = Vec::new();
        handles.push(tokio::spawn(netdb_worker(
            netdb_engine,
            netdb_rx,
            transport.clone(),
            tunnel_tx.clone(),
            manage_interval,
        )));
        handles.push(tokio::spawn(tunnel_worker(
            tunnel_engine,
            StoreSelector {
                store: store.clone(),
            },
            tunnel_rx,
            transport.clone(),
            netdb_tx.clone(),
            dispatch_tx.clone(),
            manage_interval,
        )));
        handles.push(tokio::spawn(dispatch_worker(
            GarlicEngine::new(),
            context.keys().clone(),
            dispatch_rx,
            transport.clone(),
            netdb_tx.clone(),
            tunnel_tx.clone(),
        )));

        Ok(Self {
            ident,
            context: std::sync::Mutex::new(context),
            store,
            transport,
            errors: PeerErrorTracker::new(),
            data_dir: settings.data_dir,
            netdb_tx,
            tunnel_tx,
            dispatch_tx,
            handles: Mutex::new(handles),
        })
    }

    pub fn ident(&self) -> IdentHash {
        self.ident
    }

    /// Update reachability; a changed RouterInfo is persisted and
    /// republished.
    pub fn set_status(&self, status: crate::context::RouterStatus) -> Result<()> {
        let mut context = self.context.lock().expect("context lock");
        if context.set_status(status)? {
            context.persist_router_info(&self.data_dir)?;
            let bytes = context.router_info_bytes()?;
            let _ = self.netdb_tx.send(NetDbCommand::PublishLocal(bytes));
        }
        Ok(())
    }

    pub fn store(&self) -> &Arc<NetDbStore> {
        &self.store
    }

    /// Transports hand every authenticated inbound frame here.
    pub fn handle_inbound(&self, from: IdentHash, bytes: &[u8]) {
        let message = match I2npMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(%from, error = %e, "dropping malformed message");
                if self.errors.record(from) {
                    warn!(%from, "too many malformed messages, dropping peer");
                    self.transport.drop_peer(from);
                }
                return;
            }
        };
        let _ = match message.msg_type {
            MessageType::TunnelData
            | MessageType::TunnelGateway
            | MessageType::TunnelBuild
            | MessageType::TunnelBuildReply
            | MessageType::VariableTunnelBuild
            | MessageType::VariableTunnelBuildReply => self
                .tunnel_tx
                .send(TunnelCommand::Inbound(message))
                .map_err(|_| ()),
            MessageType::DatabaseStore
            | MessageType::DatabaseLookup
            | MessageType::DatabaseSearchReply => self
                .netdb_tx
                .send(NetDbCommand::Inbound(message))
                .map_err(|_| ()),
            MessageType::Garlic | MessageType::DeliveryStatus | MessageType::Data => self
                .dispatch_tx
                .send(DispatchCommand::Inbound(message))
                .map_err(|_| ()),
        };
    }

    /// Look a record up, waiting for the single completion.
    pub async fn lookup(&self, key: IdentHash, kind: LookupKind) -> Option<LookupResult> {
        let (reply, rx) = oneshot::channel();
        self.netdb_tx
            .send(NetDbCommand::Lookup { key, kind, reply })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Register a local destination: its tunnel pool, its inbound sink, and
    /// LeaseSet publishing.
    pub async fn add_destination(
        &self,
        destination: LocalDestination,
        hops: usize,
        tunnels: usize,
    ) -> Result<mpsc::UnboundedReceiver<I2npMessage>> {
        let pool = destination.pool_name();
        self.tunnel_tx
            .send(TunnelCommand::AddPool(PoolConfig {
                name: pool.clone(),
                num_inbound_hops: hops,
                num_outbound_hops: hops,
                num_inbound_tunnels: tunnels,
                num_outbound_tunnels: tunnels,
                explicit_peers: None,
            }))
            .map_err(|_| RouterError::WorkerGone("tunnel"))?;

        let (sink, rx) = mpsc::unbounded_channel();
        self.dispatch_tx
            .send(DispatchCommand::RegisterSink {
                destination: Some(destination.hash()),
                secret: Some(*destination.keys().encryption().secret_key()),
                sink,
            })
            .map_err(|_| RouterError::WorkerGone("dispatch"))?;

        // republish the LeaseSet as the pool's tunnels roll over
        let tunnel_tx = self.tunnel_tx.clone();
        let netdb_tx = self.netdb_tx.clone();
        let handle = tokio::spawn(async move {
            let mut last_leases: Vec<Lease> = Vec::new();
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                let (reply, rx) = oneshot::channel();
                if tunnel_tx
                    .send(TunnelCommand::QueryLeases {
                        pool: Some(pool.clone()),
                        reply,
                    })
                    .is_err()
                {
                    break;
                }
                let Ok(leases) = rx.await else { break };
                if leases.is_empty() || leases == last_leases {
                    continue;
                }
                last_leases = leases.clone();
                match destination.make_lease_set(leases) {
                    Ok(Some(set)) => {
                        if let Ok(bytes) = set.to_bytes() {
                            let _ = netdb_tx.send(NetDbCommand::PublishLeaseSet {
                                key: set.hash(),
                                bytes,
                            });
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "lease set signing failed"),
                }
            }
        });
        self.handles.lock().await.push(handle);
        Ok(rx)
    }

    /// Register the sink for plain data messages not bound to a registered
    /// destination.
    pub fn set_default_sink(&self, sink: mpsc::UnboundedSender<I2npMessage>) {
        let _ = self.dispatch_tx.send(DispatchCommand::RegisterSink {
            destination: None,
            secret: None,
            sink,
        });
    }

    /// Garlic-wrap a datagram to a remote destination and send it through
    /// our tunnels into one of its leases.
    pub fn send_datagram(&self, lease_set: LeaseSet, payload: Vec<u8>) -> Result<()> {
        let message = I2npMessage::new(
            MessageType::Data,
            DataMessage { payload }.encode(),
            None,
        );
        self.dispatch_tx
            .send(DispatchCommand::SendToDestination { lease_set, message })
            .map_err(|_| RouterError::WorkerGone("dispatch"))
    }

    /// Stop accepting transit, wait for existing transit tunnels to expire,
    /// stop the workers, persist.
    pub async fn shutdown(self) {
        info!("graceful shutdown requested");
        self.context
            .lock()
            .expect("context lock")
            .set_accepts_tunnels(false);
        let _ = self.tunnel_tx.send(TunnelCommand::SetAcceptsTransit(false));

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DEADLINE;
        loop {
            let (reply, rx) = oneshot::channel();
            if self.tunnel_tx.send(TunnelCommand::QueryTransit(reply)).is_err() {
                break;
            }
            match rx.await {
                Ok((0, _)) => break,
                Ok((count, remaining)) => {
                    debug!(count, remaining, "waiting for transit tunnels to drain");
                    let wait = Duration::from_secs(remaining.clamp(1, 5));
                    if tokio::time::Instant::now() + wait > deadline {
                        warn!(count, "shutdown deadline reached with transit active");
                        break;
                    }
                    tokio::time::sleep(wait).await;
                }
                Err(_) => break,
            }
        }

        let _ = self.netdb_tx.send(NetDbCommand::Shutdown);
        let _ = self.tunnel_tx.send(TunnelCommand::Shutdown);
        let _ = self.dispatch_tx.send(DispatchCommand::Shutdown);
        for mut handle in self.handles.lock().await.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
        info!("router stopped");
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }
}

// ---- workers ---------------------------------------------------------------

async fn netdb_worker(
    mut engine: NetDbEngine,
    mut rx: mpsc::UnboundedReceiver<NetDbCommand>,
    transport: Arc<dyn Transport>,
    tunnel_tx: mpsc::UnboundedSender<TunnelCommand>,
    manage_interval: Duration,
) {
    let mut ticker = tokio::time::interval(manage_interval);
    let execute = |actions: Vec<NetDbAction>,
                   transport: &Arc<dyn Transport>,
                   tunnel_tx: &mpsc::UnboundedSender<TunnelCommand>| {
        for action in actions {
            match action {
                NetDbAction::Send { to, message } => transport.send(to, message),
                NetDbAction::SendViaTunnel { to, message } => {
                    let _ = tunnel_tx.send(TunnelCommand::SendVia { to, message });
                }
            }
        }
    };

    loop {
        tokio::select! {
            command = rx.recv() => {
                match command {
                    None | Some(NetDbCommand::Shutdown) => break,
                    Some(NetDbCommand::Inbound(message)) => {
                        let actions = engine.handle_message(message);
                        execute(actions, &transport, &tunnel_tx);
                    }
                    Some(NetDbCommand::Lookup { key, kind, reply }) => {
                        let actions = engine.request(
                            key,
                            kind,
                            Some(Box::new(move |result| {
                                let _ = reply.send(result);
                            })),
                        );
                        execute(actions, &transport, &tunnel_tx);
                    }
                    Some(NetDbCommand::PublishLocal(bytes)) => {
                        engine.set_local_router_info(bytes);
                    }
                    Some(NetDbCommand::PublishLeaseSet { key, bytes }) => {
                        let actions = engine.publish_lease_set(key, bytes);
                        execute(actions, &transport, &tunnel_tx);
                    }
                    Some(NetDbCommand::SetReplyPath(path)) => engine.set_reply_path(path),
                    Some(NetDbCommand::DeliveryStatus(msg_id)) => {
                        engine.handle_delivery_status(msg_id);
                    }
                }
            }
            _ = ticker.tick() => {
                let actions = engine.manage(timestamp_s());
                execute(actions, &transport, &tunnel_tx);
            }
        }
    }
    engine.save_now();
}

#[allow(clippy::too_many_arguments)]
async fn tunnel_worker(
    mut engine: TunnelEngine,
    selector: StoreSelector,
    mut rx: mpsc::UnboundedReceiver<TunnelCommand>,
    transport: Arc<dyn Transport>,
    netdb_tx: mpsc::UnboundedSender<NetDbCommand>,
    dispatch_tx: mpsc::UnboundedSender<DispatchCommand>,
    manage_interval: Duration,
) {
    let mut ticker = tokio::time::interval(manage_interval);
    loop {
        tokio::select! {
            command = rx.recv() => {
                match command {
                    None | Some(TunnelCommand::Shutdown) => break,
                    Some(TunnelCommand::Inbound(message)) => {
                        let actions = engine.handle_message(message);
                        run_tunnel_actions(&mut engine, actions, &transport, &netdb_tx, &dispatch_tx);
                    }
                    Some(TunnelCommand::SendVia { to, message }) => {
                        let out = engine
                            .select_outbound(Some(EXPLORATORY_POOL))
                            .or_else(|| engine.select_outbound(None));
                        match out {
                            Some(tunnel_id) => {
                                let actions = engine.send_through(
                                    tunnel_id,
                                    vec![TunnelMessageBlock {
                                        delivery: TunnelDelivery::Router(to),
                                        message,
                                    }],
                                );
                                run_tunnel_actions(&mut engine, actions, &transport, &netdb_tx, &dispatch_tx);
                            }
                            None => transport.send(to, message),
                        }
                    }
                    Some(TunnelCommand::SendToLease { gateway, tunnel_id, message }) => {
                        let out = engine
                            .select_outbound(Some(EXPLORATORY_POOL))
                            .or_else(|| engine.select_outbound(None));
                        match out {
                            Some(out_id) => {
                                let actions = engine.send_through(
                                    out_id,
                                    vec![TunnelMessageBlock {
                                        delivery: TunnelDelivery::Tunnel { gateway, tunnel_id },
                                        message,
                                    }],
                                );
                                run_tunnel_actions(&mut engine, actions, &transport, &netdb_tx, &dispatch_tx);
                            }
                            None => {
                                // no outbound tunnel yet: hand it to the
                                // gateway directly
                                let wrapped = TunnelGatewayMessage {
                                    tunnel_id,
                                    payload: message.to_bytes(),
                                };
                                transport.send(
                                    gateway,
                                    I2npMessage::new(
                                        MessageType::TunnelGateway,
                                        wrapped.encode(),
                                        None,
                                    ),
                                );
                            }
                        }
                    }
                    Some(TunnelCommand::AddPool(config)) => engine.add_pool(config),
                    Some(TunnelCommand::SetAcceptsTransit(accepts)) => {
                        engine.set_accepts_transit(accepts)
                    }
                    Some(TunnelCommand::QueryTransit(reply)) => {
                        let _ = reply.send((
                            engine.transit_count(),
                            engine.transit_remaining_s(timestamp_s()),
                        ));
                    }
                    Some(TunnelCommand::QueryLeases { pool, reply }) => {
                        let _ = reply.send(engine.leases(pool.as_deref()));
                    }
                    Some(TunnelCommand::DeliveryStatus(msg_id)) => {
                        engine.complete_tunnel_test(msg_id);
                    }
                }
            }
            _ = ticker.tick() => {
                let actions = engine.manage(timestamp_s(), &selector);
                run_tunnel_actions(&mut engine, actions, &transport, &netdb_tx, &dispatch_tx);
                let _ = netdb_tx.send(NetDbCommand::SetReplyPath(
                    engine.inbound_reply_path(Some(EXPLORATORY_POOL)),
                ));
            }
        }
    }
}

/// Execute engine actions; locally delivered tunnel traffic feeds straight
/// back into the engine, everything else crosses to its worker.
fn run_tunnel_actions(
    engine: &mut TunnelEngine,
    actions: Vec<EngineAction>,
    transport: &Arc<dyn Transport>,
    netdb_tx: &mpsc::UnboundedSender<NetDbCommand>,
    dispatch_tx: &mpsc::UnboundedSender<DispatchCommand>,
) {
    let mut queue: VecDeque<EngineAction> = actions.into();
    while let Some(action) = queue.pop_front() {
        match action {
            EngineAction::Send { to, message } => transport.send(to, message),
            EngineAction::DeliverLocal(message) => match message.msg_type {
                MessageType::TunnelData
                | MessageType::TunnelGateway
                | MessageType::TunnelBuild
                | MessageType::TunnelBuildReply
                | MessageType::VariableTunnelBuild
                | MessageType::VariableTunnelBuildReply => {
                    queue.extend(engine.handle_message(message));
                }
                MessageType::DatabaseStore
                | MessageType::DatabaseLookup
                | MessageType::DatabaseSearchReply => {
                    let _ = netdb_tx.send(NetDbCommand::Inbound(message));
                }
                MessageType::DeliveryStatus => {
                    if let Ok(status) = DeliveryStatus::decode(&message.payload) {
                        // tunnel tests are matched here; anything else is a
                        // garlic or publish ack
                        if !engine.complete_tunnel_test(status.msg_id) {
                            let _ = dispatch_tx.send(DispatchCommand::Inbound(message));
                        }
                    }
                }
                MessageType::Garlic | MessageType::Data => {
                    let _ = dispatch_tx.send(DispatchCommand::Inbound(message));
                }
            },
        }
    }
}

struct DispatchState {
    garlic: GarlicEngine,
    keys: garlicroute_core::PrivateKeys,
    sinks: HashMap<Option<IdentHash>, mpsc::UnboundedSender<I2npMessage>>,
    /// Decryption keys to try after the router's own: one per local
    /// destination.
    destination_secrets: Vec<[u8; 256]>,
}

async fn dispatch_worker(
    garlic: GarlicEngine,
    keys: garlicroute_core::PrivateKeys,
    mut rx: mpsc::UnboundedReceiver<DispatchCommand>,
    transport: Arc<dyn Transport>,
    netdb_tx: mpsc::UnboundedSender<NetDbCommand>,
    tunnel_tx: mpsc::UnboundedSender<TunnelCommand>,
) {
    let mut state = DispatchState {
        garlic,
        keys,
        sinks: HashMap::new(),
        destination_secrets: Vec::new(),
    };
    while let Some(command) = rx.recv().await {
        match command {
            DispatchCommand::Shutdown => break,
            DispatchCommand::RegisterSink {
                destination,
                secret,
                sink,
            } => {
                state.sinks.insert(destination, sink);
                if let Some(secret) = secret {
                    state.destination_secrets.push(secret);
                }
            }
            DispatchCommand::Inbound(message) => {
                dispatch_message(&mut state, message, &transport, &netdb_tx, &tunnel_tx, 0)
            }
            DispatchCommand::SendToDestination { lease_set, message } => {
                send_to_destination(&mut state, lease_set, message, &tunnel_tx);
            }
        }
    }
}

fn dispatch_message(
    state: &mut DispatchState,
    message: I2npMessage,
    transport: &Arc<dyn Transport>,
    netdb_tx: &mpsc::UnboundedSender<NetDbCommand>,
    tunnel_tx: &mpsc::UnboundedSender<TunnelCommand>,
    depth: usize,
) {
    if depth > 4 {
        debug!("dropping deeply nested garlic");
        return;
    }
    match message.msg_type {
        MessageType::Garlic => {
            // router key first, then each destination's; a consumed session
            // tag short-circuits before any ElGamal work
            let mut keys = Vec::with_capacity(1 + state.destination_secrets.len());
            keys.push(*state.keys.encryption().secret_key());
            keys.extend(state.destination_secrets.iter().copied());

            let mut opened = None;
            for secret in &keys {
                match state.garlic.unwrap(&message.payload, secret) {
                    Ok(set) => {
                        opened = Some(set);
                        break;
                    }
                    Err(e) => debug!(error = %e, "garlic decrypt attempt failed"),
                }
            }
            match opened {
                Some(set) => {
                    for clove in set.cloves {
                        route_clove(state, clove, transport, netdb_tx, tunnel_tx, depth);
                    }
                }
                None => debug!("garlic message dropped"),
            }
        }
        MessageType::DeliveryStatus => {
            if let Ok(status) = DeliveryStatus::decode(&message.payload) {
                state.garlic.handle_delivery_status(status.msg_id);
                let _ = netdb_tx.send(NetDbCommand::DeliveryStatus(status.msg_id));
                let _ = tunnel_tx.send(TunnelCommand::DeliveryStatus(status.msg_id));
            }
        }
        MessageType::Data => {
            if let Some(sink) = state.sinks.get(&None) {
                let _ = sink.send(message);
            } else {
                debug!("datagram with no registered sink");
            }
        }
        MessageType::DatabaseStore
        | MessageType::DatabaseLookup
        | MessageType::DatabaseSearchReply => {
            let _ = netdb_tx.send(NetDbCommand::Inbound(message));
        }
        MessageType::TunnelData
        | MessageType::TunnelGateway
        | MessageType::TunnelBuild
        | MessageType::TunnelBuildReply
        | MessageType::VariableTunnelBuild
        | MessageType::VariableTunnelBuildReply => {
            let _ = tunnel_tx.send(TunnelCommand::Inbound(message));
        }
    }
}

fn route_clove(
    state: &mut DispatchState,
    clove: GarlicClove,
    transport: &Arc<dyn Transport>,
    netdb_tx: &mpsc::UnboundedSender<NetDbCommand>,
    tunnel_tx: &mpsc::UnboundedSender<TunnelCommand>,
    depth: usize,
) {
    let now = timestamp_ms();
    if clove.expiration != 0 && clove.expiration + 60_000 < now {
        debug!(clove = clove.clove_id, "expired clove dropped");
        return;
    }
    match clove.instructions {
        DeliveryInstructions::Local => {
            dispatch_message(state, clove.message, transport, netdb_tx, tunnel_tx, depth + 1)
        }
        DeliveryInstructions::Destination(hash) => {
            match state.sinks.get(&Some(hash)) {
                Some(sink) => {
                    let _ = sink.send(clove.message);
                }
                None => debug!(%hash, "clove for unknown destination"),
            }
        }
        DeliveryInstructions::Router(hash) => transport.send(hash, clove.message),
        DeliveryInstructions::Tunnel { gateway, tunnel_id } => {
            let wrapped = TunnelGatewayMessage {
                tunnel_id,
                payload: clove.message.to_bytes(),
            };
            transport.send(
                gateway,
                I2npMessage::new(MessageType::TunnelGateway, wrapped.encode(), None),
            );
        }
    }
}

fn send_to_destination(
    state: &mut DispatchState,
    lease_set: LeaseSet,
    message: I2npMessage,
    tunnel_tx: &mpsc::UnboundedSender<TunnelCommand>,
) {
    let now = timestamp_ms();
    let Some(lease) = lease_set.leases().iter().find(|l| l.end_date > now) else {
        debug!(destination = %lease_set.hash(), "no unexpired lease");
        return;
    };

    let clove = GarlicClove {
        instructions: DeliveryInstructions::Destination(lease_set.hash()),
        message,
        clove_id: OsRng.next_u32(),
        expiration: now + 8_000,
    };
    let wrapped = match state.garlic.wrap(
        lease_set.hash(),
        lease_set.encryption_key(),
        vec![clove],
        None,
    ) {
        Ok(wrapped) => wrapped,
        Err(e) => {
            warn!(error = %e, "garlic wrap failed");
            return;
        }
    };
    let _ = tunnel_tx.send(TunnelCommand::SendToLease {
        gateway: lease.tunnel_gateway,
        tunnel_id: lease.tunnel_id,
        message: wrapped,
    });
}
