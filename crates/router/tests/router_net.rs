//! Several routers wired together over an in-memory transport: publish,
//! lookup, tunnel building, and end-to-end garlic datagrams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::time::{sleep, timeout};

use garlicroute_core::IdentHash;
use garlicroute_i2np::{I2npMessage, LookupKind, MessageType, Payload};
use garlicroute_netdb::LookupResult;
use garlicroute_router::{LocalDestination, RouterCore, Transport};
use garlicroute_settings::RouterSettings;

const TICK: Duration = Duration::from_millis(250);

#[derive(Default)]
struct Network {
    routers: Mutex<HashMap<IdentHash, Arc<RouterCore>>>,
}

impl Network {
    fn register(&self, router: Arc<RouterCore>) {
        self.routers
            .lock()
            .unwrap()
            .insert(router.ident(), router);
    }
}

struct MemTransport {
    net: Arc<Network>,
    me: OnceLock<IdentHash>,
}

impl Transport for MemTransport {
    fn send(&self, to: IdentHash, message: I2npMessage) {
        let Some(from) = self.me.get().copied() else {
            return;
        };
        let bytes = message.to_bytes();
        let target = self.net.routers.lock().unwrap().get(&to).cloned();
        if let Some(router) = target {
            router.handle_inbound(from, &bytes);
        }
    }
}

async fn start_router(
    net: &Arc<Network>,
    dir: &tempfile::TempDir,
    name: &str,
    floodfill: bool,
) -> Arc<RouterCore> {
    garlicroute_logging::init("warn");
    let mut settings = RouterSettings::with_data_dir(dir.path().join(name));
    settings.floodfill = floodfill;
    settings.exploratory_hops = 1;
    settings.exploratory_tunnels = 2;

    let transport = Arc::new(MemTransport {
        net: net.clone(),
        me: OnceLock::new(),
    });
    let router = Arc::new(
        RouterCore::start_with_interval(settings, transport.clone(), TICK)
            .await
            .expect("router starts"),
    );
    transport.me.set(router.ident()).unwrap();
    net.register(router.clone());
    router
}

/// Hand routers each other's published RouterInfos, as a reseed would.
/// `withhold` pairs (receiver, subject) are skipped so a test can force a
/// record to travel over the network instead.
fn seed_stores(routers: &[Arc<RouterCore>], withhold: &[(IdentHash, IdentHash)]) {
    let infos: Vec<Vec<u8>> = routers
        .iter()
        .map(|r| std::fs::read(r.data_dir().join("router.info")).unwrap())
        .collect();
    for router in routers {
        for (other, bytes) in routers.iter().zip(&infos) {
            if other.ident() == router.ident() {
                continue;
            }
            if withhold.contains(&(router.ident(), other.ident())) {
                continue;
            }
            router.store().add_router_info(bytes).unwrap();
        }
    }
}

async fn eventually<F>(deadline: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    timeout(deadline, async {
        loop {
            if check() {
                return;
            }
            sleep(Duration::from_millis(200)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_publish_and_lookup_across_routers() {
    let dir = tempfile::tempdir().unwrap();
    let net = Arc::new(Network::default());

    let floodfill = start_router(&net, &dir, "floodfill", true).await;
    let alice = start_router(&net, &dir, "alice", false).await;
    let bob = start_router(&net, &dir, "bob", false).await;
    let carol = start_router(&net, &dir, "carol", false).await;
    let routers = vec![floodfill.clone(), alice.clone(), bob.clone(), carol.clone()];
    // alice must fetch bob's record over the network
    seed_stores(&routers, &[(alice.ident(), bob.ident())]);

    // bob's periodic publish lands his record at the floodfill
    eventually(Duration::from_secs(30), || {
        floodfill.store().find_router_info(&bob.ident()).is_some()
    })
    .await;

    // alice, who only knows the floodfill path, can resolve bob
    let result = timeout(
        Duration::from_secs(30),
        alice.lookup(bob.ident(), LookupKind::RouterInfo),
    )
    .await
    .expect("lookup completes");
    match result {
        Some(LookupResult::RouterInfo(info)) => assert_eq!(info.hash(), bob.ident()),
        other => panic!("lookup failed: {:?}", other.is_some()),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_datagram_reaches_destination_through_tunnels() {
    let dir = tempfile::tempdir().unwrap();
    let net = Arc::new(Network::default());

    let floodfill = start_router(&net, &dir, "floodfill", true).await;
    let alice = start_router(&net, &dir, "alice", false).await;
    let bob = start_router(&net, &dir, "bob", false).await;
    let carol = start_router(&net, &dir, "carol", false).await;
    let routers = vec![floodfill.clone(), alice.clone(), bob.clone(), carol.clone()];
    seed_stores(&routers, &[]);

    // bob hosts a destination with 1-hop tunnels
    let dest = LocalDestination::load_or_create(&dir.path().join("bob"), "echo").unwrap();
    let dest_hash = dest.hash();
    let mut inbox = bob.add_destination(dest, 1, 2).await.unwrap();

    // its LeaseSet shows up at the floodfill once tunnels are built
    eventually(Duration::from_secs(45), || {
        floodfill.store().find_lease_set(&dest_hash).is_some()
    })
    .await;

    // alice resolves the LeaseSet and fires a datagram into a lease
    let lease_set = timeout(
        Duration::from_secs(30),
        alice.lookup(dest_hash, LookupKind::LeaseSet),
    )
    .await
    .expect("lookup completes");
    let Some(LookupResult::LeaseSet(lease_set)) = lease_set else {
        panic!("lease set not found");
    };

    alice
        .send_datagram(lease_set, b"hello across the overlay".to_vec())
        .unwrap();

    let received = timeout(Duration::from_secs(30), inbox.recv())
        .await
        .expect("datagram delivered")
        .expect("sink open");
    assert_eq!(received.msg_type, MessageType::Data);
    match received.parse_payload().unwrap() {
        Payload::Data(data) => assert_eq!(data.payload, b"hello across the overlay"),
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_graceful_shutdown_without_transit_is_quick() {
    let dir = tempfile::tempdir().unwrap();
    let net = Arc::new(Network::default());
    let router = start_router(&net, &dir, "solo", false).await;
    net.routers.lock().unwrap().clear();

    let router = Arc::try_unwrap(router).ok().expect("sole owner");
    timeout(Duration::from_secs(10), router.shutdown())
        .await
        .expect("shutdown completes quickly with no transit tunnels");
}
