use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ethlink_chain::{Chain, ChainState, InMemoryExecutor, InMemoryStateView, InMemoryStore};
use ethlink_common::chain_status::ChainStatus;
use ethlink_common::fork::ForkId;
use ethlink_common::node::{BootNode, Node};
use ethlink_common::signer::Signer;
use ethlink_common::{Address, BlockHash, U256};
use ethlink_miner::{Miner, MinerConfig};
use ethlink_p2p::discovery::server::{DiscoveryConfig, DiscoveryService};
use ethlink_p2p::{EventBus, NetworkCore, P2PNode, P2PNodeConfig, SyncConfig, Synchronizer};
use ethlink_txpool::{TxFetcher, TxPool};
use local_ip_address::local_ip;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod genesis;
mod protocol;

const DEFAULT_DATADIR: &str = "ethlink";
const NETWORK_ID: u64 = 1337;

/// `ChainState` + `ChainStatus` over the in-memory store, the concrete type every
/// subsystem this binary wires together is generic over.
struct DevChain {
    inner: Chain<InMemoryStore>,
    network_id: u64,
}

impl ChainState for DevChain {
    fn genesis_hash(&self) -> BlockHash {
        self.inner.genesis_hash()
    }
    fn latest_header(&self) -> ethlink_common::block::BlockHeader {
        self.inner.latest_header()
    }
    fn header_by_number(&self, number: ethlink_common::BlockNumber) -> Option<ethlink_common::block::BlockHeader> {
        self.inner.header_by_number(number)
    }
    fn header_by_hash(&self, hash: BlockHash) -> Option<ethlink_common::block::BlockHeader> {
        self.inner.header_by_hash(hash)
    }
    fn block_by_hash(&self, hash: BlockHash) -> Option<ethlink_common::block::Block> {
        self.inner.block_by_hash(hash)
    }
    fn receipts_by_hash(&self, hash: BlockHash) -> Option<Vec<ethlink_common::receipt::Receipt>> {
        self.inner.receipts_by_hash(hash)
    }
    fn total_difficulty(&self, hash: BlockHash) -> Option<U256> {
        self.inner.total_difficulty(hash)
    }
    fn put_blocks(&self, blocks: Vec<ethlink_common::block::Block>) -> Result<(), ethlink_chain::ChainError> {
        self.inner.put_blocks(blocks)
    }
    fn reset_canonical_head(&self, height: ethlink_common::BlockNumber) -> Result<(), ethlink_chain::ChainError> {
        self.inner.reset_canonical_head(height)
    }
}

impl ChainStatus for DevChain {
    fn network_id(&self) -> u64 {
        self.network_id
    }
    fn genesis_hash(&self) -> BlockHash {
        self.inner.genesis_hash()
    }
    fn best_hash(&self) -> BlockHash {
        self.inner.latest_header().hash()
    }
    fn total_difficulty(&self) -> U256 {
        self.inner
            .total_difficulty(self.best_hash())
            .unwrap_or_default()
    }
    fn fork_id(&self) -> ForkId {
        ForkId::new(self.inner.genesis_hash(), &[], self.inner.latest_header().number)
    }
}

#[tokio::main]
async fn main() {
    let matches = cli::cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .expect("log-level has a default value");
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from_str(log_level).expect("unsupported log level"))
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(log_filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let data_dir = match matches.get_one::<String>("datadir") {
        Some(datadir) => set_datadir(datadir),
        None => set_datadir(DEFAULT_DATADIR),
    };

    let discovery_addr = matches.get_one::<String>("discovery.addr").expect("has default value");
    let discovery_port = matches.get_one::<String>("discovery.port").expect("has default value");
    let p2p_addr = matches.get_one::<String>("p2p.addr").expect("has default value");
    let p2p_port = matches.get_one::<String>("p2p.port").expect("has default value");
    let max_peers: usize = matches
        .get_one::<String>("max-peers")
        .expect("has default value")
        .parse()
        .expect("max-peers must be a number");

    let udp_socket_addr = parse_socket_addr(discovery_addr, discovery_port).expect("invalid discovery address");
    let tcp_socket_addr = parse_socket_addr(p2p_addr, p2p_port).expect("invalid p2p address");

    let bootnodes: Vec<BootNode> = matches
        .get_many("bootnodes")
        .map(Iterator::copied)
        .map(Iterator::collect)
        .unwrap_or_default();
    if bootnodes.is_empty() {
        warn!("no bootnodes specified, this node will only discover peers it's dialed by directly");
    }

    let signer = Signer::load_or_create(&Path::new(&data_dir).join("client_key")).expect("failed to load node key");

    let p2p_node_ip = if udp_socket_addr.ip() == Ipv4Addr::new(0, 0, 0, 0) {
        local_ip().expect("failed to determine local ip")
    } else {
        udp_socket_addr.ip()
    };
    let local_node = Node {
        ip: p2p_node_ip,
        udp_port: udp_socket_addr.port(),
        tcp_port: tcp_socket_addr.port(),
        node_id: signer.node_id(),
    };
    info!(enode = %local_node.enode_url(), "starting node");

    let events = EventBus::default();

    let genesis = genesis::dev_genesis();
    let chain = Arc::new(DevChain {
        inner: Chain::new(InMemoryStore::new(), genesis, Vec::new()),
        network_id: NETWORK_ID,
    });
    let state: Arc<dyn ethlink_chain::StateView> = Arc::new(InMemoryStateView::new());

    let discovery_config = DiscoveryConfig {
        udp_addr: udp_socket_addr,
        bootnodes,
        only_confirmed_refresh: false,
    };
    let discovery = DiscoveryService::bind(signer.clone(), discovery_config, events.clone())
        .await
        .expect("failed to bind discovery socket");
    let discovery = discovery.spawn();

    let (p2p_node, new_connections) = P2PNode::new(
        signer.clone(),
        P2PNodeConfig {
            tcp_addr: tcp_socket_addr,
            max_peers,
        },
    );
    p2p_node.clone().start().expect("failed to start p2p listener");

    let (network, inbound) = NetworkCore::new(p2p_node.clone(), chain.clone(), events.clone(), discovery.table());
    network.clone().spawn(new_connections);

    let synchronizer = Synchronizer::new(network.clone(), chain.clone(), events.clone(), SyncConfig::default());
    synchronizer.clone().spawn();

    let pool = Arc::new(TxPool::new());
    let fetcher = Arc::new(TxFetcher::new());

    let tracker = TaskTracker::new();
    tracker.spawn(protocol::run_dispatch_loop(
        inbound,
        network.clone(),
        synchronizer.clone(),
        chain.clone(),
        state.clone(),
        pool.clone(),
        fetcher.clone(),
    ));
    tracker.spawn(protocol::run_maintenance_loop(
        network.clone(),
        chain.clone(),
        state.clone(),
        pool.clone(),
        fetcher.clone(),
    ));

    if matches.get_flag("mine") {
        let coinbase = matches
            .get_one::<String>("miner.coinbase")
            .map(|addr| Address::from_str(addr.trim_start_matches("0x")).expect("invalid miner.coinbase address"))
            .unwrap_or_default();
        let miner = Miner::new(
            chain.clone(),
            Arc::new(InMemoryExecutor),
            pool.clone(),
            state.clone(),
            events.clone(),
            MinerConfig {
                coinbase,
                ..MinerConfig::default()
            },
        );
        miner.spawn();
        info!(%coinbase, "mining enabled");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, stopping...");
            events.publish(ethlink_p2p::Event::ClientShutdown);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

fn parse_socket_addr(addr: &str, port: &str) -> std::io::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    format!("{addr}:{port}")
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "failed to parse socket address"))
}

fn set_datadir(datadir: &str) -> String {
    let project_dir = directories::ProjectDirs::from("", "", datadir).expect("couldn't resolve home directory");
    project_dir
        .data_local_dir()
        .to_str()
        .expect("invalid data directory")
        .to_owned()
}
