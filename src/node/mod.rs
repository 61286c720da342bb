//! Node assembly and the NodeController
//!
//! `Node` wires the configured keys, database, chain source, wallet, peer link
//! and channel orchestrator together. `NodeController` is the thin layer the
//! shell uses for peer management and chain queries.

pub mod controller;

pub use controller::{NodeController, NodeStatus};

use crate::chain::{Broadcaster, ChainQueryService, EsploraClient, UtxoSource};
use crate::channel::ChannelOpenOrchestrator;
use crate::config::Config;
use crate::error::{NodeError, Result};
use crate::network::{InboundPolicy, LinkTimeouts, PeerServer, TcpPeerLink};
use crate::storage::{open_database, PendingFundingStore, WalletUtxoSet};
use crate::wallet::{FixedFeeRate, NodeKeys, OnChainWallet, WalletInfo};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const CHAIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the node reads the chain and sends transactions
#[derive(Clone)]
pub struct ChainBackend {
    pub query: Arc<dyn ChainQueryService>,
    pub utxos: Arc<dyn UtxoSource>,
    pub broadcaster: Arc<dyn Broadcaster>,
}

impl ChainBackend {
    /// One Esplora client serving all three roles
    pub fn esplora(config: &Config) -> Result<ChainBackend> {
        let client = Arc::new(EsploraClient::new(
            config.chain_source_url.clone(),
            CHAIN_REQUEST_TIMEOUT,
        )?);
        Ok(ChainBackend {
            query: client.clone(),
            utxos: client.clone(),
            broadcaster: client,
        })
    }
}

/// A running node: everything the shell dispatches to
pub struct Node {
    pub controller: NodeController,
    pub orchestrator: ChannelOpenOrchestrator,
    pub wallet: Arc<dyn WalletInfo>,
    /// Bound address of the inbound peer server, when one is running
    pub listen_addr: Option<SocketAddr>,
}

impl Node {
    /// Open storage, derive keys and start the inbound peer server if configured
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(config: &Config, backend: ChainBackend) -> Result<Node> {
        let keys = Arc::new(NodeKeys::new(config.seed().as_bytes(), config.network)?);
        info!("Node id {} on {}", keys.node_id(), config.network);

        let db = open_database(&config.home_dir)?;
        let wallet = Arc::new(OnChainWallet::new(
            Arc::clone(&keys),
            WalletUtxoSet::open(&db)?,
            backend.utxos,
            FixedFeeRate::new(config.fee_rate_sat_per_vb),
        )?);
        let link = Arc::new(TcpPeerLink::new(
            Arc::clone(&keys),
            backend.broadcaster,
            LinkTimeouts {
                negotiation: config.negotiation_timeout(),
                handoff: config.handoff_timeout(),
            },
        ));
        let orchestrator = ChannelOpenOrchestrator::new(
            link.clone(),
            wallet.clone(),
            PendingFundingStore::open(&db)?,
        );

        let resumable = orchestrator.resumable()?.len();
        if resumable > 0 {
            info!("{resumable} funding transaction(s) await resumefunding");
        }

        let listen_addr = match &config.listen_addr {
            Some(addr) => Some(Self::spawn_server(config, Arc::clone(&keys), addr).await?),
            None => None,
        };

        let controller = NodeController::new(keys, link, backend.query, config.connect_timeout());
        Ok(Node {
            controller,
            orchestrator,
            wallet,
            listen_addr,
        })
    }

    async fn spawn_server(config: &Config, keys: Arc<NodeKeys>, addr: &str) -> Result<SocketAddr> {
        let listener = PeerServer::bind(addr).await?;
        let local = listener
            .local_addr()
            .map_err(|e| NodeError::Network(format!("Failed to read bound address: {e}")))?;
        let policy = InboundPolicy {
            accept_channels: config.accept_inbound_channels,
            min_channel_sat: config.min_inbound_channel_sat,
        };
        let server = Arc::new(PeerServer::new(keys, policy, config.max_inbound_connections));
        tokio::spawn(async move {
            if let Err(e) = server.run(listener).await {
                error!("Peer server stopped: {e}");
            }
        });
        Ok(local)
    }
}
