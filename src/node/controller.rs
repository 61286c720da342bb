use crate::chain::{BlockInfo, ChainQueryService};
use crate::error::{ChainQueryError, ConnectError};
use crate::network::{PeerDescriptor, PeerLink};
use crate::wallet::NodeKeys;
use log::info;
use std::sync::Arc;
use std::time::Duration;

/// What `getnodeinfo` reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub network_name: String,
    pub node_id: String,
    pub peer_count: usize,
}

pub struct NodeController {
    keys: Arc<NodeKeys>,
    peers: Arc<dyn PeerLink>,
    chain: Arc<dyn ChainQueryService>,
    connect_timeout: Duration,
}

impl NodeController {
    pub fn new(
        keys: Arc<NodeKeys>,
        peers: Arc<dyn PeerLink>,
        chain: Arc<dyn ChainQueryService>,
        connect_timeout: Duration,
    ) -> Self {
        NodeController {
            keys,
            peers,
            chain,
            connect_timeout,
        }
    }

    /// Connect and wait for the handshake; never retried
    pub async fn connect_peer(&self, pubkey: &str, host: &str, port: u16) -> Result<(), ConnectError> {
        let peer = PeerDescriptor::parse(pubkey, host, port)?;
        if peer.pubkey == self.keys.node_id() {
            return Err(ConnectError::InvalidPubkey(
                "refusing to connect to our own node id".to_string(),
            ));
        }
        info!("Connecting to {peer}");
        self.peers.connect(&peer, self.connect_timeout).await
    }

    /// Snapshot of the connected peers
    pub fn list_peers(&self) -> Vec<String> {
        self.peers
            .list_connected()
            .iter()
            .map(|pubkey| pubkey.to_string())
            .collect()
    }

    pub fn node_status(&self) -> NodeStatus {
        NodeStatus {
            network_name: self.keys.network().to_string(),
            node_id: self.keys.node_id().to_string(),
            peer_count: self.peers.list_connected().len(),
        }
    }

    pub async fn block_info(&self) -> Result<BlockInfo, ChainQueryError> {
        let hash = self.chain.latest_block_hash().await?;
        let height = self.chain.latest_block_height().await?;
        Ok(BlockInfo { hash, height })
    }
}
