use crate::chain::Broadcaster;
use crate::channel::{
    ChannelId, ChannelOpenRequest, FundingIntent, SignedFundingTransaction, TemporaryChannelId,
};
use crate::error::{ConnectError, HandoffError, NegotiationError};
use crate::network::funding::{funding_key_index, funding_output_script};
use crate::network::{PeerConnection, PeerDescriptor, PeerLink, WireMessage};
use crate::utils::{parse_pubkey, to_hex};
use crate::wallet::NodeKeys;
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use log::{debug, info, warn};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// How long the link waits on a peer for each exchange
#[derive(Debug, Clone, Copy)]
pub struct LinkTimeouts {
    pub negotiation: Duration,
    pub handoff: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        LinkTimeouts {
            negotiation: Duration::from_secs(60),
            handoff: Duration::from_secs(30),
        }
    }
}

struct RosterEntry {
    peer: PeerDescriptor,
    conn: Arc<Mutex<PeerConnection>>,
}

/// Outbound peer sessions over TCP
///
/// Each peer has one connection; exchanges with the same peer are serialized
/// on it. A peer whose exchange times out or breaks is dropped from the roster.
pub struct TcpPeerLink {
    keys: Arc<NodeKeys>,
    broadcaster: Arc<dyn Broadcaster>,
    timeouts: LinkTimeouts,
    roster: RwLock<Vec<RosterEntry>>,
}

impl TcpPeerLink {
    pub fn new(
        keys: Arc<NodeKeys>,
        broadcaster: Arc<dyn Broadcaster>,
        timeouts: LinkTimeouts,
    ) -> Self {
        TcpPeerLink {
            keys,
            broadcaster,
            timeouts,
            roster: RwLock::new(vec![]),
        }
    }

    fn connection(&self, pubkey: &PublicKey) -> Option<Arc<Mutex<PeerConnection>>> {
        let roster = self.roster.read().unwrap_or_else(|e| e.into_inner());
        roster
            .iter()
            .find(|entry| &entry.peer.pubkey == pubkey)
            .map(|entry| Arc::clone(&entry.conn))
    }

    fn drop_peer(&self, pubkey: &PublicKey) {
        let mut roster = self.roster.write().unwrap_or_else(|e| e.into_inner());
        roster.retain(|entry| &entry.peer.pubkey != pubkey);
        warn!("Dropped peer {pubkey}");
    }

    async fn handshake(&self, peer: &PeerDescriptor) -> Result<PeerConnection, ConnectError> {
        let addr = peer.address();
        let stream = TcpStream::connect(addr.as_str())
            .await
            .map_err(|e| ConnectError::Transport(format!("{addr}: {e}")))?;
        let mut conn = PeerConnection::new(stream);

        let init = WireMessage::Init {
            node_id: self.keys.node_id().to_string(),
            network: self.keys.network().to_string(),
        };
        conn.send(&init)
            .await
            .map_err(|e| ConnectError::Transport(format!("{addr}: {e}")))?;
        let reply = conn
            .recv()
            .await
            .map_err(|e| ConnectError::Transport(format!("{addr}: {e}")))?;

        match reply {
            Some(WireMessage::Init { node_id, network }) => {
                if node_id != peer.pubkey.to_string() {
                    return Err(ConnectError::Handshake(format!(
                        "expected node {}, {addr} is {node_id}",
                        peer.pubkey
                    )));
                }
                if network != self.keys.network().to_string() {
                    return Err(ConnectError::Handshake(format!(
                        "peer is on {network}, we are on {}",
                        self.keys.network()
                    )));
                }
                Ok(conn)
            }
            Some(WireMessage::Error { message, .. }) => Err(ConnectError::Handshake(message)),
            Some(other) => Err(ConnectError::Handshake(format!(
                "unexpected {} message",
                other.kind()
            ))),
            None => Err(ConnectError::Transport(format!(
                "{addr} closed the connection during handshake"
            ))),
        }
    }
}

#[async_trait]
impl PeerLink for TcpPeerLink {
    async fn connect(&self, peer: &PeerDescriptor, timeout: Duration) -> Result<(), ConnectError> {
        if self.connection(&peer.pubkey).is_some() {
            debug!("Already connected to {}", peer.pubkey);
            return Ok(());
        }

        let conn = tokio::time::timeout(timeout, self.handshake(peer))
            .await
            .map_err(|_| ConnectError::Timeout {
                addr: peer.address(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        let mut roster = self.roster.write().unwrap_or_else(|e| e.into_inner());
        if !roster.iter().any(|entry| entry.peer.pubkey == peer.pubkey) {
            roster.push(RosterEntry {
                peer: peer.clone(),
                conn: Arc::new(Mutex::new(conn)),
            });
        }
        info!("Connected to peer {peer}");
        Ok(())
    }

    async fn request_channel(
        &self,
        request: &ChannelOpenRequest,
    ) -> Result<FundingIntent, NegotiationError> {
        let counterparty = request.counterparty;
        let conn = self
            .connection(&counterparty)
            .ok_or_else(|| NegotiationError::NotConnected(counterparty.to_string()))?;

        let temporary_channel_id = TemporaryChannelId::random();
        let our_key = self
            .keys
            .funding_pubkey(funding_key_index(&temporary_channel_id))
            .map_err(|e| NegotiationError::TransportLost(format!("funding key: {e}")))?;
        let proposal = WireMessage::OpenChannel {
            temporary_channel_id: temporary_channel_id.to_string(),
            funding_satoshis: request.funding_satoshis(),
            push_msat: request.push_amount_msat,
            funding_pubkey: our_key.to_string(),
        };
        debug!("Proposing channel {temporary_channel_id} to {counterparty}");

        let reply = {
            let mut conn = conn.lock().await;
            conn.exchange(&proposal, self.timeouts.negotiation).await
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                self.drop_peer(&counterparty);
                return Err(NegotiationError::TransportLost(e.to_string()));
            }
        };

        match reply {
            WireMessage::AcceptChannel {
                temporary_channel_id: id,
                funding_pubkey,
            } if id == temporary_channel_id.to_string() => {
                let their_key = parse_pubkey(&funding_pubkey).map_err(|e| {
                    NegotiationError::PeerRejected(format!("unusable funding key: {e}"))
                })?;
                info!("Peer {counterparty} accepted channel {temporary_channel_id}");
                Ok(FundingIntent {
                    temporary_channel_id,
                    counterparty,
                    output_script: funding_output_script(&our_key, &their_key),
                    required_value_sat: request.funding_satoshis(),
                })
            }
            WireMessage::Error { message, .. } => Err(NegotiationError::PeerRejected(message)),
            other => Err(NegotiationError::PeerRejected(format!(
                "unexpected {} message",
                other.kind()
            ))),
        }
    }

    async fn handoff_funding_tx(
        &self,
        temporary_channel_id: &TemporaryChannelId,
        counterparty: &PublicKey,
        funding: &SignedFundingTransaction,
    ) -> Result<ChannelId, HandoffError> {
        let conn = self
            .connection(counterparty)
            .ok_or_else(|| HandoffError::NotConnected(counterparty.to_string()))?;

        let created = WireMessage::FundingCreated {
            temporary_channel_id: temporary_channel_id.to_string(),
            funding_txid: funding.txid.to_string(),
            funding_output_index: funding.output_index,
            funding_tx: to_hex(&funding.bytes),
        };
        let reply = {
            let mut conn = conn.lock().await;
            conn.exchange(&created, self.timeouts.handoff).await
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                self.drop_peer(counterparty);
                return Err(HandoffError::TransportLost(e.to_string()));
            }
        };

        let channel_id = match reply {
            WireMessage::FundingSigned {
                temporary_channel_id: id,
                channel_id,
            } if id == temporary_channel_id.to_string() => {
                let expected =
                    ChannelId::from_funding_outpoint(&funding.txid, funding.output_index as u16);
                match ChannelId::from_str(&channel_id) {
                    Ok(signed) if signed == expected => signed,
                    _ => {
                        return Err(HandoffError::PeerRejected(format!(
                            "peer signed channel {channel_id}, expected {expected}"
                        )))
                    }
                }
            }
            WireMessage::Error { message, .. } => return Err(HandoffError::PeerRejected(message)),
            other => {
                return Err(HandoffError::PeerRejected(format!(
                    "unexpected {} message",
                    other.kind()
                )))
            }
        };

        // not established until the chain source has the transaction
        match self.broadcaster.broadcast(&funding.bytes).await {
            Ok(txid) => {
                info!("Funding transaction {txid} broadcast");
                Ok(channel_id)
            }
            Err(e) => {
                warn!("Broadcast of funding transaction {} failed: {e}", funding.txid);
                Err(HandoffError::Broadcast(e))
            }
        }
    }

    fn list_connected(&self) -> Vec<PublicKey> {
        let roster = self.roster.read().unwrap_or_else(|e| e.into_inner());
        roster.iter().map(|entry| entry.peer.pubkey).collect()
    }
}
