use crate::channel::{ChannelId, TemporaryChannelId};
use crate::error::{NodeError, Result};
use crate::network::funding::{check_funding_output, funding_key_index, funding_output_script};
use crate::network::{ConnectionLimiter, PeerConnection, WireMessage};
use crate::utils::{from_hex, parse_pubkey};
use crate::wallet::NodeKeys;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{consensus, ScriptBuf, Transaction, Txid};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// A connected peer that sends nothing for this long is disconnected
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
/// Accepted proposals never funded within this window are forgotten
const PROPOSAL_TTL: Duration = Duration::from_secs(600);
/// Signed channels are remembered this long so a retried handoff gets the same answer
const SIGNED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_PROPOSALS_PER_PEER: usize = 16;
const MAX_TRACKED_CHANNELS: usize = 1024;

/// Which inbound channel proposals this node agrees to
#[derive(Debug, Clone, Copy)]
pub struct InboundPolicy {
    pub accept_channels: bool,
    pub min_channel_sat: u64,
}

impl Default for InboundPolicy {
    fn default() -> Self {
        InboundPolicy {
            accept_channels: true,
            min_channel_sat: 1,
        }
    }
}

/// A channel proposed to us by a connected peer
struct InboundChannel {
    counterparty: PublicKey,
    funding_satoshis: u64,
    output_script: ScriptBuf,
    signed: Option<(Txid, ChannelId)>,
    /// When the proposal was accepted, or when it was signed
    touched: Instant,
}

/// How long the server keeps connections and channel state around
#[derive(Debug, Clone, Copy)]
pub struct ServerTimeouts {
    pub idle: Duration,
    pub proposal_ttl: Duration,
    pub signed_retention: Duration,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        ServerTimeouts {
            idle: IDLE_TIMEOUT,
            proposal_ttl: PROPOSAL_TTL,
            signed_retention: SIGNED_RETENTION,
        }
    }
}

/// Accepts connections from other shells and answers their channel proposals
///
/// The accepting side only countersigns: it checks the funding transaction pays
/// the agreed script and value and returns the channel id. It never spends.
pub struct PeerServer {
    keys: Arc<NodeKeys>,
    policy: InboundPolicy,
    limiter: ConnectionLimiter,
    timeouts: ServerTimeouts,
    channels: RwLock<HashMap<TemporaryChannelId, InboundChannel>>,
}

impl PeerServer {
    pub fn new(keys: Arc<NodeKeys>, policy: InboundPolicy, max_connections: usize) -> Self {
        PeerServer {
            keys,
            policy,
            limiter: ConnectionLimiter::new(max_connections),
            timeouts: ServerTimeouts::default(),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub async fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| NodeError::Network(format!("Failed to bind to {addr}: {e}")))
    }

    /// Accept connections until the listener fails
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("Peer server listening on {addr}");
        }
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    continue;
                }
            };

            if !self.limiter.should_accept_connection().unwrap_or(false) {
                warn!("Rejecting connection from {peer_addr}: connection limit reached");
                continue;
            }
            if let Err(e) = self.limiter.record_connection(peer_addr) {
                warn!("Failed to record connection: {e}");
            }

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                let result = Arc::clone(&server).handle_connection(stream, peer_addr).await;

                if let Err(e) = server.limiter.record_disconnection(peer_addr) {
                    warn!("Failed to record disconnection: {e}");
                }
                if let Err(e) = result {
                    error!("Error handling connection from {peer_addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let mut conn = PeerConnection::new(stream);
        let remote = match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake(&mut conn)).await {
            Ok(remote) => remote?,
            Err(_) => {
                return Err(NodeError::Network(format!(
                    "no handshake from {peer_addr} within {}s",
                    HANDSHAKE_TIMEOUT.as_secs()
                )))
            }
        };
        info!("Peer {remote} connected from {peer_addr}");

        loop {
            let message = match tokio::time::timeout(self.timeouts.idle, conn.recv()).await {
                Ok(message) => message?,
                Err(_) => {
                    info!(
                        "Closing connection from {remote}: idle for {}s",
                        self.timeouts.idle.as_secs()
                    );
                    break;
                }
            };
            let Some(message) = message else {
                info!("Peer {remote} disconnected");
                break;
            };
            debug!("Received {} from {remote}", message.kind());
            let reply = self.process_message(&remote, message);
            conn.send(&reply).await?;
        }
        Ok(())
    }

    /// Drop unfunded proposals past their TTL and signed channels past retention
    fn prune(&self, channels: &mut HashMap<TemporaryChannelId, InboundChannel>) {
        let before = channels.len();
        channels.retain(|_, c| {
            let age = c.touched.elapsed();
            match c.signed {
                Some(_) => age < self.timeouts.signed_retention,
                None => age < self.timeouts.proposal_ttl,
            }
        });
        if channels.len() < before {
            debug!("Forgot {} stale inbound channels", before - channels.len());
        }
    }

    async fn handshake(&self, conn: &mut PeerConnection) -> Result<PublicKey> {
        let (node_id, network) = match conn.recv().await? {
            Some(WireMessage::Init { node_id, network }) => (node_id, network),
            Some(other) => {
                return Err(NodeError::Network(format!(
                    "expected init, got {}",
                    other.kind()
                )))
            }
            None => return Err(NodeError::Network("closed before init".to_string())),
        };

        let ours = self.keys.network().to_string();
        if network != ours {
            let refusal = WireMessage::error(None, format!("wrong network {network}, expected {ours}"));
            conn.send(&refusal).await?;
            return Err(NodeError::Network(format!("peer on wrong network {network}")));
        }
        let remote = match parse_pubkey(&node_id) {
            Ok(remote) => remote,
            Err(e) => {
                conn.send(&WireMessage::error(None, e.to_string())).await?;
                return Err(NodeError::Connect(e));
            }
        };

        conn.send(&WireMessage::Init {
            node_id: self.keys.node_id().to_string(),
            network: ours,
        })
        .await?;
        Ok(remote)
    }

    fn process_message(&self, remote: &PublicKey, message: WireMessage) -> WireMessage {
        let result = match message {
            WireMessage::OpenChannel {
                temporary_channel_id,
                funding_satoshis,
                push_msat,
                funding_pubkey,
            } => self.handle_open_channel(
                remote,
                &temporary_channel_id,
                funding_satoshis,
                push_msat,
                &funding_pubkey,
            ),
            WireMessage::FundingCreated {
                temporary_channel_id,
                funding_txid,
                funding_output_index,
                funding_tx,
            } => self.handle_funding_created(
                remote,
                &temporary_channel_id,
                &funding_txid,
                funding_output_index,
                &funding_tx,
            ),
            other => Err((None, format!("unexpected {} message", other.kind()))),
        };
        result.unwrap_or_else(|(temporary_channel_id, message)| {
            warn!("Refusing request from {remote}: {message}");
            WireMessage::error(temporary_channel_id, message)
        })
    }

    fn handle_open_channel(
        &self,
        remote: &PublicKey,
        temporary_channel_id: &str,
        funding_satoshis: u64,
        push_msat: u64,
        funding_pubkey: &str,
    ) -> std::result::Result<WireMessage, (Option<String>, String)> {
        let refuse = |message: String| (Some(temporary_channel_id.to_string()), message);
        let id = TemporaryChannelId::from_str(temporary_channel_id)
            .map_err(|e| (None, e.to_string()))?;

        if !self.policy.accept_channels {
            return Err(refuse("not accepting inbound channels".to_string()));
        }
        if funding_satoshis < self.policy.min_channel_sat {
            return Err(refuse(format!(
                "channel of {funding_satoshis} sat is below minimum {}",
                self.policy.min_channel_sat
            )));
        }
        if push_msat > funding_satoshis.saturating_mul(1000) {
            return Err(refuse(format!(
                "push of {push_msat} msat exceeds channel value"
            )));
        }
        let their_key = parse_pubkey(funding_pubkey).map_err(|e| refuse(e.to_string()))?;
        let our_key = self
            .keys
            .funding_pubkey(funding_key_index(&id))
            .map_err(|e| refuse(e.to_string()))?;

        let mut channels = self
            .channels
            .write()
            .map_err(|e| refuse(format!("Failed to acquire channel lock: {e}")))?;
        self.prune(&mut channels);
        if channels.contains_key(&id) {
            return Err(refuse("duplicate temporary channel id".to_string()));
        }
        let open_proposals = channels
            .values()
            .filter(|c| c.signed.is_none() && &c.counterparty == remote)
            .count();
        if open_proposals >= MAX_PROPOSALS_PER_PEER {
            return Err(refuse(format!(
                "too many unfunded proposals ({open_proposals})"
            )));
        }
        if channels.len() >= MAX_TRACKED_CHANNELS {
            return Err(refuse("too many channels in progress".to_string()));
        }
        channels.insert(
            id,
            InboundChannel {
                counterparty: *remote,
                funding_satoshis,
                output_script: funding_output_script(&our_key, &their_key),
                signed: None,
                touched: Instant::now(),
            },
        );
        info!("Accepted channel {id} of {funding_satoshis} sat from {remote}");

        Ok(WireMessage::AcceptChannel {
            temporary_channel_id: id.to_string(),
            funding_pubkey: our_key.to_string(),
        })
    }

    fn handle_funding_created(
        &self,
        remote: &PublicKey,
        temporary_channel_id: &str,
        funding_txid: &str,
        funding_output_index: u32,
        funding_tx: &str,
    ) -> std::result::Result<WireMessage, (Option<String>, String)> {
        let refuse = |message: String| (Some(temporary_channel_id.to_string()), message);
        let id = TemporaryChannelId::from_str(temporary_channel_id)
            .map_err(|e| (None, e.to_string()))?;
        let bytes = from_hex(funding_tx).ok_or_else(|| refuse("funding tx is not hex".to_string()))?;
        let tx: Transaction = consensus::encode::deserialize(&bytes)
            .map_err(|e| refuse(format!("funding tx does not decode: {e}")))?;
        let txid = tx.compute_txid();
        if txid.to_string() != funding_txid {
            return Err(refuse(format!("funding tx is {txid}, not {funding_txid}")));
        }
        let index = u16::try_from(funding_output_index)
            .map_err(|_| refuse(format!("output index {funding_output_index} out of range")))?;

        let mut channels = self
            .channels
            .write()
            .map_err(|e| refuse(format!("Failed to acquire channel lock: {e}")))?;
        let channel = channels
            .get_mut(&id)
            .filter(|c| &c.counterparty == remote)
            .ok_or_else(|| refuse("unknown temporary channel id".to_string()))?;

        let channel_id = match channel.signed {
            // a retried handoff gets the same answer
            Some((signed_txid, channel_id)) if signed_txid == txid => channel_id,
            Some((signed_txid, _)) => {
                return Err(refuse(format!("already funded by {signed_txid}")));
            }
            None => {
                check_funding_output(
                    &tx,
                    funding_output_index,
                    &channel.output_script,
                    channel.funding_satoshis,
                )
                .map_err(refuse)?;
                let channel_id = ChannelId::from_funding_outpoint(&txid, index);
                channel.signed = Some((txid, channel_id));
                channel.touched = Instant::now();
                info!("Signed channel {channel_id} funded by {txid}");
                channel_id
            }
        };

        Ok(WireMessage::FundingSigned {
            temporary_channel_id: id.to_string(),
            channel_id: channel_id.to_string(),
        })
    }

    /// Channels this server has countersigned
    pub fn signed_channels(&self) -> Vec<ChannelId> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels
            .values()
            .filter_map(|c| c.signed.map(|(_, channel_id)| channel_id))
            .collect()
    }
}
