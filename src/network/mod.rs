//! Peer-to-peer networking
//!
//! Outbound peers are held by `TcpPeerLink`, which also drives the channel
//! negotiation exchange on behalf of the orchestrator. Inbound peers are served
//! by `PeerServer`, which answers channel proposals from other shells.
//! Both speak the newline-delimited JSON protocol in `wire`.

pub mod connection_limiter;
pub mod funding;
pub mod server;
pub mod tcp_link;
pub mod wire;

pub use connection_limiter::ConnectionLimiter;
pub use server::{InboundPolicy, PeerServer, ServerTimeouts};
pub use tcp_link::{LinkTimeouts, TcpPeerLink};
pub use wire::{PeerConnection, WireMessage};

use crate::channel::{
    ChannelId, ChannelOpenRequest, FundingIntent, SignedFundingTransaction, TemporaryChannelId,
};
use crate::error::{ConnectError, HandoffError, NegotiationError};
use crate::utils::parse_pubkey;
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use std::fmt;
use std::time::Duration;

/// Where to reach a peer and who it must prove to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub pubkey: PublicKey,
    pub host: String,
    pub port: u16,
}

impl PeerDescriptor {
    /// Validate operator input: a 33-byte hex pubkey, a host and a port
    pub fn parse(pubkey: &str, host: &str, port: u16) -> Result<Self, ConnectError> {
        let pubkey = parse_pubkey(pubkey)?;
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(ConnectError::InvalidAddress(format!("bad host {host:?}")));
        }
        if port == 0 {
            return Err(ConnectError::InvalidAddress("port 0".to_string()));
        }
        Ok(PeerDescriptor {
            pubkey,
            host: host.to_string(),
            port,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.pubkey, self.host, self.port)
    }
}

/// The narrow interface the shell and the orchestrator need from the peer layer
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Open a transport session; fails once `timeout` elapses without a handshake
    async fn connect(&self, peer: &PeerDescriptor, timeout: Duration) -> Result<(), ConnectError>;

    /// Propose a channel and wait until the counterparty accepts or refuses it
    async fn request_channel(
        &self,
        request: &ChannelOpenRequest,
    ) -> Result<FundingIntent, NegotiationError>;

    /// Hand a signed funding transaction to the counterparty and broadcast it
    async fn handoff_funding_tx(
        &self,
        temporary_channel_id: &TemporaryChannelId,
        counterparty: &PublicKey,
        funding: &SignedFundingTransaction,
    ) -> Result<ChannelId, HandoffError>;

    /// Peers with an open session, in the order they connected
    fn list_connected(&self) -> Vec<PublicKey>;
}
