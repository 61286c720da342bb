//! Error handling for the node shell
//!
//! Every failure the shell can report is a typed value. Domain errors live in
//! their own enums and are wrapped by `NodeError` at the outer layers.

use crate::channel::TemporaryChannelId;
use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Top-level error type for the node shell
#[derive(Debug, Clone)]
pub enum NodeError {
    /// Configuration errors
    Config(String),
    /// Database-related errors
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Network communication errors
    Network(String),
    /// Key derivation errors
    Key(String),
    /// Malformed operator input
    Usage(String),
    Connect(ConnectError),
    ChainQuery(ChainQueryError),
    Wallet(WalletError),
    ChannelOpen(ChannelOpenError),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Config(msg) => write!(f, "Configuration error: {msg}"),
            NodeError::Database(msg) => write!(f, "Database error: {msg}"),
            NodeError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            NodeError::Io(msg) => write!(f, "I/O error: {msg}"),
            NodeError::Network(msg) => write!(f, "Network error: {msg}"),
            NodeError::Key(msg) => write!(f, "Key error: {msg}"),
            NodeError::Usage(msg) => write!(f, "Usage error: {msg}"),
            NodeError::Connect(e) => write!(f, "{e}"),
            NodeError::ChainQuery(e) => write!(f, "{e}"),
            NodeError::Wallet(e) => write!(f, "{e}"),
            NodeError::ChannelOpen(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Failure to establish a connection with a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    InvalidPubkey(String),
    InvalidAddress(String),
    /// The transport handshake did not complete within the timeout
    Timeout { addr: String, timeout_ms: u64 },
    /// The TCP connection could not be opened or broke mid-handshake
    Transport(String),
    /// The remote answered but its identity or network did not match
    Handshake(String),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::InvalidPubkey(msg) => write!(f, "Connect error: invalid pubkey: {msg}"),
            ConnectError::InvalidAddress(msg) => {
                write!(f, "Connect error: invalid address: {msg}")
            }
            ConnectError::Timeout { addr, timeout_ms } => {
                write!(
                    f,
                    "Connect error: no handshake from {addr} within {timeout_ms}ms"
                )
            }
            ConnectError::Transport(msg) => write!(f, "Connect error: transport: {msg}"),
            ConnectError::Handshake(msg) => write!(f, "Connect error: handshake: {msg}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Failure of the channel-negotiation exchange with a counterparty
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// The counterparty declined the proposed channel
    PeerRejected(String),
    /// The connection dropped or timed out while waiting for the counterparty
    TransportLost(String),
    NotConnected(String),
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationError::PeerRejected(msg) => write!(f, "peer rejected channel: {msg}"),
            NegotiationError::TransportLost(msg) => write!(f, "transport lost: {msg}"),
            NegotiationError::NotConnected(peer) => write!(f, "peer {peer} is not connected"),
        }
    }
}

impl std::error::Error for NegotiationError {}

/// Failure to deliver a signed funding transaction back to the negotiation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffError {
    NotConnected(String),
    TransportLost(String),
    PeerRejected(String),
    /// The counterparty signed but the transaction never reached the chain source
    Broadcast(ChainQueryError),
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffError::NotConnected(peer) => write!(f, "peer {peer} is not connected"),
            HandoffError::TransportLost(msg) => write!(f, "transport lost: {msg}"),
            HandoffError::PeerRejected(msg) => write!(f, "peer refused funding: {msg}"),
            HandoffError::Broadcast(e) => write!(f, "broadcast failed: {e}"),
        }
    }
}

impl std::error::Error for HandoffError {}

/// Failure of a read against the chain source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainQueryError {
    /// The request never produced a response
    Request(String),
    /// The chain source answered with an HTTP error status
    Status { status: u16, body: String },
    /// The response body was not what the endpoint promises
    Parse(String),
}

impl fmt::Display for ChainQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainQueryError::Request(msg) => write!(f, "Chain query error: request: {msg}"),
            ChainQueryError::Status { status, body } => {
                write!(f, "Chain query error: server returned {status}: {body}")
            }
            ChainQueryError::Parse(msg) => write!(f, "Chain query error: bad response: {msg}"),
        }
    }
}

impl std::error::Error for ChainQueryError {}

/// Failure of the wallet to build or sign a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    InsufficientFunds { required: u64, available: u64 },
    Signing(String),
    /// Resynchronizing with the chain source failed
    Sync(ChainQueryError),
    Storage(String),
    Key(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Wallet error: insufficient funds: required {required} sat, available {available} sat"
                )
            }
            WalletError::Signing(msg) => write!(f, "Wallet error: signing failed: {msg}"),
            WalletError::Sync(e) => write!(f, "Wallet error: sync failed: {e}"),
            WalletError::Storage(msg) => write!(f, "Wallet error: storage: {msg}"),
            WalletError::Key(msg) => write!(f, "Wallet error: key: {msg}"),
        }
    }
}

impl std::error::Error for WalletError {}

/// Terminal failure of one channel-open attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOpenError {
    /// Rejected before any network call
    InvalidAmount {
        channel_value_msat: u64,
        push_amount_msat: u64,
    },
    /// A negotiation with the same user channel id is still in flight
    DuplicateRequest(u64),
    /// Another attempt claimed this temporary channel id, in flight or finished
    AlreadyResolved(TemporaryChannelId),
    PeerRejected(String),
    TransportLost(String),
    FundingBuild(WalletError),
    /// A signed transaction exists but never reached the peer
    HandoffLost {
        temporary_channel_id: TemporaryChannelId,
        funding_txid: String,
        reason: String,
    },
    UnknownPending(TemporaryChannelId),
    NotResumable {
        temporary_channel_id: TemporaryChannelId,
        state: String,
    },
    Storage(String),
}

impl fmt::Display for ChannelOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelOpenError::InvalidAmount {
                channel_value_msat,
                push_amount_msat,
            } => write!(
                f,
                "InvalidAmount: push amount {push_amount_msat} msat with channel value {channel_value_msat} msat"
            ),
            ChannelOpenError::DuplicateRequest(id) => {
                write!(f, "DuplicateRequest: user channel id {id} is already in flight")
            }
            ChannelOpenError::AlreadyResolved(id) => {
                write!(f, "AlreadyResolved: temporary channel id {id} was already claimed")
            }
            ChannelOpenError::PeerRejected(msg) => write!(f, "PeerRejected: {msg}"),
            ChannelOpenError::TransportLost(msg) => write!(f, "TransportLost: {msg}"),
            ChannelOpenError::FundingBuild(e) => write!(f, "FundingBuildError: {e}"),
            ChannelOpenError::HandoffLost {
                temporary_channel_id,
                funding_txid,
                reason,
            } => write!(
                f,
                "HandoffLost: funding tx {funding_txid} for {temporary_channel_id} was not delivered ({reason}); resume with `resumefunding --tempchannelID {temporary_channel_id}`"
            ),
            ChannelOpenError::UnknownPending(id) => {
                write!(f, "No pending funding request for {id}")
            }
            ChannelOpenError::NotResumable {
                temporary_channel_id,
                state,
            } => write!(
                f,
                "Funding request {temporary_channel_id} is in state {state} and cannot be resumed"
            ),
            ChannelOpenError::Storage(msg) => write!(f, "Pending store error: {msg}"),
        }
    }
}

impl std::error::Error for ChannelOpenError {}

impl From<NegotiationError> for ChannelOpenError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::PeerRejected(msg) => ChannelOpenError::PeerRejected(msg),
            NegotiationError::TransportLost(msg) => ChannelOpenError::TransportLost(msg),
            NegotiationError::NotConnected(peer) => {
                ChannelOpenError::TransportLost(format!("peer {peer} is not connected"))
            }
        }
    }
}

impl From<NodeError> for ChannelOpenError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::ChannelOpen(e) => e,
            other => ChannelOpenError::Storage(other.to_string()),
        }
    }
}

impl From<ConnectError> for NodeError {
    fn from(err: ConnectError) -> Self {
        NodeError::Connect(err)
    }
}

impl From<ChainQueryError> for NodeError {
    fn from(err: ChainQueryError) -> Self {
        NodeError::ChainQuery(err)
    }
}

impl From<WalletError> for NodeError {
    fn from(err: WalletError) -> Self {
        NodeError::Wallet(err)
    }
}

impl From<ChannelOpenError> for NodeError {
    fn from(err: ChannelOpenError) -> Self {
        NodeError::ChannelOpen(err)
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

impl From<sled::Error> for NodeError {
    fn from(err: sled::Error) -> Self {
        NodeError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for NodeError {
    fn from(err: bincode::error::EncodeError) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for NodeError {
    fn from(err: bincode::error::DecodeError) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(err: toml::de::Error) -> Self {
        NodeError::Config(err.to_string())
    }
}

impl From<bitcoin::bip32::Error> for NodeError {
    fn from(err: bitcoin::bip32::Error) -> Self {
        NodeError::Key(err.to_string())
    }
}
