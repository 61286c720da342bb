//! # lnshell - An Interactive Lightning Node Shell
//!
//! A small Lightning node driven from a command prompt. When I come back to
//! this code, here's what I need to remember:
//!
//! ## What It Does
//! - **Peers**: connects to other nodes over TCP and keeps them in a roster
//! - **Channel Opens**: walks a request through negotiation, funding and handoff
//! - **Funding Safety**: one funding transaction per temporary channel id, even under retries
//! - **Wallet**: BIP32 keys, P2WPKH outputs synced from an Esplora server
//! - **Recovery**: a funding transaction whose handoff was lost can be resumed
//!
//! ## How the Code Is Organized
//! - `cli/`: process flags, the shell grammar and the read-eval loop
//! - `node/`: assembles a running node and the controller the shell talks to
//! - `channel/`: channel-open data model, state machine and orchestrator
//! - `network/`: wire protocol, outbound peer link and inbound peer server
//! - `wallet/`: key derivation, fee policy and the on-chain wallet
//! - `chain/`: chain-source traits and the Esplora client
//! - `storage/`: sled trees for wallet outputs and pending funding records
//! - `config/`: layered configuration
//! - `utils/`: hex and serialization helpers
//!
//! ## Where to Start Reading
//! 1. `main.rs` for startup
//! 2. `cli/shell.rs` for how each command is dispatched
//! 3. `channel/orchestrator.rs` for the channel-open flow
//! 4. `storage/pending.rs` for how duplicate funding is prevented

pub mod chain;
pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod network;
pub mod node;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use chain::{Broadcaster, ChainQueryService, EsploraClient, UtxoSource};
pub use channel::{
    ChannelId, ChannelOpenOrchestrator, ChannelOpenOutcome, ChannelOpenRequest, OpenState,
    TemporaryChannelId,
};
pub use cli::{CommandShell, Opt, ShellCommand, ShellOutcome};
pub use config::{Config, ConfigOverrides};
pub use error::{ChannelOpenError, ConnectError, NodeError, Result};
pub use network::{PeerDescriptor, PeerLink, PeerServer, TcpPeerLink};
pub use node::{ChainBackend, Node, NodeController};
pub use storage::{PendingFunding, PendingFundingStore};
pub use wallet::{NodeKeys, OnChainWallet, WalletEngine, WalletInfo};
