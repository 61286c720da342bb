//! Chain source access
//!
//! Read-only queries against an external chain source, plus the two narrow
//! capabilities the wallet and the peer link need from it: listing unspent
//! outputs for an address and broadcasting a transaction. Nothing here caches
//! or retries; a failure is returned to the caller as a `ChainQueryError`.

pub mod esplora;

pub use esplora::EsploraClient;

use crate::error::ChainQueryError;
use async_trait::async_trait;
use bitcoin::{Address, Txid};

/// Tip of the chain as reported by the chain source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: String,
    pub height: u64,
}

/// An unspent output as reported by the chain source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainUtxo {
    pub txid: Txid,
    pub vout: u32,
    pub value_sat: u64,
    pub confirmed: bool,
}

#[async_trait]
pub trait ChainQueryService: Send + Sync {
    async fn latest_block_hash(&self) -> Result<String, ChainQueryError>;

    async fn latest_block_height(&self) -> Result<u64, ChainQueryError>;
}

#[async_trait]
pub trait UtxoSource: Send + Sync {
    async fn list_unspent(&self, address: &Address) -> Result<Vec<ChainUtxo>, ChainQueryError>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Submit a serialized transaction and return the txid the chain source reports
    async fn broadcast(&self, tx: &[u8]) -> Result<Txid, ChainQueryError>;
}
