//! Key management and the on-chain wallet
//!
//! The channel-open flow only ever asks the wallet for one thing: a signed
//! transaction paying a given script. That request is the `WalletEngine`
//! boundary; `OnChainWallet` is the implementation the node runs with.

pub mod fees;
pub mod keys;
pub mod onchain;

pub use fees::{FixedFeeRate, DEFAULT_FEE_RATE_SAT_PER_VB, DUST_LIMIT_SAT};
pub use keys::{NodeKeys, WalletKey};
pub use onchain::OnChainWallet;

use crate::channel::SignedFundingTransaction;
use crate::error::WalletError;
use crate::storage::WalletBalance;
use async_trait::async_trait;
use bitcoin::ScriptBuf;

#[async_trait]
pub trait WalletEngine: Send + Sync {
    /// Resynchronize, select inputs, then build and sign a transaction paying
    /// `value_sat` to `output_script`. Either returns a fully signed transaction
    /// or leaves the wallet's outputs untouched.
    async fn build_funding_transaction(
        &self,
        output_script: &ScriptBuf,
        value_sat: u64,
    ) -> Result<SignedFundingTransaction, WalletError>;
}

/// Read-only wallet queries the shell exposes to the operator
#[async_trait]
pub trait WalletInfo: Send + Sync {
    fn receive_address(&self) -> String;

    /// Balance after a fresh sync with the chain source
    async fn balance(&self) -> Result<WalletBalance, WalletError>;
}
