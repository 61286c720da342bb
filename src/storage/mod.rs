//! Data storage and persistence
//!
//! Everything the node must remember across restarts lives in one sled
//! database under the home directory: the wallet's UTXO view and the
//! PendingFundingRequests store.

pub mod pending;
pub mod utxo_set;

pub use pending::{PendingFunding, PendingFundingStore};
pub use utxo_set::{Keychain, WalletBalance, WalletUtxo, WalletUtxoSet};

use crate::error::{NodeError, Result};
use sled::Db;
use std::path::Path;

const DB_DIR: &str = "db";

/// Open (or create) the node database inside `home_dir`
pub fn open_database(home_dir: &Path) -> Result<Db> {
    let path = home_dir.join(DB_DIR);
    sled::open(&path).map_err(|e| {
        NodeError::Database(format!("Failed to open database {}: {e}", path.display()))
    })
}
