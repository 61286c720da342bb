use crate::chain::ChainUtxo;
use crate::error::{NodeError, Result};
use crate::utils::{deserialize, serialize};
use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::str::FromStr;

const UTXO_TREE: &str = "wallet_utxos";

/// Which derivation branch owns an output
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum Keychain {
    External,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct WalletUtxo {
    pub txid: String,
    pub vout: u32,
    pub value_sat: u64,
    pub keychain: Keychain,
    pub confirmed: bool,
    /// Spent by a transaction this wallet signed; never selected again
    pub reserved: bool,
}

impl WalletUtxo {
    pub fn outpoint(&self) -> Result<OutPoint> {
        let txid = Txid::from_str(&self.txid)
            .map_err(|e| NodeError::Serialization(format!("Stored txid is invalid: {e}")))?;
        Ok(OutPoint::new(txid, self.vout))
    }

    fn key(txid: &str, vout: u32) -> String {
        format!("{txid}:{vout}")
    }
}

/// Wallet balance split by spendability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalletBalance {
    pub confirmed_sat: u64,
    pub unconfirmed_sat: u64,
    pub reserved_sat: u64,
}

/// sled-backed view of the outputs the wallet owns
#[derive(Clone)]
pub struct WalletUtxoSet {
    tree: Tree,
}

impl WalletUtxoSet {
    pub fn open(db: &Db) -> Result<WalletUtxoSet> {
        let tree = db
            .open_tree(UTXO_TREE)
            .map_err(|e| NodeError::Database(format!("Failed to open UTXO tree: {e}")))?;
        Ok(WalletUtxoSet { tree })
    }

    pub fn all(&self) -> Result<Vec<WalletUtxo>> {
        let mut utxos = vec![];
        for item in self.tree.iter() {
            let (_, v) = item
                .map_err(|e| NodeError::Database(format!("Failed to iterate UTXO tree: {e}")))?;
            utxos.push(deserialize(v.as_ref())?);
        }
        Ok(utxos)
    }

    /// Replace the outputs of one keychain with what the chain source reports
    ///
    /// Reservations made locally carry over to outputs that are still unspent on chain.
    /// Outputs the chain no longer reports are dropped.
    pub fn sync_keychain(&self, keychain: Keychain, chain_utxos: &[ChainUtxo]) -> Result<()> {
        let existing: HashMap<String, WalletUtxo> = self
            .all()?
            .into_iter()
            .filter(|u| u.keychain == keychain)
            .map(|u| (WalletUtxo::key(&u.txid, u.vout), u))
            .collect();

        let mut batch = sled::Batch::default();
        let mut seen = vec![];
        for utxo in chain_utxos {
            let txid = utxo.txid.to_string();
            let key = WalletUtxo::key(&txid, utxo.vout);
            let reserved = existing.get(&key).map(|u| u.reserved).unwrap_or(false);
            let record = WalletUtxo {
                txid,
                vout: utxo.vout,
                value_sat: utxo.value_sat,
                keychain,
                confirmed: utxo.confirmed,
                reserved,
            };
            batch.insert(key.as_bytes(), serialize(&record)?);
            seen.push(key);
        }
        for key in existing.keys() {
            if !seen.contains(key) {
                batch.remove(key.as_bytes());
            }
        }

        self.tree
            .apply_batch(batch)
            .map_err(|e| NodeError::Database(format!("Failed to update UTXO tree: {e}")))?;
        self.flush()
    }

    /// Unreserved outputs, largest first
    pub fn spendable(&self) -> Result<Vec<WalletUtxo>> {
        let mut utxos: Vec<WalletUtxo> = self.all()?.into_iter().filter(|u| !u.reserved).collect();
        utxos.sort_by(|a, b| b.value_sat.cmp(&a.value_sat));
        Ok(utxos)
    }

    /// Mark outputs as spent by a locally signed transaction
    pub fn reserve(&self, utxos: &[WalletUtxo]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for utxo in utxos {
            let record = WalletUtxo {
                reserved: true,
                ..utxo.clone()
            };
            batch.insert(
                WalletUtxo::key(&utxo.txid, utxo.vout).as_bytes(),
                serialize(&record)?,
            );
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| NodeError::Database(format!("Failed to reserve UTXOs: {e}")))?;
        self.flush()
    }

    pub fn balance(&self) -> Result<WalletBalance> {
        let mut balance = WalletBalance::default();
        for utxo in self.all()? {
            if utxo.reserved {
                balance.reserved_sat += utxo.value_sat;
            } else if utxo.confirmed {
                balance.confirmed_sat += utxo.value_sat;
            } else {
                balance.unconfirmed_sat += utxo.value_sat;
            }
        }
        Ok(balance)
    }

    fn flush(&self) -> Result<()> {
        self.tree
            .flush()
            .map_err(|e| NodeError::Database(format!("Failed to flush UTXO tree: {e}")))?;
        Ok(())
    }
}
