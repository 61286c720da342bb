use crate::chain::UtxoSource;
use crate::channel::SignedFundingTransaction;
use crate::error::{NodeError, WalletError};
use crate::storage::{Keychain, WalletBalance, WalletUtxo, WalletUtxoSet};
use crate::wallet::{
    FixedFeeRate, NodeKeys, WalletEngine, WalletInfo, WalletKey, DUST_LIMIT_SAT,
};
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    consensus, ecdsa, Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::Mutex;

fn storage_err(e: NodeError) -> WalletError {
    WalletError::Storage(e.to_string())
}

/// Inputs chosen for one transaction
struct Selection {
    inputs: Vec<WalletUtxo>,
    change_sat: Option<u64>,
    fee_sat: u64,
}

/// Single-address P2WPKH wallet backed by a chain source and a sled UTXO view
pub struct OnChainWallet {
    keys: Arc<NodeKeys>,
    receive: WalletKey,
    change: WalletKey,
    utxos: WalletUtxoSet,
    source: Arc<dyn UtxoSource>,
    fee_rate: FixedFeeRate,
    // one build at a time, so two builds never select the same output
    build_lock: Mutex<()>,
}

impl OnChainWallet {
    pub fn new(
        keys: Arc<NodeKeys>,
        utxos: WalletUtxoSet,
        source: Arc<dyn UtxoSource>,
        fee_rate: FixedFeeRate,
    ) -> crate::error::Result<OnChainWallet> {
        let receive = keys.wallet_key(Keychain::External)?;
        let change = keys.wallet_key(Keychain::Internal)?;
        Ok(OnChainWallet {
            keys,
            receive,
            change,
            utxos,
            source,
            fee_rate,
            build_lock: Mutex::new(()),
        })
    }

    fn key_for(&self, keychain: Keychain) -> &WalletKey {
        match keychain {
            Keychain::External => &self.receive,
            Keychain::Internal => &self.change,
        }
    }

    /// Refresh the local UTXO view from the chain source
    pub async fn sync(&self) -> Result<(), WalletError> {
        for keychain in [Keychain::External, Keychain::Internal] {
            let address = &self.key_for(keychain).address;
            let utxos = self
                .source
                .list_unspent(address)
                .await
                .map_err(WalletError::Sync)?;
            debug!("{} unspent outputs at {address}", utxos.len());
            self.utxos
                .sync_keychain(keychain, &utxos)
                .map_err(storage_err)?;
        }
        Ok(())
    }

    pub async fn balance(&self) -> Result<WalletBalance, WalletError> {
        self.sync().await?;
        self.utxos.balance().map_err(storage_err)
    }

    /// Largest-first selection until the payment and its fee are covered
    fn select_inputs(
        &self,
        value_sat: u64,
        script_len: usize,
    ) -> Result<Selection, WalletError> {
        let candidates = self.utxos.spendable().map_err(storage_err)?;
        let mut inputs = vec![];
        let mut total: u64 = 0;
        for utxo in candidates {
            if !inputs.is_empty()
                && total >= value_sat + self.fee_rate.fee_for(inputs.len(), script_len, false)
            {
                break;
            }
            total += utxo.value_sat;
            inputs.push(utxo);
        }

        let required = value_sat + self.fee_rate.fee_for(inputs.len().max(1), script_len, false);
        if inputs.is_empty() || total < required {
            return Err(WalletError::InsufficientFunds {
                required,
                available: total,
            });
        }

        let fee_with_change = self.fee_rate.fee_for(inputs.len(), script_len, true);
        let change_sat = total
            .checked_sub(value_sat + fee_with_change)
            .filter(|change| *change >= DUST_LIMIT_SAT);
        let fee_sat = match change_sat {
            Some(_) => fee_with_change,
            // leftover below dust goes to the fee
            None => total - value_sat,
        };
        Ok(Selection {
            inputs,
            change_sat,
            fee_sat,
        })
    }

    fn sign(&self, tx: &mut Transaction, inputs: &[WalletUtxo]) -> Result<(), WalletError> {
        let mut witnesses = Vec::with_capacity(inputs.len());
        {
            let mut cache = SighashCache::new(&*tx);
            for (index, utxo) in inputs.iter().enumerate() {
                let key = self.key_for(utxo.keychain);
                let sighash = cache
                    .p2wpkh_signature_hash(
                        index,
                        &key.script_pubkey,
                        Amount::from_sat(utxo.value_sat),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| WalletError::Signing(e.to_string()))?;
                let message = Message::from_digest(sighash.to_byte_array());
                let signature = ecdsa::Signature {
                    signature: self.keys.secp().sign_ecdsa(&message, &key.secret),
                    sighash_type: EcdsaSighashType::All,
                };
                witnesses.push(Witness::p2wpkh(&signature, &key.public.0));
            }
        }
        for (input, witness) in tx.input.iter_mut().zip(witnesses) {
            input.witness = witness;
        }
        Ok(())
    }
}

#[async_trait]
impl WalletEngine for OnChainWallet {
    async fn build_funding_transaction(
        &self,
        output_script: &ScriptBuf,
        value_sat: u64,
    ) -> Result<SignedFundingTransaction, WalletError> {
        let _guard = self.build_lock.lock().await;
        self.sync().await?;

        let selection = self.select_inputs(value_sat, output_script.len())?;
        let mut input = Vec::with_capacity(selection.inputs.len());
        for utxo in &selection.inputs {
            input.push(TxIn {
                previous_output: utxo.outpoint().map_err(storage_err)?,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            });
        }
        let mut output = vec![TxOut {
            value: Amount::from_sat(value_sat),
            script_pubkey: output_script.clone(),
        }];
        if let Some(change) = selection.change_sat {
            output.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: self.change.script_pubkey.clone(),
            });
        }
        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        };

        self.sign(&mut tx, &selection.inputs)?;
        self.utxos
            .reserve(&selection.inputs)
            .map_err(storage_err)?;

        let txid = tx.compute_txid();
        info!(
            "Built funding transaction {txid}: {value_sat} sat, {} inputs, fee {} sat",
            selection.inputs.len(),
            selection.fee_sat
        );
        Ok(SignedFundingTransaction {
            txid,
            bytes: consensus::encode::serialize(&tx),
            output_index: 0,
        })
    }
}

#[async_trait]
impl WalletInfo for OnChainWallet {
    fn receive_address(&self) -> String {
        self.receive.address.to_string()
    }

    async fn balance(&self) -> Result<WalletBalance, WalletError> {
        OnChainWallet::balance(self).await
    }
}
