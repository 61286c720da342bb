//! Test doubles and fixtures shared by the unit tests

use crate::chain::{Broadcaster, ChainQueryService, ChainUtxo, UtxoSource};
use crate::channel::{
    ChannelId, ChannelOpenRequest, FundingIntent, SignedFundingTransaction, TemporaryChannelId,
};
use crate::error::{ChainQueryError, ConnectError, HandoffError, NegotiationError, WalletError};
use crate::network::{PeerDescriptor, PeerLink};
use crate::storage::WalletBalance;
use crate::wallet::{WalletEngine, WalletInfo};
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    consensus, Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Deterministic public key; `n` must be non-zero
pub fn test_pubkey(n: u8) -> PublicKey {
    let secret = SecretKey::from_slice(&[n; 32]).unwrap();
    secret.public_key(&Secp256k1::new())
}

pub fn test_request(channel_value_msat: u64, push_amount_msat: u64, user_channel_id: u64) -> ChannelOpenRequest {
    ChannelOpenRequest {
        counterparty: test_pubkey(2),
        channel_value_msat,
        push_amount_msat,
        user_channel_id,
    }
}

pub fn test_intent(request: &ChannelOpenRequest, id: TemporaryChannelId) -> FundingIntent {
    FundingIntent {
        temporary_channel_id: id,
        counterparty: request.counterparty,
        output_script: ScriptBuf::new_p2wsh(&bitcoin::WScriptHash::all_zeros()),
        required_value_sat: request.funding_satoshis(),
    }
}

/// A transaction with one placeholder input paying `value_sat` to `script`
pub fn funding_tx_paying(script: &ScriptBuf, value_sat: u64) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([9; 32]), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::from_slice(&[vec![1u8; 72], vec![2u8; 33]]),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value_sat),
            script_pubkey: script.clone(),
        }],
    }
}

pub fn test_signed_tx(intent: &FundingIntent) -> SignedFundingTransaction {
    let tx = funding_tx_paying(&intent.output_script, intent.required_value_sat);
    SignedFundingTransaction {
        txid: tx.compute_txid(),
        bytes: consensus::encode::serialize(&tx),
        output_index: 0,
    }
}

pub fn chain_utxo(seed: u8, vout: u32, value_sat: u64) -> ChainUtxo {
    ChainUtxo {
        txid: Txid::from_byte_array([seed; 32]),
        vout,
        value_sat,
        confirmed: true,
    }
}

/// UTXO source answering from a fixed per-address table
#[derive(Default)]
pub struct FixedUtxoSource {
    utxos: Mutex<HashMap<String, Vec<ChainUtxo>>>,
    failure: Mutex<Option<ChainQueryError>>,
}

impl FixedUtxoSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &Address, utxos: Vec<ChainUtxo>) {
        self.utxos.lock().unwrap().insert(address.to_string(), utxos);
    }

    pub fn fail_with(&self, error: ChainQueryError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl UtxoSource for FixedUtxoSource {
    async fn list_unspent(&self, address: &Address) -> Result<Vec<ChainUtxo>, ChainQueryError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .get(&address.to_string())
            .cloned()
            .unwrap_or_default())
    }
}

/// Broadcaster that remembers what it accepted
#[derive(Default)]
pub struct RecordingBroadcaster {
    pub broadcasts: Mutex<Vec<Vec<u8>>>,
    /// Failures returned by the next broadcasts, in order
    pub failures: Mutex<Vec<ChainQueryError>>,
}

impl RecordingBroadcaster {
    pub fn failing_once(error: ChainQueryError) -> Self {
        RecordingBroadcaster {
            failures: Mutex::new(vec![error]),
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast(&self, tx: &[u8]) -> Result<Txid, ChainQueryError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        let decoded: Transaction = consensus::encode::deserialize(tx)
            .map_err(|e| ChainQueryError::Parse(e.to_string()))?;
        self.broadcasts.lock().unwrap().push(tx.to_vec());
        Ok(decoded.compute_txid())
    }
}

/// Chain source with a fixed tip, or a fixed failure
pub struct FixedChainQuery {
    pub tip: Result<(String, u64), ChainQueryError>,
}

impl FixedChainQuery {
    pub fn at(hash: &str, height: u64) -> Self {
        FixedChainQuery {
            tip: Ok((hash.to_string(), height)),
        }
    }

    pub fn failing(error: ChainQueryError) -> Self {
        FixedChainQuery { tip: Err(error) }
    }
}

#[async_trait]
impl ChainQueryService for FixedChainQuery {
    async fn latest_block_hash(&self) -> Result<String, ChainQueryError> {
        self.tip.clone().map(|(hash, _)| hash)
    }

    async fn latest_block_height(&self) -> Result<u64, ChainQueryError> {
        self.tip.clone().map(|(_, height)| height)
    }
}

/// Peer link whose answers are scripted by the test, counting every call
pub struct ScriptedPeerLink {
    pub connected: Mutex<Vec<PublicKey>>,
    pub connect_result: Mutex<Result<(), ConnectError>>,
    pub negotiation: Mutex<Result<(), NegotiationError>>,
    /// Failures returned by the next handoffs, in order; success once exhausted
    pub handoff_failures: Mutex<Vec<HandoffError>>,
    /// Delay before the link answers a channel request
    pub negotiation_delay: Duration,
    pub connect_calls: AtomicUsize,
    pub request_calls: AtomicUsize,
    pub handoff_calls: AtomicUsize,
}

impl Default for ScriptedPeerLink {
    fn default() -> Self {
        ScriptedPeerLink {
            connected: Mutex::new(vec![]),
            connect_result: Mutex::new(Ok(())),
            negotiation: Mutex::new(Ok(())),
            handoff_failures: Mutex::new(vec![]),
            negotiation_delay: Duration::ZERO,
            connect_calls: AtomicUsize::new(0),
            request_calls: AtomicUsize::new(0),
            handoff_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedPeerLink {
    pub fn rejecting(error: NegotiationError) -> Self {
        ScriptedPeerLink {
            negotiation: Mutex::new(Err(error)),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }

    pub fn handoffs(&self) -> usize {
        self.handoff_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for ScriptedPeerLink {
    async fn connect(&self, peer: &PeerDescriptor, _timeout: Duration) -> Result<(), ConnectError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_result.lock().unwrap().clone()?;
        let mut connected = self.connected.lock().unwrap();
        if !connected.contains(&peer.pubkey) {
            connected.push(peer.pubkey);
        }
        Ok(())
    }

    async fn request_channel(
        &self,
        request: &ChannelOpenRequest,
    ) -> Result<FundingIntent, NegotiationError> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        if !self.negotiation_delay.is_zero() {
            tokio::time::sleep(self.negotiation_delay).await;
        }
        self.negotiation.lock().unwrap().clone()?;
        Ok(test_intent(request, TemporaryChannelId::random()))
    }

    async fn handoff_funding_tx(
        &self,
        _temporary_channel_id: &TemporaryChannelId,
        _counterparty: &PublicKey,
        funding: &SignedFundingTransaction,
    ) -> Result<ChannelId, HandoffError> {
        self.handoff_calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.handoff_failures.lock().unwrap();
        if !failures.is_empty() {
            return Err(failures.remove(0));
        }
        Ok(ChannelId::from_funding_outpoint(
            &funding.txid,
            funding.output_index as u16,
        ))
    }

    fn list_connected(&self) -> Vec<PublicKey> {
        self.connected.lock().unwrap().clone()
    }
}

/// Wallet that signs a placeholder transaction and counts builds
#[derive(Default)]
pub struct CountingWallet {
    pub failure: Mutex<Option<WalletError>>,
    pub build_calls: AtomicUsize,
}

impl CountingWallet {
    pub fn builds(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletEngine for CountingWallet {
    async fn build_funding_transaction(
        &self,
        output_script: &ScriptBuf,
        value_sat: u64,
    ) -> Result<SignedFundingTransaction, WalletError> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let tx = funding_tx_paying(output_script, value_sat);
        Ok(SignedFundingTransaction {
            txid: tx.compute_txid(),
            bytes: consensus::encode::serialize(&tx),
            output_index: 0,
        })
    }
}

#[async_trait]
impl WalletInfo for CountingWallet {
    fn receive_address(&self) -> String {
        "bcrt1qtestaddress".to_string()
    }

    async fn balance(&self) -> Result<WalletBalance, WalletError> {
        Ok(WalletBalance {
            confirmed_sat: 150_000,
            ..Default::default()
        })
    }
}
