use crate::channel::{
    ChannelOpenRequest, FailureReason, FundingIntent, OpenState, SignedFundingTransaction,
    TemporaryChannelId,
};
use crate::error::{NodeError, Result};
use crate::utils::{deserialize, parse_pubkey, serialize};
use bitcoin::secp256k1::PublicKey;
use bitcoin::Txid;
use log::debug;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::str::FromStr;

const PENDING_FUNDING_TREE: &str = "pending_funding";

/// Persisted record of one funding attempt, keyed by temporary channel id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PendingFunding {
    pub temporary_channel_id: TemporaryChannelId,
    /// Hex-encoded counterparty node id
    pub counterparty: String,
    pub user_channel_id: u64,
    pub channel_value_msat: u64,
    pub push_amount_msat: u64,
    pub output_script: Vec<u8>,
    pub required_value_sat: u64,
    pub funding_txid: Option<String>,
    pub funding_tx: Option<Vec<u8>>,
    pub funding_output_index: Option<u32>,
    pub channel_id: Option<String>,
    pub state: OpenState,
}

impl PendingFunding {
    pub fn new(request: &ChannelOpenRequest, intent: &FundingIntent) -> PendingFunding {
        PendingFunding {
            temporary_channel_id: intent.temporary_channel_id,
            counterparty: intent.counterparty.to_string(),
            user_channel_id: request.user_channel_id,
            channel_value_msat: request.channel_value_msat,
            push_amount_msat: request.push_amount_msat,
            output_script: intent.output_script.to_bytes(),
            required_value_sat: intent.required_value_sat,
            funding_txid: None,
            funding_tx: None,
            funding_output_index: None,
            channel_id: None,
            state: OpenState::FundingReady,
        }
    }

    pub fn record_transaction(&mut self, tx: &SignedFundingTransaction) {
        self.funding_txid = Some(tx.txid.to_string());
        self.funding_tx = Some(tx.bytes.clone());
        self.funding_output_index = Some(tx.output_index);
    }

    /// The stored signed transaction, if the wallet already built one
    pub fn signed_transaction(&self) -> Result<Option<SignedFundingTransaction>> {
        let (Some(txid), Some(bytes), Some(output_index)) = (
            self.funding_txid.as_ref(),
            self.funding_tx.as_ref(),
            self.funding_output_index,
        ) else {
            return Ok(None);
        };
        let txid = Txid::from_str(txid)
            .map_err(|e| NodeError::Serialization(format!("Stored txid is invalid: {e}")))?;
        Ok(Some(SignedFundingTransaction {
            txid,
            bytes: bytes.clone(),
            output_index,
        }))
    }

    pub fn counterparty_pubkey(&self) -> Result<PublicKey> {
        parse_pubkey(&self.counterparty).map_err(NodeError::from)
    }

    pub fn is_resumable(&self) -> bool {
        self.state == OpenState::Failed(FailureReason::HandoffLost) && self.funding_tx.is_some()
    }
}

/// The PendingFundingRequests store
///
/// A record is created exactly once per temporary channel id. The atomic claim is
/// what stops a second wallet call for an id that is already in flight or resolved.
#[derive(Clone)]
pub struct PendingFundingStore {
    tree: Tree,
}

impl PendingFundingStore {
    pub fn open(db: &Db) -> Result<PendingFundingStore> {
        let tree = db.open_tree(PENDING_FUNDING_TREE).map_err(|e| {
            NodeError::Database(format!("Failed to open pending funding tree: {e}"))
        })?;
        Ok(PendingFundingStore { tree })
    }

    /// Insert the record only if its id has never been seen; returns false otherwise
    pub fn claim(&self, record: &PendingFunding) -> Result<bool> {
        let key = record.temporary_channel_id.as_bytes();
        let value = serialize(record)?;
        let swapped = self
            .tree
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))
            .map_err(|e| NodeError::Database(format!("Failed to claim funding record: {e}")))?;
        if swapped.is_err() {
            debug!(
                "Funding record {} already exists",
                record.temporary_channel_id
            );
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Swap `current` for `next` only if the stored record still equals `current`
    pub fn replace(&self, current: &PendingFunding, next: &PendingFunding) -> Result<bool> {
        let old = serialize(current)?;
        let new = serialize(next)?;
        let swapped = self
            .tree
            .compare_and_swap(next.temporary_channel_id.as_bytes(), Some(old), Some(new))
            .map_err(|e| NodeError::Database(format!("Failed to replace funding record: {e}")))?;
        if swapped.is_err() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    pub fn update(&self, record: &PendingFunding) -> Result<()> {
        let value = serialize(record)?;
        self.tree
            .insert(record.temporary_channel_id.as_bytes(), value)
            .map_err(|e| NodeError::Database(format!("Failed to update funding record: {e}")))?;
        self.flush()
    }

    pub fn get(&self, id: &TemporaryChannelId) -> Result<Option<PendingFunding>> {
        let bytes = self
            .tree
            .get(id.as_bytes())
            .map_err(|e| NodeError::Database(format!("Failed to read funding record: {e}")))?;
        match bytes {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<PendingFunding>> {
        let mut records = vec![];
        for item in self.tree.iter() {
            let (_, v) = item.map_err(|e| {
                NodeError::Database(format!("Failed to iterate funding records: {e}"))
            })?;
            records.push(deserialize(v.as_ref())?);
        }
        Ok(records)
    }

    /// Records holding a signed transaction that never reached the peer
    pub fn resumable(&self) -> Result<Vec<PendingFunding>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(PendingFunding::is_resumable)
            .collect())
    }

    fn flush(&self) -> Result<()> {
        self.tree
            .flush()
            .map_err(|e| NodeError::Database(format!("Failed to flush funding records: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::{test_intent, test_request};
    use tempfile::tempdir;

    fn open_store() -> (PendingFundingStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        (PendingFundingStore::open(&db).unwrap(), dir)
    }

    #[test]
    fn test_claim_is_once_per_id() {
        let (store, _dir) = open_store();
        let request = test_request(100_000, 0, 1);
        let intent = test_intent(&request, TemporaryChannelId::new([1; 32]));
        let record = PendingFunding::new(&request, &intent);

        assert!(store.claim(&record).unwrap());
        assert!(!store.claim(&record).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_update_and_resumable() {
        let (store, _dir) = open_store();
        let request = test_request(100_000, 0, 1);
        let intent = test_intent(&request, TemporaryChannelId::new([2; 32]));
        let mut record = PendingFunding::new(&request, &intent);
        store.claim(&record).unwrap();
        assert!(store.resumable().unwrap().is_empty());

        let tx = crate::testnet::test_utils::test_signed_tx(&intent);
        record.record_transaction(&tx);
        record.state = OpenState::Failed(FailureReason::HandoffLost);
        store.update(&record).unwrap();

        let stored = store.get(&intent.temporary_channel_id).unwrap().unwrap();
        assert_eq!(stored.state, OpenState::Failed(FailureReason::HandoffLost));
        assert_eq!(stored.signed_transaction().unwrap(), Some(tx));
        assert_eq!(store.resumable().unwrap().len(), 1);
    }

    #[test]
    fn test_replace_only_from_expected_record() {
        let (store, _dir) = open_store();
        let request = test_request(100_000, 0, 1);
        let intent = test_intent(&request, TemporaryChannelId::new([4; 32]));
        let record = PendingFunding::new(&request, &intent);
        store.claim(&record).unwrap();

        let built = PendingFunding {
            state: OpenState::FundingBuilt,
            ..record.clone()
        };
        assert!(store.replace(&record, &built).unwrap());
        // the stored record moved on, so a second swap from the old one fails
        assert!(!store.replace(&record, &built).unwrap());
        assert_eq!(
            store.get(&intent.temporary_channel_id).unwrap().unwrap().state,
            OpenState::FundingBuilt
        );
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let id = TemporaryChannelId::new([3; 32]);
        {
            let db = sled::open(dir.path().join("db")).unwrap();
            let store = PendingFundingStore::open(&db).unwrap();
            let request = test_request(100_000, 0, 1);
            let intent = test_intent(&request, id);
            store.claim(&PendingFunding::new(&request, &intent)).unwrap();
        }
        let db = sled::open(dir.path().join("db")).unwrap();
        let store = PendingFundingStore::open(&db).unwrap();
        assert!(store.get(&id).unwrap().is_some());
    }
}
