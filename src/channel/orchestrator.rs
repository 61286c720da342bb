use crate::channel::{
    ChannelId, ChannelOpenOutcome, ChannelOpenRequest, FailureReason, FundingIntent, OpenState,
    SignedFundingTransaction, TemporaryChannelId,
};
use crate::error::ChannelOpenError;
use crate::network::PeerLink;
use crate::storage::{PendingFunding, PendingFundingStore};
use crate::wallet::WalletEngine;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

type Result<T> = std::result::Result<T, ChannelOpenError>;

/// Move `state` one step, logging the transition
fn advance(label: &str, state: &mut OpenState, next: OpenState) {
    debug_assert!(
        state.can_advance_to(&next),
        "illegal transition {state} -> {next}"
    );
    match next {
        OpenState::Failed(_) => warn!("Channel open {label}: {state} -> {next}"),
        _ => debug!("Channel open {label}: {state} -> {next}"),
    }
    *state = next;
}

/// Removes a user channel id from the in-flight set when the attempt ends
struct InFlight<'a> {
    set: &'a Mutex<HashSet<u64>>,
    user_channel_id: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.user_channel_id);
    }
}

/// Drives a channel open from the operator's request to a handed-off funding transaction
///
/// Negotiation, funding and handoff are separate one-shot steps. Each funded
/// attempt is recorded in the pending store before the wallet is asked for a
/// transaction, so a temporary channel id is funded at most once.
pub struct ChannelOpenOrchestrator {
    peers: Arc<dyn PeerLink>,
    wallet: Arc<dyn WalletEngine>,
    store: PendingFundingStore,
    in_flight: Mutex<HashSet<u64>>,
}

impl ChannelOpenOrchestrator {
    pub fn new(
        peers: Arc<dyn PeerLink>,
        wallet: Arc<dyn WalletEngine>,
        store: PendingFundingStore,
    ) -> Self {
        ChannelOpenOrchestrator {
            peers,
            wallet,
            store,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn begin(&self, user_channel_id: u64) -> Result<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(user_channel_id) {
            return Err(ChannelOpenError::DuplicateRequest(user_channel_id));
        }
        Ok(InFlight {
            set: &self.in_flight,
            user_channel_id,
        })
    }

    /// Negotiate with the counterparty, then fund and hand off the channel
    pub async fn open_channel(&self, request: &ChannelOpenRequest) -> Result<ChannelOpenOutcome> {
        let label = format!("#{}", request.user_channel_id);
        let mut state = OpenState::Requested;

        if request.push_amount_msat > request.channel_value_msat
            || request.funding_satoshis() == 0
        {
            advance(&label, &mut state, OpenState::Failed(FailureReason::InvalidAmount));
            return Err(ChannelOpenError::InvalidAmount {
                channel_value_msat: request.channel_value_msat,
                push_amount_msat: request.push_amount_msat,
            });
        }
        let _in_flight = self.begin(request.user_channel_id)?;

        advance(&label, &mut state, OpenState::Negotiating);
        info!(
            "Requesting channel of {} sat with {}",
            request.funding_satoshis(),
            request.counterparty
        );
        let intent = match self.peers.request_channel(request).await {
            Ok(intent) => intent,
            Err(e) => {
                let e = ChannelOpenError::from(e);
                let reason = match e {
                    ChannelOpenError::PeerRejected(_) => FailureReason::PeerRejected,
                    _ => FailureReason::TransportLost,
                };
                advance(&label, &mut state, OpenState::Failed(reason));
                return Err(e);
            }
        };
        advance(&label, &mut state, OpenState::FundingReady);

        self.fund_and_handoff(request, intent).await
    }

    /// Build the funding transaction for an accepted channel and hand it to the peer
    ///
    /// A second call for the same temporary channel id fails with `AlreadyResolved`
    /// without reaching the wallet.
    pub async fn fund_and_handoff(
        &self,
        request: &ChannelOpenRequest,
        intent: FundingIntent,
    ) -> Result<ChannelOpenOutcome> {
        let id = intent.temporary_channel_id;
        let label = id.to_string();
        let mut record = PendingFunding::new(request, &intent);
        if !self.store.claim(&record)? {
            return Err(ChannelOpenError::AlreadyResolved(id));
        }

        let funding = match self
            .wallet
            .build_funding_transaction(&intent.output_script, intent.required_value_sat)
            .await
        {
            Ok(funding) => funding,
            Err(e) => {
                advance(
                    &label,
                    &mut record.state,
                    OpenState::Failed(FailureReason::FundingBuildError),
                );
                self.store.update(&record)?;
                return Err(ChannelOpenError::FundingBuild(e));
            }
        };
        record.record_transaction(&funding);
        advance(&label, &mut record.state, OpenState::FundingBuilt);
        self.store.update(&record)?;

        self.handoff(record, funding).await
    }

    async fn handoff(
        &self,
        mut record: PendingFunding,
        funding: SignedFundingTransaction,
    ) -> Result<ChannelOpenOutcome> {
        let id = record.temporary_channel_id;
        let label = id.to_string();
        let counterparty = record.counterparty_pubkey()?;

        let channel_id: ChannelId = match self
            .peers
            .handoff_funding_tx(&id, &counterparty, &funding)
            .await
        {
            Ok(channel_id) => channel_id,
            Err(e) => {
                advance(
                    &label,
                    &mut record.state,
                    OpenState::Failed(FailureReason::HandoffLost),
                );
                self.store.update(&record)?;
                return Err(ChannelOpenError::HandoffLost {
                    temporary_channel_id: id,
                    funding_txid: funding.txid.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        record.channel_id = Some(channel_id.to_string());
        advance(&label, &mut record.state, OpenState::Broadcast);
        self.store.update(&record)?;
        advance(&label, &mut record.state, OpenState::Complete);
        self.store.update(&record)?;
        info!("Channel {channel_id} established with {counterparty}");

        Ok(ChannelOpenOutcome {
            temporary_channel_id: id,
            channel_id,
            funding_txid: funding.txid,
            state: record.state,
        })
    }

    /// Retry the handoff of a stored transaction whose first handoff was lost
    ///
    /// The transaction is never rebuilt; the stored bytes are sent as they are.
    pub async fn resume(&self, id: &TemporaryChannelId) -> Result<ChannelOpenOutcome> {
        let record = self
            .store
            .get(id)?
            .ok_or(ChannelOpenError::UnknownPending(*id))?;
        let not_resumable = |record: &PendingFunding| ChannelOpenError::NotResumable {
            temporary_channel_id: *id,
            state: record.state.to_string(),
        };
        if !record.is_resumable() {
            return Err(not_resumable(&record));
        }
        let funding = record
            .signed_transaction()?
            .ok_or_else(|| not_resumable(&record))?;

        let retry = PendingFunding {
            state: OpenState::FundingBuilt,
            ..record.clone()
        };
        // a concurrent resume of the same record loses this swap
        if !self.store.replace(&record, &retry)? {
            return Err(ChannelOpenError::AlreadyResolved(*id));
        }
        info!("Resuming handoff of funding transaction {} for {id}", funding.txid);
        self.handoff(retry, funding).await
    }

    pub fn pending(&self) -> Result<Vec<PendingFunding>> {
        Ok(self.store.list()?)
    }

    /// Records whose signed transaction never reached the peer
    pub fn resumable(&self) -> Result<Vec<PendingFunding>> {
        Ok(self.store.resumable()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HandoffError, NegotiationError, WalletError};
    use crate::testnet::test_utils::{test_intent, test_request, CountingWallet, ScriptedPeerLink};
    use std::time::Duration;
    use tempfile::tempdir;

    struct Harness {
        orchestrator: ChannelOpenOrchestrator,
        peers: Arc<ScriptedPeerLink>,
        wallet: Arc<CountingWallet>,
        store: PendingFundingStore,
        _dir: tempfile::TempDir,
    }

    fn harness(peers: ScriptedPeerLink) -> Harness {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let store = PendingFundingStore::open(&db).unwrap();
        let peers = Arc::new(peers);
        let wallet = Arc::new(CountingWallet::default());
        let orchestrator = ChannelOpenOrchestrator::new(peers.clone(), wallet.clone(), store.clone());
        Harness {
            orchestrator,
            peers,
            wallet,
            store,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_push_above_value_fails_before_any_network_call() {
        let h = harness(ScriptedPeerLink::default());
        let err = h
            .orchestrator
            .open_channel(&test_request(100_000, 100_001, 1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChannelOpenError::InvalidAmount {
                channel_value_msat: 100_000,
                push_amount_msat: 100_001
            }
        );
        assert_eq!(h.peers.requests(), 0);
        assert_eq!(h.wallet.builds(), 0);
    }

    #[tokio::test]
    async fn test_sub_satoshi_channel_is_invalid() {
        let h = harness(ScriptedPeerLink::default());
        let err = h
            .orchestrator
            .open_channel(&test_request(999, 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelOpenError::InvalidAmount { .. }));
        assert_eq!(h.peers.requests(), 0);
    }

    #[tokio::test]
    async fn test_push_equal_to_value_is_allowed() {
        let h = harness(ScriptedPeerLink::default());
        let outcome = h
            .orchestrator
            .open_channel(&test_request(100_000, 100_000, 1))
            .await
            .unwrap();
        assert_eq!(outcome.state, OpenState::Complete);
    }

    #[tokio::test]
    async fn test_complete_flow() {
        let h = harness(ScriptedPeerLink::default());
        let outcome = h
            .orchestrator
            .open_channel(&test_request(250_000_000, 10_000, 7))
            .await
            .unwrap();

        assert_eq!(outcome.state, OpenState::Complete);
        assert_eq!(
            outcome.channel_id,
            ChannelId::from_funding_outpoint(&outcome.funding_txid, 0)
        );
        assert_eq!(h.wallet.builds(), 1);
        assert_eq!(h.peers.handoffs(), 1);

        let record = h.store.get(&outcome.temporary_channel_id).unwrap().unwrap();
        assert_eq!(record.state, OpenState::Complete);
        assert_eq!(record.required_value_sat, 250_000);
        assert_eq!(record.channel_id, Some(outcome.channel_id.to_string()));
    }

    #[tokio::test]
    async fn test_rejection_never_reaches_wallet() {
        let h = harness(ScriptedPeerLink::rejecting(NegotiationError::PeerRejected(
            "channel too small".to_string(),
        )));
        let err = h
            .orchestrator
            .open_channel(&test_request(100_000, 0, 1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChannelOpenError::PeerRejected("channel too small".to_string())
        );
        assert_eq!(h.wallet.builds(), 0);
        assert!(h.orchestrator.pending().unwrap().is_empty());

        // the attempt is over, so the same user id may be tried again
        let again = h
            .orchestrator
            .open_channel(&test_request(100_000, 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(again, ChannelOpenError::PeerRejected(_)));
        assert_eq!(h.peers.requests(), 2);
    }

    #[tokio::test]
    async fn test_transport_loss_during_negotiation() {
        let h = harness(ScriptedPeerLink::rejecting(NegotiationError::TransportLost(
            "connection reset".to_string(),
        )));
        let err = h
            .orchestrator
            .open_channel(&test_request(100_000, 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelOpenError::TransportLost(_)));
        assert_eq!(h.wallet.builds(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_funding_ready_events_fund_once() {
        let h = harness(ScriptedPeerLink::default());
        let request = test_request(100_000_000, 0, 3);
        let intent = test_intent(&request, TemporaryChannelId::new([8; 32]));

        let (first, second) = tokio::join!(
            h.orchestrator.fund_and_handoff(&request, intent.clone()),
            h.orchestrator.fund_and_handoff(&request, intent.clone())
        );
        let results = [first, second];
        let completed = results.iter().filter(|r| r.is_ok()).count();
        let resolved = results
            .iter()
            .filter(|r| matches!(r, Err(ChannelOpenError::AlreadyResolved(_))))
            .count();
        assert_eq!((completed, resolved), (1, 1));
        assert_eq!(h.wallet.builds(), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_terminal() {
        let h = harness(ScriptedPeerLink::default());
        *h.wallet.failure.lock().unwrap() = Some(WalletError::InsufficientFunds {
            required: 100_000,
            available: 5_000,
        });
        let request = test_request(100_000_000, 0, 3);
        let intent = test_intent(&request, TemporaryChannelId::new([9; 32]));

        let err = h
            .orchestrator
            .fund_and_handoff(&request, intent.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelOpenError::FundingBuild(_)));
        let record = h.store.get(&intent.temporary_channel_id).unwrap().unwrap();
        assert_eq!(
            record.state,
            OpenState::Failed(FailureReason::FundingBuildError)
        );

        // the temporary id is never funded again
        *h.wallet.failure.lock().unwrap() = None;
        let err = h
            .orchestrator
            .fund_and_handoff(&request, intent)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelOpenError::AlreadyResolved(_)));
        assert_eq!(h.wallet.builds(), 1);
        assert_eq!(h.peers.handoffs(), 0);
    }

    #[tokio::test]
    async fn test_lost_handoff_is_resumed_without_rebuilding() {
        let peers = ScriptedPeerLink::default();
        peers
            .handoff_failures
            .lock()
            .unwrap()
            .push(HandoffError::TransportLost("peer went away".to_string()));
        let h = harness(peers);

        let err = h
            .orchestrator
            .open_channel(&test_request(100_000_000, 0, 4))
            .await
            .unwrap_err();
        let (id, txid) = match err {
            ChannelOpenError::HandoffLost {
                temporary_channel_id,
                funding_txid,
                ..
            } => (temporary_channel_id, funding_txid),
            other => panic!("unexpected error {other}"),
        };
        let record = h.store.get(&id).unwrap().unwrap();
        assert!(record.is_resumable());
        assert_eq!(h.store.resumable().unwrap().len(), 1);

        let outcome = h.orchestrator.resume(&id).await.unwrap();
        assert_eq!(outcome.state, OpenState::Complete);
        assert_eq!(outcome.funding_txid.to_string(), txid);
        assert_eq!(h.wallet.builds(), 1);
        assert_eq!(h.peers.handoffs(), 2);

        let err = h.orchestrator.resume(&id).await.unwrap_err();
        assert_eq!(
            err,
            ChannelOpenError::NotResumable {
                temporary_channel_id: id,
                state: "Complete".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_resume_unknown_id() {
        let h = harness(ScriptedPeerLink::default());
        let id = TemporaryChannelId::new([1; 32]);
        assert_eq!(
            h.orchestrator.resume(&id).await.unwrap_err(),
            ChannelOpenError::UnknownPending(id)
        );
    }

    #[tokio::test]
    async fn test_duplicate_user_channel_id_in_flight() {
        let h = harness(ScriptedPeerLink {
            negotiation_delay: Duration::from_millis(200),
            ..Default::default()
        });
        let request = test_request(100_000_000, 0, 11);
        let (first, second) = tokio::join!(
            h.orchestrator.open_channel(&request),
            h.orchestrator.open_channel(&request)
        );
        let duplicates = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Err(ChannelOpenError::DuplicateRequest(11))))
            .count();
        assert_eq!(duplicates, 1);
        assert!(first.is_ok() || second.is_ok());
        assert_eq!(h.peers.requests(), 1);
    }
}
