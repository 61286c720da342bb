use crate::error::NodeError;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{ScriptBuf, Txid};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Correlation id used while a channel is negotiated, before its funding outpoint exists
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct TemporaryChannelId([u8; 32]);

impl TemporaryChannelId {
    pub fn new(bytes: [u8; 32]) -> Self {
        TemporaryChannelId(bytes)
    }

    pub fn random() -> Self {
        TemporaryChannelId(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TemporaryChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.0))
    }
}

impl FromStr for TemporaryChannelId {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER_PERMISSIVE
            .decode(s.as_bytes())
            .map_err(|e| NodeError::Usage(format!("temporary channel id is not hex: {e}")))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            NodeError::Usage(format!(
                "temporary channel id must be 32 bytes, got {}",
                v.len()
            ))
        })?;
        Ok(TemporaryChannelId(bytes))
    }
}

/// Final channel id, derived from the funding outpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId([u8; 32]);

impl ChannelId {
    /// Funding txid with the output index XORed into the last two bytes
    pub fn from_funding_outpoint(txid: &Txid, output_index: u16) -> Self {
        let mut bytes = txid.to_byte_array();
        let index = output_index.to_be_bytes();
        bytes[30] ^= index[0];
        bytes[31] ^= index[1];
        ChannelId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.0))
    }
}

impl FromStr for ChannelId {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER_PERMISSIVE
            .decode(s.as_bytes())
            .map_err(|e| NodeError::Serialization(format!("channel id is not hex: {e}")))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            NodeError::Serialization("channel id must be 32 bytes".to_string())
        })?;
        Ok(ChannelId(bytes))
    }
}

/// An operator's request to open a channel; immutable once submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenRequest {
    pub counterparty: PublicKey,
    pub channel_value_msat: u64,
    pub push_amount_msat: u64,
    /// Caller-chosen correlation token
    pub user_channel_id: u64,
}

impl ChannelOpenRequest {
    /// Satoshis locked in the funding output
    pub fn funding_satoshis(&self) -> u64 {
        self.channel_value_msat / 1000
    }
}

/// Emitted by the negotiation layer once the counterparty accepts the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingIntent {
    pub temporary_channel_id: TemporaryChannelId,
    pub counterparty: PublicKey,
    pub output_script: ScriptBuf,
    pub required_value_sat: u64,
}

/// A fully signed funding transaction, ready for handoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedFundingTransaction {
    pub txid: Txid,
    pub bytes: Vec<u8>,
    /// Index of the output paying the funding script
    pub output_index: u32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum FailureReason {
    InvalidAmount,
    PeerRejected,
    TransportLost,
    FundingBuildError,
    HandoffLost,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureReason::InvalidAmount => "InvalidAmount",
            FailureReason::PeerRejected => "PeerRejected",
            FailureReason::TransportLost => "TransportLost",
            FailureReason::FundingBuildError => "FundingBuildError",
            FailureReason::HandoffLost => "HandoffLost",
        };
        write!(f, "{name}")
    }
}

/// States of one channel-open attempt
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum OpenState {
    Requested,
    Negotiating,
    FundingReady,
    FundingBuilt,
    Broadcast,
    Complete,
    Failed(FailureReason),
}

impl OpenState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpenState::Complete | OpenState::Failed(_))
    }

    /// Only the forward step or a failure is allowed; terminal states never move
    pub fn can_advance_to(&self, next: &OpenState) -> bool {
        use OpenState::*;
        match (self, next) {
            (s, Failed(_)) => !s.is_terminal(),
            (Requested, Negotiating)
            | (Negotiating, FundingReady)
            | (FundingReady, FundingBuilt)
            | (FundingBuilt, Broadcast)
            | (Broadcast, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OpenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenState::Requested => write!(f, "Requested"),
            OpenState::Negotiating => write!(f, "Negotiating"),
            OpenState::FundingReady => write!(f, "FundingReady"),
            OpenState::FundingBuilt => write!(f, "FundingBuilt"),
            OpenState::Broadcast => write!(f, "Broadcast"),
            OpenState::Complete => write!(f, "Complete"),
            OpenState::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

/// Result of a channel open that reached `Complete`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenOutcome {
    pub temporary_channel_id: TemporaryChannelId,
    pub channel_id: ChannelId,
    pub funding_txid: Txid,
    pub state: OpenState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_channel_id_parse() {
        let id = TemporaryChannelId::new([0xab; 32]);
        let parsed: TemporaryChannelId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        assert!("abcd".parse::<TemporaryChannelId>().is_err());
        assert!("zz".repeat(32).parse::<TemporaryChannelId>().is_err());
    }

    #[test]
    fn test_channel_id_xors_output_index() {
        let txid = Txid::from_byte_array([0u8; 32]);
        let channel_id = ChannelId::from_funding_outpoint(&txid, 0x0102);
        let bytes = channel_id.as_bytes();
        assert_eq!(bytes[30], 0x01);
        assert_eq!(bytes[31], 0x02);
        assert!(bytes[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_state_transitions() {
        use OpenState::*;
        assert!(Requested.can_advance_to(&Negotiating));
        assert!(Negotiating.can_advance_to(&FundingReady));
        assert!(FundingReady.can_advance_to(&FundingBuilt));
        assert!(FundingBuilt.can_advance_to(&Broadcast));
        assert!(Broadcast.can_advance_to(&Complete));

        assert!(!Requested.can_advance_to(&FundingBuilt));
        assert!(!FundingBuilt.can_advance_to(&FundingReady));
        assert!(Negotiating.can_advance_to(&Failed(FailureReason::PeerRejected)));

        // terminal states stay put
        assert!(!Complete.can_advance_to(&Failed(FailureReason::HandoffLost)));
        assert!(!Failed(FailureReason::HandoffLost).can_advance_to(&Complete));
    }

    #[test]
    fn test_funding_satoshis_rounds_down() {
        let request = ChannelOpenRequest {
            counterparty: crate::testnet::test_utils::test_pubkey(1),
            channel_value_msat: 100_999,
            push_amount_msat: 0,
            user_channel_id: 1,
        };
        assert_eq!(request.funding_satoshis(), 100);
    }
}
