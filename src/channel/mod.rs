//! Channel opening
//!
//! The data model of one channel-open attempt, its state machine, and the
//! orchestrator that walks an operator's request through negotiation,
//! funding and handoff.

pub mod orchestrator;
pub mod types;

pub use orchestrator::ChannelOpenOrchestrator;
pub use types::{
    ChannelId, ChannelOpenOutcome, ChannelOpenRequest, FailureReason, FundingIntent, OpenState,
    SignedFundingTransaction, TemporaryChannelId,
};
