//! In-memory doubles for the chain source, wallet and peer link
//!
//! Used by unit tests to drive the shell and the channel-open flow without a
//! network or a funded wallet.

pub mod test_utils;

pub use test_utils::*;
