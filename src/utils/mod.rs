//! Utility functions and helpers
//!
//! Encoding helpers shared by the stores, the wire codec and the shell.

pub mod hex;
pub mod serialization;

pub use hex::{from_hex, parse_pubkey, to_hex};
pub use serialization::{deserialize, serialize};
