use crate::error::ConnectError;
use bitcoin::secp256k1::PublicKey;
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use std::str::FromStr;

pub fn to_hex(data: &[u8]) -> String {
    HEXLOWER.encode(data)
}

pub fn from_hex(data: &str) -> Option<Vec<u8>> {
    HEXLOWER_PERMISSIVE.decode(data.as_bytes()).ok()
}

/// Parse a 33-byte compressed node public key from hex
pub fn parse_pubkey(data: &str) -> std::result::Result<PublicKey, ConnectError> {
    if data.len() != 66 {
        return Err(ConnectError::InvalidPubkey(format!(
            "{data}: expected 66 hex characters, got {}",
            data.len()
        )));
    }
    PublicKey::from_str(data).map_err(|e| ConnectError::InvalidPubkey(format!("{data}: {e}")))
}
