use crate::channel::TemporaryChannelId;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_2};
use bitcoin::script::Builder;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{ScriptBuf, Transaction};

/// 2-of-2 multisig over both funding keys, smaller serialized key first
pub fn funding_redeem_script(a: &PublicKey, b: &PublicKey) -> ScriptBuf {
    let (first, second) = if a.serialize() <= b.serialize() {
        (a, b)
    } else {
        (b, a)
    };
    Builder::new()
        .push_opcode(OP_PUSHNUM_2)
        .push_key(&bitcoin::PublicKey::new(*first))
        .push_key(&bitcoin::PublicKey::new(*second))
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// P2WSH output script the funding transaction must pay
pub fn funding_output_script(a: &PublicKey, b: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&funding_redeem_script(a, b).wscript_hash())
}

/// Both sides derive their funding key for a channel from its temporary id
pub fn funding_key_index(temporary_channel_id: &TemporaryChannelId) -> u32 {
    let b = temporary_channel_id.as_bytes();
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Check that `tx` pays `value_sat` to `script` at `output_index`
pub fn check_funding_output(
    tx: &Transaction,
    output_index: u32,
    script: &ScriptBuf,
    value_sat: u64,
) -> std::result::Result<(), String> {
    let output = tx
        .output
        .get(output_index as usize)
        .ok_or_else(|| format!("funding transaction has no output {output_index}"))?;
    if &output.script_pubkey != script {
        return Err("funding output pays the wrong script".to_string());
    }
    if output.value.to_sat() != value_sat {
        return Err(format!(
            "funding output carries {} sat, expected {value_sat}",
            output.value.to_sat()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::test_pubkey;

    #[test]
    fn test_script_is_order_independent() {
        let a = test_pubkey(1);
        let b = test_pubkey(2);
        assert_eq!(funding_output_script(&a, &b), funding_output_script(&b, &a));
        assert!(funding_output_script(&a, &b).is_p2wsh());
        assert_ne!(funding_output_script(&a, &b), funding_output_script(&a, &a));
    }

    #[test]
    fn test_key_index_from_temporary_id() {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&[0, 0, 1, 2]);
        assert_eq!(funding_key_index(&TemporaryChannelId::new(bytes)), 0x0102);
    }
}
