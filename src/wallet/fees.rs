use log::debug;

/// Fee rate used for funding transactions unless configured otherwise
pub const DEFAULT_FEE_RATE_SAT_PER_VB: u64 = 4;
/// Smallest change output worth creating (P2WPKH dust threshold)
pub const DUST_LIMIT_SAT: u64 = 294;

// version + locktime + in/out counts + segwit marker and flag, rounded up
const TX_OVERHEAD_VB: u64 = 11;
// outpoint + sequence + empty script_sig + discounted signature and pubkey
const P2WPKH_INPUT_VB: u64 = 68;
const P2WPKH_SCRIPT_LEN: u64 = 22;

/// Fixed fee rate calculator for wallet-built transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFeeRate {
    sat_per_vb: u64,
}

impl FixedFeeRate {
    pub fn new(sat_per_vb: u64) -> Self {
        Self { sat_per_vb }
    }

    pub fn sat_per_vb(&self) -> u64 {
        self.sat_per_vb
    }

    /// Virtual size of a P2WPKH-input transaction paying `output_script_len`, plus change
    pub fn estimate_vsize(&self, inputs: usize, output_script_len: usize, with_change: bool) -> u64 {
        let mut vsize = TX_OVERHEAD_VB
            + inputs as u64 * P2WPKH_INPUT_VB
            + Self::output_vsize(output_script_len as u64);
        if with_change {
            vsize += Self::output_vsize(P2WPKH_SCRIPT_LEN);
        }
        vsize
    }

    pub fn fee_for(&self, inputs: usize, output_script_len: usize, with_change: bool) -> u64 {
        let vsize = self.estimate_vsize(inputs, output_script_len, with_change);
        let fee = vsize * self.sat_per_vb;
        debug!("Fee for {vsize} vB at {} sat/vB: {fee} sat", self.sat_per_vb);
        fee
    }

    // value + script length prefix + script
    fn output_vsize(script_len: u64) -> u64 {
        8 + 1 + script_len
    }
}

impl Default for FixedFeeRate {
    fn default() -> Self {
        Self::new(DEFAULT_FEE_RATE_SAT_PER_VB)
    }
}
