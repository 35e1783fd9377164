//! Construction of the five transaction kinds (spec.md §4.2): Emergency,
//! Unvault, Cancel, UnvaultEmergency and Spend.
//!
//! Each kind is a thin wrapper around an unsigned `bitcoin::Transaction`
//! plus the witness script and amount of the single input it spends (both
//! needed again at signing time to recompute the BIP143 sighash). None of
//! these types touch the network or a private key; that's `signer.rs`'s and
//! the engine's job. Keeping construction pure is what lets every
//! stakeholder independently rebuild byte-identical templates and compare
//! txids before signing anything.

pub mod cancel;
pub mod emergency;
pub mod spend;
pub mod unvault;
pub mod unvault_emergency;

use std::fmt;

use bitcoin::{absolute::LockTime, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

pub use cancel::CancelTransaction;
pub use emergency::EmergencyTransaction;
pub use spend::SpendTransaction;
pub use unvault::UnvaultTransaction;
pub use unvault_emergency::UnvaultEmergencyTransaction;

/// nSequence for the Unvault transaction: final, no RBF, no CSV. Once
/// broadcast there is nothing left to bump but its child.
pub const UNVAULT_SEQUENCE: Sequence = Sequence::MAX;

/// nSequence for the three revocation kinds (Emergency, Cancel,
/// UnvaultEmergency): RBF-signaling so a stakeholder who needs to bump the
/// fee can do so by appending an input under SIGHASH_ALL|ANYONECANPAY and
/// replacing the transaction, rather than by child-pays-for-parent.
pub const REVOCATION_SEQUENCE: Sequence = Sequence::ENABLE_RBF_NO_LOCKTIME;

/// nSequence for the Spend transaction, encoding the Unvault script's
/// relative timelock (spec.md's `UNVAULT_CSV`, also enforced by the script
/// itself via `OP_CHECKSEQUENCEVERIFY`).
pub fn spend_sequence() -> Sequence {
    Sequence::from_height(crate::scripts::UNVAULT_CSV as u16)
}

#[derive(Debug)]
pub enum TxBuildError {
    /// The requested output value was zero or negative once fees were
    /// deducted (spec.md §4.4's "fee exceeds vault value" edge case).
    FeeExceedsValue { prevout_value: u64, fee: u64 },
    /// A Spend transaction was built with no outputs.
    NoOutputs,
}

impl fmt::Display for TxBuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FeeExceedsValue { prevout_value, fee } => write!(
                f,
                "fee {} exceeds available value {}",
                fee, prevout_value
            ),
            Self::NoOutputs => write!(f, "a spend transaction needs at least one output"),
        }
    }
}

impl std::error::Error for TxBuildError {}

/// Anything that resolves to a single-input-single-spend-path unsigned or
/// signed transaction template. The shared surface `feebump.rs` and the
/// engine need: the txid to watch for, the vsize to estimate fees with, and
/// the prevout details needed to re-derive the sighash.
pub trait RevaultTransaction {
    fn inner(&self) -> &Transaction;
    fn inner_mut(&mut self) -> &mut Transaction;
    /// The witness script of the single input this transaction spends.
    fn prev_script(&self) -> &Script;
    /// The value, in sats, of the single input this transaction spends.
    fn prev_amount(&self) -> u64;

    fn txid(&self) -> bitcoin::Txid {
        self.inner().txid()
    }

    /// The single output's value, in sats (I1 guarantees exactly one output
    /// for every kind but Spend). Used to re-cache a template's value
    /// without keeping the whole built transaction around.
    fn output_value(&self) -> u64 {
        self.inner().output[0].value
    }

    /// Attaches `witness` to input 0, finalizing the transaction.
    fn set_witness(&mut self, witness: Witness) {
        self.inner_mut().input[0].witness = witness;
    }
}

/// Builds the bare single-input skeleton common to every kind here: one
/// input at `outpoint` with the given `sequence` and an empty witness, one
/// output paying `value` to `output_script`.
fn single_in_single_out(
    outpoint: OutPoint,
    sequence: Sequence,
    output_script: ScriptBuf,
    value: u64,
) -> Transaction {
    Transaction {
        version: 2,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value,
            script_pubkey: output_script,
        }],
    }
}

/// Estimates the virtual size a transaction will have once fully signed, by
/// attaching a throwaway witness of the given shape and measuring, then
/// discarding it. Used for the "dummy amount" two-pass sizing spec.md §4.4
/// describes: build with an arbitrary output value first, measure vsize,
/// then rebuild with the fee-adjusted real value.
///
/// `sig_count` placeholder signatures of `sig_len` bytes (72, the DER
/// upper bound including the sighash byte, to size conservatively) are
/// pushed ahead of `witness_script`.
pub fn estimate_vsize(
    tx: &Transaction,
    witness_script: &Script,
    sig_count: usize,
    has_multisig_dummy: bool,
) -> u64 {
    let mut dummy = tx.clone();
    let mut witness = Witness::new();
    if has_multisig_dummy {
        witness.push(Vec::new());
    }
    for _ in 0..sig_count {
        witness.push(vec![0u8; 72]);
    }
    witness.push(witness_script.to_bytes());
    dummy.input[0].witness = witness;
    dummy.vsize() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::vault_script;
    use crate::testutils::dummy_pubkeys;

    #[test]
    fn estimate_vsize_is_larger_with_witness_than_without() {
        let pubkeys = dummy_pubkeys(1);
        let script = vault_script(&pubkeys);
        let tx = single_in_single_out(
            OutPoint::null(),
            Sequence::MAX,
            script.clone(),
            50_000,
        );
        let bare = tx.vsize() as u64;
        let estimated = estimate_vsize(&tx, &script, 4, true);
        assert!(estimated > bare);
    }
}
