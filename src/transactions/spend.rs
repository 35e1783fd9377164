//! The Spend transaction: the traders' normal, cooperative path out of an
//! Unvault output, to arbitrary destinations. Spends the Unvault output's
//! 2-of-3-plus-cosigner branch, and is the only transaction kind here with
//! more than one output or more than one input-consumer's worth of
//! signatures to gather (trader1/trader2/stakeholder1, any one omitted, plus
//! the cosigner). Requires the CSV relative timelock enforced both by
//! `sequence` and by the script itself.

use bitcoin::{OutPoint, PublicKey, Script, ScriptBuf, Transaction, TxOut};

use super::{spend_sequence, RevaultTransaction, TxBuildError};
use crate::scripts::{unvault_script, SlotPubkeys};

pub struct SpendTransaction {
    tx: Transaction,
    prev_script: ScriptBuf,
    prev_amount: u64,
}

impl SpendTransaction {
    /// `outputs` is the caller-chosen destination list; at least one is
    /// required. `prev_amount` minus the sum of `outputs`' values is the fee
    /// (spec.md leaves fee selection for Spend to whichever trader initiates
    /// it, unlike the fixed-feerate revocations).
    pub fn new(
        unvault_outpoint: OutPoint,
        prev_amount: u64,
        pubkeys: &SlotPubkeys,
        cosigner_pubkey: &PublicKey,
        outputs: Vec<TxOut>,
    ) -> Result<Self, TxBuildError> {
        if outputs.is_empty() {
            return Err(TxBuildError::NoOutputs);
        }
        let total_out: u64 = outputs.iter().map(|o| o.value).sum();
        if total_out == 0 || total_out > prev_amount {
            return Err(TxBuildError::FeeExceedsValue {
                prevout_value: prev_amount,
                fee: prev_amount.saturating_sub(total_out),
            });
        }
        let prev_script = unvault_script(pubkeys, cosigner_pubkey);
        let tx = Transaction {
            version: 2,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![bitcoin::TxIn {
                previous_output: unvault_outpoint,
                script_sig: ScriptBuf::new(),
                sequence: spend_sequence(),
                witness: bitcoin::Witness::new(),
            }],
            output: outputs,
        };
        Ok(Self {
            tx,
            prev_script,
            prev_amount,
        })
    }
}

impl RevaultTransaction for SpendTransaction {
    fn inner(&self) -> &Transaction {
        &self.tx
    }
    fn inner_mut(&mut self) -> &mut Transaction {
        &mut self.tx
    }
    fn prev_script(&self) -> &Script {
        &self.prev_script
    }
    fn prev_amount(&self) -> u64 {
        self.prev_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::dummy_pubkeys;

    fn dest(value: u64) -> TxOut {
        TxOut {
            value,
            script_pubkey: ScriptBuf::new(),
        }
    }

    #[test]
    fn rejects_empty_outputs() {
        let pubkeys = dummy_pubkeys(1);
        let srv = dummy_pubkeys(50)[0];
        let err =
            SpendTransaction::new(OutPoint::null(), 10_000, &pubkeys, &srv, vec![]).unwrap_err();
        assert!(matches!(err, TxBuildError::NoOutputs));
    }

    #[test]
    fn carries_the_csv_sequence() {
        let pubkeys = dummy_pubkeys(1);
        let srv = dummy_pubkeys(50)[0];
        let stx = SpendTransaction::new(
            OutPoint::null(),
            10_000,
            &pubkeys,
            &srv,
            vec![dest(4_000), dest(5_900)],
        )
        .unwrap();
        assert_eq!(stx.inner().input[0].sequence, spend_sequence());
        assert_eq!(stx.inner().output.len(), 2);
    }
}
