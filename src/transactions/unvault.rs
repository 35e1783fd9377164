//! The Unvault transaction: moves a vault output into the timelocked
//! 2-of-3-plus-cosigner-or-4-of-4 output that Spend, Cancel and
//! UnvaultEmergency all spend from. Final (no RBF): once it confirms, the
//! only way to change course is one of those three children.

use bitcoin::{OutPoint, PublicKey, Script, ScriptBuf, Transaction};

use super::{single_in_single_out, RevaultTransaction, TxBuildError, UNVAULT_SEQUENCE};
use crate::scripts::{p2wsh_script_pubkey, unvault_script, SlotPubkeys};

pub struct UnvaultTransaction {
    tx: Transaction,
    prev_script: ScriptBuf,
    prev_amount: u64,
}

impl UnvaultTransaction {
    /// `prev_script`/`prev_amount` describe the vault output being spent.
    pub fn new(
        vault_outpoint: OutPoint,
        prev_script: ScriptBuf,
        prev_amount: u64,
        pubkeys: &SlotPubkeys,
        cosigner_pubkey: &PublicKey,
        value: u64,
    ) -> Result<Self, TxBuildError> {
        if value == 0 || value > prev_amount {
            return Err(TxBuildError::FeeExceedsValue {
                prevout_value: prev_amount,
                fee: prev_amount.saturating_sub(value),
            });
        }
        let out_script = unvault_script(pubkeys, cosigner_pubkey);
        let tx = single_in_single_out(
            vault_outpoint,
            UNVAULT_SEQUENCE,
            p2wsh_script_pubkey(&out_script),
            value,
        );
        Ok(Self {
            tx,
            prev_script,
            prev_amount,
        })
    }

    /// The output's own witness script, independent of `prev_script` (the
    /// vault script *this* transaction spends). Cancel, UnvaultEmergency and
    /// Spend all need it again to build their own prevout.
    pub fn output_script(pubkeys: &SlotPubkeys, cosigner_pubkey: &PublicKey) -> ScriptBuf {
        unvault_script(pubkeys, cosigner_pubkey)
    }

    pub fn value(&self) -> u64 {
        self.tx.output[0].value
    }
}

impl RevaultTransaction for UnvaultTransaction {
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
    use crate::scripts::vault_script;
    use crate::testutils::dummy_pubkeys;

    #[test]
    fn is_final_no_rbf() {
        let pubkeys = dummy_pubkeys(1);
        let srv = dummy_pubkeys(50)[0];
        let prev_script = vault_script(&pubkeys);
        let utx =
            UnvaultTransaction::new(OutPoint::null(), prev_script, 10_000, &pubkeys, &srv, 9_900)
                .unwrap();
        assert_eq!(utx.inner().input[0].sequence, UNVAULT_SEQUENCE);
        assert_eq!(utx.value(), 9_900);
    }
}
