//! The Cancel transaction: the normal revocation path, moving an Unvault
//! output straight back into a fresh vault (the same 4-of-4) rather than to
//! the emergency cold path. Spends the Unvault output's "all four
//! stakeholders" branch.

use bitcoin::{OutPoint, PublicKey, Script, ScriptBuf, Transaction};

use super::{single_in_single_out, RevaultTransaction, TxBuildError, REVOCATION_SEQUENCE};
use crate::scripts::{p2wsh_script_pubkey, unvault_script, vault_script, SlotPubkeys};

pub struct CancelTransaction {
    tx: Transaction,
    prev_script: ScriptBuf,
    prev_amount: u64,
}

impl CancelTransaction {
    /// `pubkeys`/`cosigner_pubkey` rebuild the Unvault's own witness script
    /// (the prevout here), at the same derivation index the Unvault used.
    pub fn new(
        unvault_outpoint: OutPoint,
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
        let prev_script = unvault_script(pubkeys, cosigner_pubkey);
        let out_script = vault_script(pubkeys);
        let tx = single_in_single_out(
            unvault_outpoint,
            REVOCATION_SEQUENCE,
            p2wsh_script_pubkey(&out_script),
            value,
        );
        Ok(Self {
            tx,
            prev_script,
            prev_amount,
        })
    }
}

impl RevaultTransaction for CancelTransaction {
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

    #[test]
    fn pays_back_to_a_vault_script() {
        let pubkeys = dummy_pubkeys(1);
        let srv = dummy_pubkeys(50)[0];
        let ctx =
            CancelTransaction::new(OutPoint::null(), 10_000, &pubkeys, &srv, 9_800).unwrap();
        assert_eq!(ctx.inner().output[0].script_pubkey, p2wsh_script_pubkey(&vault_script(&pubkeys)));
        assert_eq!(ctx.inner().input[0].sequence, REVOCATION_SEQUENCE);
    }
}
