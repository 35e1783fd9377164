//! The UnvaultEmergency transaction: the emergency revocation path taken
//! when an Unvault output must be swept to the deep-cold 4-of-4 instead of
//! back to a fresh vault. Spends the same "all four stakeholders" branch of
//! the Unvault output that Cancel does; differs only in destination.

use bitcoin::{OutPoint, PublicKey, Script, ScriptBuf, Transaction};

use super::{single_in_single_out, RevaultTransaction, TxBuildError, REVOCATION_SEQUENCE};
use crate::scripts::{emergency_script, p2wsh_script_pubkey, unvault_script, SlotPubkeys};

pub struct UnvaultEmergencyTransaction {
    tx: Transaction,
    prev_script: ScriptBuf,
    prev_amount: u64,
}

impl UnvaultEmergencyTransaction {
    pub fn new(
        unvault_outpoint: OutPoint,
        prev_amount: u64,
        pubkeys: &SlotPubkeys,
        cosigner_pubkey: &PublicKey,
        emergency_pubkeys: &SlotPubkeys,
        value: u64,
    ) -> Result<Self, TxBuildError> {
        if value == 0 || value > prev_amount {
            return Err(TxBuildError::FeeExceedsValue {
                prevout_value: prev_amount,
                fee: prev_amount.saturating_sub(value),
            });
        }
        let prev_script = unvault_script(pubkeys, cosigner_pubkey);
        let out_script = emergency_script(emergency_pubkeys);
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

impl RevaultTransaction for UnvaultEmergencyTransaction {
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
    fn pays_to_the_emergency_script() {
        let pubkeys = dummy_pubkeys(1);
        let srv = dummy_pubkeys(50)[0];
        let emer_pubkeys = dummy_pubkeys(9);
        let uetx = UnvaultEmergencyTransaction::new(
            OutPoint::null(),
            10_000,
            &pubkeys,
            &srv,
            &emer_pubkeys,
            9_800,
        )
        .unwrap();
        assert_eq!(
            uetx.inner().output[0].script_pubkey,
            p2wsh_script_pubkey(&emergency_script(&emer_pubkeys))
        );
    }
}
