//! The Emergency transaction: sweeps a vault output straight to the deep-cold
//! 4-of-4, bypassing Unvault entirely. Spends the vault's own `vault_script`.

use bitcoin::{OutPoint, Script, ScriptBuf, Transaction};

use super::{single_in_single_out, RevaultTransaction, TxBuildError, REVOCATION_SEQUENCE};
use crate::scripts::{emergency_script, p2wsh_script_pubkey, SlotPubkeys};

pub struct EmergencyTransaction {
    tx: Transaction,
    prev_script: ScriptBuf,
    prev_amount: u64,
}

impl EmergencyTransaction {
    /// `prev_script`/`prev_amount` describe the vault output being spent;
    /// `value` is the (fee-adjusted) amount paid to the emergency output.
    pub fn new(
        vault_outpoint: OutPoint,
        prev_script: ScriptBuf,
        prev_amount: u64,
        emergency_pubkeys: &SlotPubkeys,
        value: u64,
    ) -> Result<Self, TxBuildError> {
        if value == 0 || value > prev_amount {
            return Err(TxBuildError::FeeExceedsValue {
                prevout_value: prev_amount,
                fee: prev_amount.saturating_sub(value),
            });
        }
        let out_script = emergency_script(emergency_pubkeys);
        let tx = single_in_single_out(
            vault_outpoint,
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

impl RevaultTransaction for EmergencyTransaction {
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
    fn rejects_value_exceeding_prevout() {
        let pubkeys = dummy_pubkeys(1);
        let prev_script = vault_script(&pubkeys);
        let emer_pubkeys = dummy_pubkeys(2);
        let err = EmergencyTransaction::new(
            OutPoint::null(),
            prev_script,
            10_000,
            &emer_pubkeys,
            10_001,
        )
        .unwrap_err();
        assert!(matches!(err, TxBuildError::FeeExceedsValue { .. }));
    }

    #[test]
    fn uses_rbf_sequence() {
        let pubkeys = dummy_pubkeys(1);
        let prev_script = vault_script(&pubkeys);
        let emer_pubkeys = dummy_pubkeys(2);
        let etx =
            EmergencyTransaction::new(OutPoint::null(), prev_script, 10_000, &emer_pubkeys, 9_500)
                .unwrap();
        assert_eq!(etx.inner().input[0].sequence, REVOCATION_SEQUENCE);
        assert_eq!(etx.inner().output[0].value, 9_500);
    }
}
