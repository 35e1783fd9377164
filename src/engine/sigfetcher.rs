//! Builds, signs and exchanges the three revocation transactions (Cancel,
//! Emergency, UnvaultEmergency) for a vault. Every stakeholder repeats this
//! independently and compares txids rather than trusting any one party's
//! construction — see `scripts.rs`'s determinism note.

use bitcoin::sighash::EcdsaSighashType;
use bitcoin::{OutPoint, Txid};

use crate::error::EngineError;
use crate::feebump::value_after_fee;
use crate::signer::{self, RawSignature};
use crate::sigserver::RevocationKind;
use crate::transactions::{
    CancelTransaction, EmergencyTransaction, RevaultTransaction, UnvaultEmergencyTransaction,
};

use super::VaultEngine;

/// Builds the three unsigned revocation transactions for a vault, at the
/// feerates the sig-server dictates for each kind, and signs our own
/// ALL|ANYONECANPAY slot.
pub struct RevocationSet {
    pub emergency: EmergencyTransaction,
    pub cancel: CancelTransaction,
    pub unvault_emergency: UnvaultEmergencyTransaction,
}

pub fn build_revocations(
    engine: &VaultEngine,
    vault_outpoint: OutPoint,
    vault_amount: u64,
    unvault_txid: Txid,
    unvault_value: u64,
    pubkeys: &crate::scripts::SlotPubkeys,
) -> Result<RevocationSet, EngineError> {
    let emer_feerate = engine.sigserver.feerate(RevocationKind::Emergency)?;
    let cancel_feerate = engine.sigserver.feerate(RevocationKind::Cancel)?;
    let unvault_emer_feerate = engine.sigserver.feerate(RevocationKind::UnvaultEmergency)?;

    let vault_script = crate::scripts::vault_script(pubkeys);
    let emer_vsize = crate::transactions::estimate_vsize(
        &bare_single_output_tx(vault_outpoint, vault_amount),
        &crate::scripts::emergency_script(engine.emergency_pubkeys()),
        4,
        true,
    );
    let emer_value = value_after_fee(vault_amount, emer_vsize, emer_feerate)?;
    let emergency = EmergencyTransaction::new(
        vault_outpoint,
        vault_script.clone(),
        vault_amount,
        engine.emergency_pubkeys(),
        emer_value,
    )?;

    let unvault_script = crate::scripts::unvault_script(pubkeys, engine.cosigner_pubkey());
    // Cancel and UnvaultEmergency both spend the Unvault output itself, so
    // they must reference its real txid even though the Unvault transaction
    // isn't broadcast yet — every stakeholder rebuilds the same Unvault
    // template independently and so agrees on this txid before any
    // signature exchange starts.
    let unvault_outpoint = OutPoint::new(unvault_txid, 0);
    let cancel_vsize = crate::transactions::estimate_vsize(
        &bare_single_output_tx(unvault_outpoint, unvault_value),
        &unvault_script,
        4,
        false,
    );
    let cancel_value = value_after_fee(unvault_value, cancel_vsize, cancel_feerate)?;
    let cancel = CancelTransaction::new(
        unvault_outpoint,
        unvault_value,
        pubkeys,
        engine.cosigner_pubkey(),
        cancel_value,
    )?;

    let unvault_emer_vsize = crate::transactions::estimate_vsize(
        &bare_single_output_tx(unvault_outpoint, unvault_value),
        &unvault_script,
        4,
        false,
    );
    let unvault_emer_value =
        value_after_fee(unvault_value, unvault_emer_vsize, unvault_emer_feerate)?;
    let unvault_emergency = UnvaultEmergencyTransaction::new(
        unvault_outpoint,
        unvault_value,
        pubkeys,
        engine.cosigner_pubkey(),
        engine.emergency_pubkeys(),
        unvault_emer_value,
    )?;

    Ok(RevocationSet {
        emergency,
        cancel,
        unvault_emergency,
    })
}

fn bare_single_output_tx(outpoint: OutPoint, value: u64) -> bitcoin::Transaction {
    bitcoin::Transaction {
        version: 2,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: vec![bitcoin::TxIn {
            previous_output: outpoint,
            script_sig: bitcoin::ScriptBuf::new(),
            sequence: crate::transactions::REVOCATION_SEQUENCE,
            witness: bitcoin::Witness::new(),
        }],
        output: vec![bitcoin::TxOut {
            value,
            script_pubkey: bitcoin::ScriptBuf::new(),
        }],
    }
}

/// Signs `tx` with our own key at `index`, under SIGHASH_ALL|ANYONECANPAY
/// (the flag every revocation signature is exchanged under, so any
/// stakeholder can append a fee-bump input later).
pub fn sign_our_revocation_slot(
    engine: &VaultEngine,
    tx: &impl RevaultTransaction,
    index: u32,
) -> Result<RawSignature, EngineError> {
    let privkey = engine.keys_our_private_key(index)?;
    Ok(signer::sign_input(
        engine.secp(),
        tx.inner(),
        tx.prev_script(),
        tx.prev_amount(),
        &privkey,
        EcdsaSighashType::AllPlusAnyoneCanPay,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_tx_carries_the_revocation_sequence() {
        let tx = bare_single_output_tx(OutPoint::null(), 1_000);
        assert_eq!(tx.input[0].sequence, crate::transactions::REVOCATION_SEQUENCE);
    }
}
