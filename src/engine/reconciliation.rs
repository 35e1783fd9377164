//! Detects a vault's funding UTXO vanishing from bitcoind's watch-only
//! wallet without this stakeholder having broadcast its own Unvault, and
//! reacts the way `poll_for_funds` does in the original implementation
//! this protocol was distilled from: check the emergency address first (an
//! avalanche signal that overrides everything else), then the unvault
//! address, falling back to "the Cancel we already broadcast must have
//! confirmed" when neither shows a UTXO.

use bitcoin::Address;

use crate::error::EngineError;
use crate::signer;
use crate::sigserver::RevocationKind;
use crate::transactions::{CancelTransaction, EmergencyTransaction, UnvaultEmergencyTransaction, UnvaultTransaction};

use super::vault::VaultRecord;
use super::{broadcast, VaultState};
use crate::bitcoind::ListUnspentEntry;

use super::VaultEngine;

fn address_has_utxo(entries: &[ListUnspentEntry], address: &Address) -> bool {
    let target = address.to_string();
    entries.iter().any(|e| e.address.as_deref() == Some(target.as_str()))
}

fn rebuild_emergency(vault: &VaultRecord, emergency_pubkeys: &crate::scripts::SlotPubkeys) -> Option<EmergencyTransaction> {
    let value = vault.emergency_value?;
    let prev_script = crate::scripts::vault_script(&vault.pubkeys);
    EmergencyTransaction::new(vault.outpoint, prev_script, vault.amount, emergency_pubkeys, value).ok()
}

fn rebuild_unvault_emergency(
    vault: &VaultRecord,
    cosigner_pubkey: &bitcoin::PublicKey,
    emergency_pubkeys: &crate::scripts::SlotPubkeys,
) -> Option<UnvaultEmergencyTransaction> {
    let unvault_txid = vault.unvault_txid?;
    let unvault_value = vault.unvault_value?;
    let value = vault.unvault_emergency_value?;
    let outpoint = bitcoin::OutPoint::new(unvault_txid, 0);
    UnvaultEmergencyTransaction::new(outpoint, unvault_value, &vault.pubkeys, cosigner_pubkey, emergency_pubkeys, value).ok()
}

fn rebuild_cancel(vault: &VaultRecord, cosigner_pubkey: &bitcoin::PublicKey) -> Option<CancelTransaction> {
    let unvault_txid = vault.unvault_txid?;
    let unvault_value = vault.unvault_value?;
    let value = vault.cancel_value?;
    let outpoint = bitcoin::OutPoint::new(unvault_txid, 0);
    CancelTransaction::new(outpoint, unvault_value, &vault.pubkeys, cosigner_pubkey, value).ok()
}

/// Best-effort broadcasts every known vault's Emergency and UnvaultEmergency
/// transaction and marks each `EmergencyVaulted`. Errors (a peer beating us
/// to it, a template that never finished signing) are swallowed per vault:
/// one vault's incomplete signature table must not stop the avalanche for
/// the rest.
fn trigger_emergency_avalanche(engine: &mut VaultEngine) {
    let emergency_pubkeys = *engine.emergency_pubkeys();
    let cosigner_pubkey = *engine.cosigner_pubkey();
    let our_slot = engine.our_slot();

    let outpoints: Vec<bitcoin::OutPoint> = engine
        .vaults()
        .iter()
        .filter(|v| !v.state.is_terminal())
        .map(|v| v.outpoint)
        .collect();

    for outpoint in outpoints {
        let derivation_index = match engine.vault(&outpoint) {
            Some(v) => v.derivation_index,
            None => continue,
        };

        if let Some(vault) = engine.vault(&outpoint) {
            if let Some(etx) = rebuild_emergency(vault, &emergency_pubkeys) {
                let sigs = vault.emergency_sigs.clone();
                let _ = broadcast::broadcast_revocation(
                    engine,
                    &etx,
                    &sigs,
                    our_slot,
                    derivation_index,
                    RevocationKind::Emergency,
                    signer::assemble_multisig_witness,
                );
            }
        }

        if let Some(vault) = engine.vault(&outpoint) {
            if let Some(uetx) = rebuild_unvault_emergency(vault, &cosigner_pubkey, &emergency_pubkeys) {
                let sigs = vault.unvault_emergency_sigs.clone();
                let _ = broadcast::broadcast_revocation(
                    engine,
                    &uetx,
                    &sigs,
                    our_slot,
                    derivation_index,
                    RevocationKind::UnvaultEmergency,
                    signer::assemble_unvault_revocation_witness,
                );
            }
        }

        if let Some(vault) = engine.vault_mut(&outpoint) {
            vault.state = VaultState::EmergencyVaulted;
        }
    }
}

/// Broadcasts one vault's Cancel transaction if it's fully signed, then
/// leaves its state to be confirmed by `poll_for_funds` on a later tick
/// (the Cancel's own output becomes a fresh funding UTXO once mined).
fn broadcast_cancel(engine: &mut VaultEngine, outpoint: bitcoin::OutPoint) -> Result<(), EngineError> {
    let cosigner_pubkey = *engine.cosigner_pubkey();
    let our_slot = engine.our_slot();
    let (derivation_index, ctx, sigs) = {
        let vault = engine
            .vault(&outpoint)
            .ok_or(EngineError::Invariant("broadcast_cancel: unknown vault"))?;
        let ctx = rebuild_cancel(vault, &cosigner_pubkey)
            .ok_or(EngineError::Invariant("broadcast_cancel: cancel template not ready"))?;
        (vault.derivation_index, ctx, vault.cancel_sigs.clone())
    };
    broadcast::broadcast_revocation(
        engine,
        &ctx,
        &sigs,
        our_slot,
        derivation_index,
        RevocationKind::Cancel,
        signer::assemble_unvault_revocation_witness,
    )?;
    Ok(())
}

/// The funding-UTXO-disappearance check: spec.md §4.6's diagram describes
/// reacting to a vault's deposit vanishing from bitcoind's view without our
/// own Unvault having caused it — a sign another stakeholder (or an
/// attacker with a stolen key) moved first. Priority order, per the
/// original: the emergency address overrides everything, since a deposit
/// appearing there is a distress signal from the rest of the stakeholders
/// that no single vault's state can contradict.
pub fn reconcile_vanished_funding(engine: &mut VaultEngine) -> Result<(), EngineError> {
    let entries = engine.bitcoind.list_unspent(0)?;

    let emergency_address = super::emergency_address(engine.emergency_pubkeys(), engine.network());
    if address_has_utxo(&entries, &emergency_address) {
        trigger_emergency_avalanche(engine);
        return Ok(());
    }

    let current: std::collections::HashSet<bitcoin::OutPoint> = entries.iter().map(|e| e.outpoint()).collect();

    let vanished: Vec<bitcoin::OutPoint> = engine
        .vaults()
        .iter()
        .filter(|v| matches!(v.state, VaultState::Funded | VaultState::Secured | VaultState::Active))
        .filter(|v| !current.contains(&v.outpoint))
        .map(|v| v.outpoint)
        .collect();

    for outpoint in vanished {
        let cosigner_pubkey = *engine.cosigner_pubkey();
        let network = engine.network();
        let unvault_address = {
            let vault = match engine.vault(&outpoint) {
                Some(v) => v,
                None => continue,
            };
            let script = UnvaultTransaction::output_script(&vault.pubkeys, &cosigner_pubkey);
            crate::scripts::p2wsh_address(&script, network)
        };

        if address_has_utxo(&entries, &unvault_address) {
            let _ = broadcast_cancel(engine, outpoint);
        } else if let Some(vault) = engine.vault_mut(&outpoint) {
            // Neither the funding nor the unvault output is visible: the
            // Cancel we broadcast earlier must already be confirmed.
            vault.state = VaultState::Canceled;
        }
    }

    Ok(())
}
