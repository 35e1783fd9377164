//! Drives a single vault's Spend from an accepted proposal through to
//! broadcast: waits for the Unvault transaction's own confirmation, gathers
//! two of the three eligible stakeholders' signatures via the sig-server,
//! fetches the cosigner's countersignature, assembles the witness and
//! broadcasts. Grounded on `vault.py`'s `create_sign_spend_tx`/
//! `complete_spend` pair, collapsed into one call since this engine has no
//! direct peer-to-peer channel of its own — signature handoff reuses the
//! same sig-server `sig/{txid}/{slot}` store `sigfetcher.rs` already uses
//! for revocations (see `DESIGN.md`).
//!
//! Spend-initiation is the one path in this engine that's user-driven and
//! single-threaded rather than polled (spec.md §5): callers block on this
//! for as long as the CSV timelock and the other signers take.

use std::thread;
use std::time::Duration;

use bitcoin::sighash::EcdsaSighashType;
use bitcoin::{OutPoint, Txid, TxOut};

use crate::error::EngineError;
use crate::signer::{self, RawSignature};
use crate::sigserver::AddressMap;
use crate::transactions::{RevaultTransaction, SpendTransaction};

use super::pollers::wait_for_unvault_tx;
use super::{VaultEngine, VaultState};

/// How long to wait between sig-server polls while gathering the other
/// eligible stakeholders' Spend signatures. Matches `pollers.rs`'s
/// `wait_for_unvault_tx` cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The three slots (0-based) that may sign a Spend: the two traders and the
/// first "normie" stakeholder (spec.md: "exactly 2 of {trader1, trader2,
/// stakeholder1}"). Slot 4 never signs a Spend.
const SPEND_SIGNER_SLOTS: [usize; 3] = [0, 1, 2];

/// Builds, cosigns and broadcasts the Spend transaction for `vault_outpoint`,
/// once its proposal has been accepted. `outputs` is the raw destination
/// list used to build the transaction; `address_map` is the same
/// destinations expressed as the sig-server/cosigner's address -> amount
/// wire shape (spec.md §4.5).
///
/// Blocks until the Unvault transaction confirms and until at least two of
/// the three eligible stakeholders have posted their signature for this
/// Spend — there is no bound on how long a co-trader may take, matching the
/// original's "the caller waits indefinitely" design note.
pub fn execute_spend(
    engine: &mut VaultEngine,
    vault_outpoint: OutPoint,
    outputs: Vec<TxOut>,
    address_map: AddressMap,
) -> Result<Txid, EngineError> {
    let (derivation_index, pubkeys, unvault_txid, unvault_value) = {
        let vault = engine
            .vault(&vault_outpoint)
            .ok_or(EngineError::Invariant("execute_spend: unknown vault"))?;
        let unvault_txid = vault
            .unvault_txid
            .ok_or(EngineError::Invariant("execute_spend: unvault template not built yet"))?;
        let unvault_value = vault
            .unvault_value
            .ok_or(EngineError::Invariant("execute_spend: unvault template not built yet"))?;
        (vault.derivation_index, vault.pubkeys, unvault_txid, unvault_value)
    };

    wait_for_unvault_tx(engine, vault_outpoint, unvault_txid)?;

    let cosigner_pubkey = *engine.cosigner_pubkey();
    let unvault_outpoint = OutPoint::new(unvault_txid, 0);
    let spend_tx = SpendTransaction::new(unvault_outpoint, unvault_value, &pubkeys, &cosigner_pubkey, outputs)?;
    let spend_txid = spend_tx.txid();

    let our_slot = engine.our_slot();
    if SPEND_SIGNER_SLOTS.contains(&our_slot) {
        let our_sig = signer::sign_input(
            engine.secp(),
            spend_tx.inner(),
            spend_tx.prev_script(),
            spend_tx.prev_amount(),
            &engine.keys_our_private_key(derivation_index)?,
            EcdsaSighashType::All,
        )?;
        engine
            .sigserver
            .post_signature(&spend_txid, our_slot + 1, &hex::encode(&our_sig))?;
    }

    let sigs = collect_spend_signatures(engine, &spend_txid)?;
    let cosign_sig = engine
        .cosigner
        .sign_spend(&unvault_txid, &pubkeys, &address_map, unvault_value)?;

    let witness = signer::assemble_spend_witness(
        spend_tx.prev_script(),
        sigs[0].as_ref(),
        sigs[1].as_ref(),
        sigs[2].as_ref(),
        &cosign_sig,
    );
    let mut tx = spend_tx.inner().clone();
    tx.input[0].witness = witness;

    let txid = engine.bitcoind.send_raw_transaction(&tx)?;
    if let Some(vault) = engine.vault_mut(&vault_outpoint) {
        vault.spend_txid = Some(txid);
        vault.state = VaultState::Spent;
    }
    Ok(txid)
}

/// Blocks until at least two of the three [`SPEND_SIGNER_SLOTS`] have a
/// posted, correctly-flagged signature for `spend_txid`, returning them in
/// slot order (trader1, trader2, stakeholder1). The unfilled slot, if any,
/// stays `None` — `signer::assemble_spend_witness` treats that as the
/// skipped leg of the 2-of-3 branch.
fn collect_spend_signatures(
    engine: &VaultEngine,
    spend_txid: &Txid,
) -> Result<[Option<RawSignature>; 3], EngineError> {
    loop {
        let mut sigs: [Option<RawSignature>; 3] = Default::default();
        let mut have = 0;
        for (i, slot) in SPEND_SIGNER_SLOTS.iter().enumerate() {
            if let Some(hex_sig) = engine.sigserver.get_signature(spend_txid, slot + 1)? {
                if let Ok(raw) = hex::decode(&hex_sig) {
                    if signer::expect_flag(&raw, EcdsaSighashType::All).is_ok() {
                        sigs[i] = Some(raw);
                        have += 1;
                    }
                }
            }
        }
        if have >= 2 {
            return Ok(sigs);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spend_signer_slots_exclude_the_fourth_stakeholder() {
        assert!(!SPEND_SIGNER_SLOTS.contains(&3));
        assert_eq!(SPEND_SIGNER_SLOTS.len(), 3);
    }
}
