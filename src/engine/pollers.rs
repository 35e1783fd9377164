//! Blocking waits and periodic polls that don't fit the funding-focused
//! `ingest.rs`: watching an already-broadcast Unvault transaction confirm,
//! and watching the sig-server for Spend proposals needing this
//! stakeholder's ack.

use std::thread;
use std::time::Duration;

use bitcoin::{OutPoint, Txid};

use crate::error::EngineError;

use super::spend_policy::evaluate_spend_proposal;
use super::{VaultEngine, VaultState};

/// How long `wait_for_unvault_tx` sleeps between `getrawtransaction`
/// checks. Matches the busy-wait semantics of the original poller: a
/// blocking call from spend-initiation, not a background thread.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Blocks until bitcoind reports `unvault_txid` in a block, then marks the
/// vault `Unvaulted`. Called from the spend-initiation path, which cannot
/// proceed until the CSV timelock has something to count down from.
pub fn wait_for_unvault_tx(
    engine: &mut VaultEngine,
    vault_outpoint: OutPoint,
    unvault_txid: Txid,
) -> Result<(), EngineError> {
    loop {
        if let Some(tx) = engine.bitcoind.get_raw_transaction(&unvault_txid)? {
            debug_assert_eq!(tx.txid(), unvault_txid);
            if let Some(vault) = engine.vault_mut(&vault_outpoint) {
                vault.state = VaultState::Unvaulted;
            }
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Checks the sig-server for every pending Spend proposal, casting our
/// accept/refuse vote the first time we see one (spec.md §4.6, loop 2):
/// accepted iff every output address is a known vault address or in
/// `acked_addresses`, and at least one pays an `acked_addresses` entry.
/// Returns the outpoints of vaults whose Spend was accepted by enough
/// stakeholders to complete (the sig-server tallies votes; we only learn
/// the outcome of proposals against our own known vaults).
pub fn poll_for_spends(engine: &mut VaultEngine) -> Result<Vec<OutPoint>, EngineError> {
    let mut completed = Vec::new();
    let proposals = engine.sigserver.get_spends()?;
    let known_addresses = engine.known_vault_addresses()?;

    for (unvault_txid, outputs) in &proposals {
        if engine.has_voted_spend(unvault_txid) {
            continue;
        }
        let accept = evaluate_spend_proposal(outputs, &known_addresses, engine.acked_addresses());
        engine.sigserver.vote_spend(unvault_txid, accept)?;
        engine.mark_spend_voted(*unvault_txid);

        let outpoint = engine
            .vaults()
            .iter()
            .find(|v| v.unvault_txid == Some(*unvault_txid))
            .map(|v| v.outpoint);
        if let Some(outpoint) = outpoint {
            if let Some(vault) = engine.vault_mut(&outpoint) {
                vault.state = VaultState::Spending;
            }
        }
    }

    let outpoints: Vec<OutPoint> = engine
        .vaults()
        .iter()
        .filter(|v| v.state == VaultState::Spending)
        .filter_map(|v| v.unvault_txid.map(|txid| (v.outpoint, txid)))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|(outpoint, _)| outpoint)
        .collect();

    for outpoint in outpoints {
        let unvault_txid = match engine.vault(&outpoint).and_then(|v| v.unvault_txid) {
            Some(t) => t,
            None => continue,
        };
        if engine.sigserver.spend_accepted(&unvault_txid)? {
            completed.push(outpoint);
        }
    }

    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_is_reasonable() {
        assert!(POLL_INTERVAL.as_secs() >= 1);
        assert!(POLL_INTERVAL.as_secs() <= 60);
    }
}
