//! `VaultEngine`: the stakeholder-facing state machine (spec.md §4.6) tying
//! together key derivation, script/transaction construction, signing, and
//! the three collaborators (bitcoind, sig-server, cosigner). Vaults are
//! kept in memory only, in derivation-index order; there is no database
//! (spec.md's Non-goals explicitly exclude persistence — a crash loses
//! in-flight signature-collection state, recoverable by re-running the
//! pollers since every signature is re-derivable or re-fetchable).

pub mod broadcast;
pub mod ingest;
pub mod pollers;
pub mod reconciliation;
pub mod sigfetcher;
pub mod signatures;
pub mod spend;
pub mod spend_policy;
pub mod vault;

mod state;

pub use state::VaultState;
pub use vault::VaultRecord;

use bitcoin::bip32::Xpub;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Network, OutPoint, PublicKey};

use crate::bitcoind::BitcoindClient;
use crate::cosigner::CosignerClient;
use crate::error::EngineError;
use crate::keys::KeyChain;
use crate::scripts::{p2wsh_address, vault_script, SlotPubkeys};
use crate::sigserver::SigServerClient;

/// How many addresses ahead of the highest-seen derivation index the engine
/// keeps imported in bitcoind, so a deposit doesn't have to wait for us to
/// notice it was sent to an un-watched address. Gap-limit in spirit, not in
/// BIP32 account-discovery mechanics. spec.md §4.6: `max_index = current_index
/// + 500`.
pub const WATCH_WINDOW: u32 = 500;

pub struct VaultEngine {
    secp: Secp256k1<All>,
    keys: KeyChain,
    emergency_pubkeys: SlotPubkeys,
    cosigner_pubkey: PublicKey,
    network: Network,
    /// Destination addresses this stakeholder has agreed out-of-band to
    /// spend towards (spec.md §6's configuration surface). A Spend
    /// proposal is accepted only if every output lands on one of these or
    /// a known vault address, and at least one lands on one of these.
    acked_addresses: Vec<String>,

    pub bitcoind: BitcoindClient,
    pub sigserver: SigServerClient,
    pub cosigner: CosignerClient,

    vaults: Vec<VaultRecord>,
    next_index: u32,
    watched_up_to: u32,
    /// Unvault txids whose Spend proposal this stakeholder has already
    /// voted on, so the spend poller doesn't re-decide (and re-POST) on
    /// every tick (spec.md §4.6: "Decisions are memoized").
    voted_spends: std::collections::HashSet<bitcoin::Txid>,
}

impl VaultEngine {
    pub fn new(
        secp: Secp256k1<All>,
        keys: KeyChain,
        emergency_pubkeys: SlotPubkeys,
        cosigner_pubkey: PublicKey,
        network: Network,
        starting_index: u32,
        acked_addresses: Vec<String>,
        bitcoind: BitcoindClient,
        sigserver: SigServerClient,
        cosigner: CosignerClient,
    ) -> Self {
        Self {
            secp,
            keys,
            emergency_pubkeys,
            cosigner_pubkey,
            network,
            acked_addresses,
            bitcoind,
            sigserver,
            cosigner,
            vaults: Vec::new(),
            next_index: starting_index,
            watched_up_to: starting_index,
            voted_spends: std::collections::HashSet::new(),
        }
    }

    pub fn acked_addresses(&self) -> &[String] {
        &self.acked_addresses
    }

    /// Every vault address derived so far (0..watched_up_to), as bech32
    /// strings, for the spend poller's "known destination" check. Includes
    /// not-yet-funded indices in the watch window, matching the original's
    /// `self.vault_addresses` (built from the whole watched range, not just
    /// addresses with an active deposit).
    pub fn known_vault_addresses(&self) -> Result<std::collections::HashSet<String>, EngineError> {
        (0..self.watched_up_to)
            .map(|i| Ok(self.vault_address(i)?.to_string()))
            .collect()
    }

    pub fn has_voted_spend(&self, unvault_txid: &bitcoin::Txid) -> bool {
        self.voted_spends.contains(unvault_txid)
    }

    pub fn mark_spend_voted(&mut self, unvault_txid: bitcoin::Txid) {
        self.voted_spends.insert(unvault_txid);
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn our_slot(&self) -> usize {
        self.keys.our_slot()
    }

    pub fn cosigner_pubkey(&self) -> &PublicKey {
        &self.cosigner_pubkey
    }

    pub fn emergency_pubkeys(&self) -> &SlotPubkeys {
        &self.emergency_pubkeys
    }

    pub fn vaults(&self) -> &[VaultRecord] {
        &self.vaults
    }

    pub fn vault_mut(&mut self, outpoint: &OutPoint) -> Option<&mut VaultRecord> {
        self.vaults.iter_mut().find(|v| &v.outpoint == outpoint)
    }

    pub fn vault(&self, outpoint: &OutPoint) -> Option<&VaultRecord> {
        self.vaults.iter().find(|v| &v.outpoint == outpoint)
    }

    /// The four slot-ordered pubkeys at `index`; shared by the vault,
    /// emergency and unvault scripts at that same index.
    pub fn get_pubkeys(&self, index: u32) -> Result<SlotPubkeys, EngineError> {
        Ok(self.keys.vault_pubkeys(&self.secp, index)?)
    }

    /// Our own private key at `index`, used to sign every transaction kind
    /// spending a vault or unvault output at that derivation index.
    pub fn keys_our_private_key(&self, index: u32) -> Result<bitcoin::PrivateKey, EngineError> {
        Ok(self.keys.our_private_key(&self.secp, index)?)
    }

    /// The deposit address a fresh vault at `index` should be funded at.
    pub fn vault_address(&self, index: u32) -> Result<bitcoin::Address, EngineError> {
        let pubkeys = self.get_pubkeys(index)?;
        Ok(p2wsh_address(&vault_script(&pubkeys), self.network))
    }

    /// Registers a freshly observed funding UTXO. Called by `ingest.rs`'s
    /// poller once bitcoind reports it; exposed separately so tests (and a
    /// future manual `addvault`-style entry point) don't have to go through
    /// a live bitcoind.
    pub fn add_new_vault(&mut self, outpoint: OutPoint, amount: u64, derivation_index: u32) {
        if self.vaults.iter().any(|v| v.outpoint == outpoint) {
            return;
        }
        let pubkeys = self
            .get_pubkeys(derivation_index)
            .expect("derivation index within our already-derived window");
        self.vaults
            .push(VaultRecord::new(outpoint, amount, derivation_index, pubkeys));
        if derivation_index >= self.next_index {
            self.next_index = derivation_index + 1;
        }
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn watched_up_to(&self) -> u32 {
        self.watched_up_to
    }

    pub fn set_watched_up_to(&mut self, index: u32) {
        self.watched_up_to = index;
    }
}

/// A stakeholder's emergency-only watch: unlike the four operational
/// vault/unvault/cancel scripts, the emergency 4-of-4 script depends only
/// on `emergency_pubkeys`, not on any per-vault derivation index, so it has
/// exactly one address to watch, ever.
pub fn emergency_address(emergency_pubkeys: &SlotPubkeys, network: Network) -> bitcoin::Address {
    p2wsh_address(&crate::scripts::emergency_script(emergency_pubkeys), network)
}

/// Re-derives the four xpubs' slot order check used at startup: every
/// stakeholder must agree on the same four `all_xpubs`, just like
/// `KeyChain::new` enforces that our own key is among them.
pub fn xpubs_are_distinct(xpubs: &[Xpub; 4]) -> bool {
    for i in 0..4 {
        for j in (i + 1)..4 {
            if xpubs[i] == xpubs[j] {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpubs_are_distinct_detects_duplicate() {
        let secp = Secp256k1::new();
        let a = Xpub::from_priv(
            &secp,
            &bitcoin::bip32::Xpriv::new_master(Network::Regtest, &[1u8; 32]).unwrap(),
        );
        let b = Xpub::from_priv(
            &secp,
            &bitcoin::bip32::Xpriv::new_master(Network::Regtest, &[2u8; 32]).unwrap(),
        );
        let c = Xpub::from_priv(
            &secp,
            &bitcoin::bip32::Xpriv::new_master(Network::Regtest, &[3u8; 32]).unwrap(),
        );
        let d = Xpub::from_priv(
            &secp,
            &bitcoin::bip32::Xpriv::new_master(Network::Regtest, &[4u8; 32]).unwrap(),
        );
        assert!(xpubs_are_distinct(&[a, b, c, d]));
        assert!(!xpubs_are_distinct(&[a, a, b, c]));
    }
}
