//! `VaultRecord`: everything the engine tracks about a single vault, kept
//! in memory for the life of the process (spec.md explicitly scopes
//! persistence out — see `Non-goals`). Mirrors the bookkeeping
//! `revault.vault.Vault` keeps per deposit in the original implementation
//! this protocol was distilled from.

use bitcoin::{OutPoint, Txid};

use crate::scripts::SlotPubkeys;
use crate::signer::RawSignature;

use super::state::VaultState;

/// One stakeholder's signature per slot, for one revocation transaction
/// kind. `None` at a slot means we haven't received that stakeholder's
/// signature yet.
pub type SigSet = [Option<RawSignature>; 4];

pub struct VaultRecord {
    pub outpoint: OutPoint,
    pub amount: u64,
    pub derivation_index: u32,
    pub pubkeys: SlotPubkeys,
    pub state: VaultState,

    pub cancel_sigs: SigSet,
    pub emergency_sigs: SigSet,
    pub unvault_emergency_sigs: SigSet,
    pub unvault_sigs: SigSet,

    /// spec.md §3's flags, tracked explicitly rather than re-derived from
    /// the sig tables every time, since I4's gate ("must not be
    /// transmitted until I3 holds") is a one-way latch, not a pure function
    /// of current table contents (a table can't un-fill, but keeping an
    /// explicit flag matches the data model literally and is what
    /// `publish_unvault_signature_if_secure` consults).
    pub emergency_signed: bool,
    /// Cancel *and* unvault-emergency tables both complete (spec.md §3: a
    /// distinct flag from `emergency_signed`; I3's "secure" is the
    /// conjunction of both).
    pub unvault_secure: bool,
    pub unvault_signed: bool,

    /// Cached once the templates are first built, at the feerate in force
    /// at that time: a transaction's txid depends only on its non-witness
    /// fields (version, inputs, outputs, locktime), not on the witness, so
    /// every stakeholder who built from the same inputs gets the same
    /// txid — but only if the *value* (derived from the feerate at build
    /// time) doesn't silently drift between one stakeholder's poll and
    /// another's. Caching here, rather than re-deriving from the
    /// sig-server's current feerate on every poll, is what keeps these
    /// stable keys for the sig-server's per-slot signature tables.
    pub unvault_txid: Option<Txid>,
    pub unvault_value: Option<u64>,
    pub emergency_txid: Option<Txid>,
    pub emergency_value: Option<u64>,
    pub cancel_txid: Option<Txid>,
    pub cancel_value: Option<u64>,
    pub unvault_emergency_txid: Option<Txid>,
    pub unvault_emergency_value: Option<u64>,
    pub spend_txid: Option<Txid>,
}

impl VaultRecord {
    pub fn new(outpoint: OutPoint, amount: u64, derivation_index: u32, pubkeys: SlotPubkeys) -> Self {
        Self {
            outpoint,
            amount,
            derivation_index,
            pubkeys,
            state: VaultState::Unconfirmed,
            cancel_sigs: Default::default(),
            emergency_sigs: Default::default(),
            unvault_emergency_sigs: Default::default(),
            unvault_sigs: Default::default(),
            emergency_signed: false,
            unvault_secure: false,
            unvault_signed: false,
            unvault_txid: None,
            unvault_value: None,
            emergency_txid: None,
            emergency_value: None,
            cancel_txid: None,
            cancel_value: None,
            unvault_emergency_txid: None,
            unvault_emergency_value: None,
            spend_txid: None,
        }
    }

    fn table_complete(sigs: &SigSet) -> bool {
        sigs.iter().all(Option::is_some)
    }

    /// spec.md's I3: a vault is secure iff all three revocation tables
    /// (emergency, cancel, unvault-emergency) are complete.
    pub fn is_secure(&self) -> bool {
        self.emergency_signed && self.unvault_secure
    }

    /// Re-derives `emergency_signed`/`unvault_secure` from the current sig
    /// tables and, if now secure, moves `Funded` -> `Secured`. Called
    /// opportunistically after every signature update; a no-op otherwise.
    pub fn maybe_secure(&mut self) {
        self.emergency_signed = Self::table_complete(&self.emergency_sigs);
        self.unvault_secure =
            Self::table_complete(&self.cancel_sigs) && Self::table_complete(&self.unvault_emergency_sigs);
        if self.state == VaultState::Funded && self.is_secure() {
            self.state = VaultState::Secured;
        }
    }

    /// Moves `Secured` -> `Active` once every stakeholder's Unvault
    /// signature has arrived.
    pub fn maybe_activate(&mut self) {
        if self.state == VaultState::Secured && Self::table_complete(&self.unvault_sigs) {
            self.state = VaultState::Active;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::dummy_pubkeys;

    fn record() -> VaultRecord {
        VaultRecord::new(OutPoint::null(), 100_000, 0, dummy_pubkeys(1))
    }

    #[test]
    fn not_secured_until_all_twelve_signatures_present() {
        let mut v = record();
        v.state = VaultState::Funded;
        for i in 0..3 {
            v.cancel_sigs[i] = Some(vec![1]);
            v.emergency_sigs[i] = Some(vec![1]);
            v.unvault_emergency_sigs[i] = Some(vec![1]);
        }
        v.maybe_secure();
        assert_eq!(v.state, VaultState::Funded);
        assert!(!v.is_secure());

        v.cancel_sigs[3] = Some(vec![1]);
        v.emergency_sigs[3] = Some(vec![1]);
        v.unvault_emergency_sigs[3] = Some(vec![1]);
        v.maybe_secure();
        assert_eq!(v.state, VaultState::Secured);
        assert!(v.is_secure());
    }

    #[test]
    fn unvault_secure_is_independent_of_emergency_signed() {
        let mut v = record();
        for i in 0..4 {
            v.cancel_sigs[i] = Some(vec![1]);
            v.unvault_emergency_sigs[i] = Some(vec![1]);
        }
        v.maybe_secure();
        assert!(v.unvault_secure);
        assert!(!v.emergency_signed);
        assert!(!v.is_secure());
    }

    #[test]
    fn activates_only_once_secured_and_unvault_sigs_complete() {
        let mut v = record();
        v.state = VaultState::Secured;
        for i in 0..3 {
            v.unvault_sigs[i] = Some(vec![1]);
        }
        v.maybe_activate();
        assert_eq!(v.state, VaultState::Secured);

        v.unvault_sigs[3] = Some(vec![1]);
        v.maybe_activate();
        assert_eq!(v.state, VaultState::Active);
    }
}
