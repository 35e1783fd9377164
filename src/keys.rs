//! Slot-ordered key derivation.
//!
//! BIP32 itself is treated as a narrow external contract (we lean entirely on
//! `bitcoin::bip32`); this module only adds the slot-ordering and "which one
//! of these four xpubs is mine" bookkeeping the protocol needs on top of it.

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, SecretKey, Signing, Verification};
use bitcoin::{Network, PrivateKey, PublicKey};
use std::fmt;

use crate::scripts::SlotPubkeys;

#[derive(Debug)]
pub enum KeyError {
    Bip32(bitcoin::bip32::Error),
    /// `our_xpriv`'s master xpub didn't match any of the four `all_xpubs`.
    NotAStakeholder,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bip32(e) => write!(f, "BIP32 derivation error: {}", e),
            Self::NotAStakeholder => {
                write!(f, "our xpriv's xpub is not among the four configured xpubs")
            }
        }
    }
}

impl std::error::Error for KeyError {}

impl From<bitcoin::bip32::Error> for KeyError {
    fn from(e: bitcoin::bip32::Error) -> Self {
        Self::Bip32(e)
    }
}

/// The four stakeholders' extended keys, slot-ordered, with the local
/// party's own slot identified.
pub struct KeyChain {
    our_xpriv: Xpriv,
    /// One entry per slot; `None` at our own slot (we derive straight from
    /// `our_xpriv` there instead of round-tripping through its xpub).
    xpubs: [Option<Xpub>; 4],
    our_slot: usize,
}

impl KeyChain {
    pub fn new<C: Signing>(
        secp: &Secp256k1<C>,
        our_xpriv: Xpriv,
        all_xpubs: [Xpub; 4],
    ) -> Result<Self, KeyError> {
        let our_xpub = Xpub::from_priv(secp, &our_xpriv);
        let mut xpubs: [Option<Xpub>; 4] = [None, None, None, None];
        let mut our_slot = None;
        for (i, xpub) in all_xpubs.into_iter().enumerate() {
            if xpub == our_xpub {
                our_slot = Some(i);
                xpubs[i] = None;
            } else {
                xpubs[i] = Some(xpub);
            }
        }
        let our_slot = our_slot.ok_or(KeyError::NotAStakeholder)?;

        Ok(Self {
            our_xpriv,
            xpubs,
            our_slot,
        })
    }

    /// 0-indexed slot of the local stakeholder (slots 1/2 are the traders).
    pub fn our_slot(&self) -> usize {
        self.our_slot
    }

    pub fn network(&self) -> Network {
        self.our_xpriv.network
    }

    fn path(index: u32) -> Result<DerivationPath, KeyError> {
        Ok(DerivationPath::from(vec![ChildNumber::from_normal_idx(index)?]))
    }

    /// The four slot-ordered pubkeys used for both the vault 4-of-4 and, at
    /// the same index, the unvault script.
    pub fn vault_pubkeys<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        index: u32,
    ) -> Result<SlotPubkeys, KeyError> {
        let path = Self::path(index)?;
        let mut out = Vec::with_capacity(4);
        for i in 0..4 {
            let pk = if i == self.our_slot {
                self.our_xpriv
                    .derive_priv(secp, &path)?
                    .to_priv()
                    .public_key(secp)
            } else {
                let xpub = self.xpubs[i].as_ref().expect("only our own slot is None");
                PublicKey::new(xpub.derive_pub(secp, &path)?.public_key)
            };
            out.push(pk);
        }
        Ok(out.try_into().expect("exactly 4 slots"))
    }

    /// Our own private key at the given derivation index.
    pub fn our_privkey<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        index: u32,
    ) -> Result<SecretKey, KeyError> {
        let path = Self::path(index)?;
        Ok(self.our_xpriv.derive_priv(secp, &path)?.private_key)
    }

    pub fn our_private_key<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        index: u32,
    ) -> Result<PrivateKey, KeyError> {
        let path = Self::path(index)?;
        Ok(self.our_xpriv.derive_priv(secp, &path)?.to_priv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::secp;

    fn xpriv_from_seed(n: u8) -> Xpriv {
        let seed = [n; 32];
        Xpriv::new_master(Network::Regtest, &seed).unwrap()
    }

    #[test]
    fn derives_same_pubkey_set_as_peers_would() {
        let secp = secp();
        let xprivs: Vec<Xpriv> = (0..4).map(xpriv_from_seed).collect();
        let xpubs: [Xpub; 4] = {
            let v: Vec<Xpub> = xprivs.iter().map(|x| Xpub::from_priv(&secp, x)).collect();
            [v[0], v[1], v[2], v[3]]
        };

        let chain0 = KeyChain::new(&secp, xprivs[0], xpubs).unwrap();
        let chain2 = KeyChain::new(&secp, xprivs[2], xpubs).unwrap();

        assert_eq!(chain0.our_slot(), 0);
        assert_eq!(chain2.our_slot(), 2);

        let pubkeys_from_0 = chain0.vault_pubkeys(&secp, 42).unwrap();
        let pubkeys_from_2 = chain2.vault_pubkeys(&secp, 42).unwrap();
        assert_eq!(pubkeys_from_0, pubkeys_from_2);
    }

    #[test]
    fn rejects_xpriv_not_in_the_xpub_set() {
        let secp = secp();
        let xprivs: Vec<Xpriv> = (0..4).map(xpriv_from_seed).collect();
        let outsider = xpriv_from_seed(99);
        let xpubs: [Xpub; 4] = {
            let v: Vec<Xpub> = xprivs.iter().map(|x| Xpub::from_priv(&secp, x)).collect();
            [v[0], v[1], v[2], v[3]]
        };

        assert!(matches!(
            KeyChain::new(&secp, outsider, xpubs),
            Err(KeyError::NotAStakeholder)
        ));
    }
}
