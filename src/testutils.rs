//! Deterministic fixtures shared by unit tests across the crate.
//!
//! Grounded on `revault-cosignerd`'s `utils::test_builder` pattern: fixed
//! byte-array seeds rather than RNG, so a failing test is reproducible.
#![cfg(test)]

use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::PublicKey;

use crate::scripts::SlotPubkeys;

pub fn secp() -> Secp256k1<bitcoin::secp256k1::All> {
    Secp256k1::new()
}

/// A deterministic, non-zero secret key derived from a small seed byte.
pub fn deterministic_secret_key(seed: u8) -> SecretKey {
    let mut bytes = [0x11u8; 32];
    bytes[31] = seed;
    // Avoid the extremely unlikely but possible all-zero/overflow edge by
    // nudging the seed byte if needed; in practice 0x11-prefixed keys are
    // always valid scalars.
    SecretKey::from_slice(&bytes).expect("deterministic seed is a valid scalar")
}

pub fn deterministic_pubkey(seed: u8) -> PublicKey {
    let secp = secp();
    let sk = deterministic_secret_key(seed);
    PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk))
}

/// Four distinct, deterministic pubkeys, seeded off of `base` so tests can
/// request independent sets without colliding.
pub fn dummy_pubkeys(base: u8) -> SlotPubkeys {
    [
        deterministic_pubkey(base.wrapping_mul(4).wrapping_add(1)),
        deterministic_pubkey(base.wrapping_mul(4).wrapping_add(2)),
        deterministic_pubkey(base.wrapping_mul(4).wrapping_add(3)),
        deterministic_pubkey(base.wrapping_mul(4).wrapping_add(4)),
    ]
}
