//! BIP143 sighash computation, raw signature production, and witness
//! assembly for the five transaction kinds.
//!
//! SIGHASH policy (spec.md §4.3): revocations (Emergency, Cancel,
//! UnvaultEmergency) are exchanged as ALL|ANYONECANPAY so any stakeholder
//! may append a fee-bump input; each party additionally keeps a private ALL
//! signature on the same template. Unvault and Spend are always ALL.

use std::fmt;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{self, ecdsa, Message, Secp256k1, Signing};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{PrivateKey, Script, Transaction, Witness};

/// A signature with its trailing SIGHASH-flag byte, as stored on the wire
/// and in witnesses.
pub type RawSignature = Vec<u8>;

#[derive(Debug)]
pub enum SignerError {
    Sighash(bitcoin::sighash::Error),
    /// A signature we received didn't carry the SIGHASH flag we required
    /// (spec.md §7: "Sighash-flag mismatch on received peer signatures").
    WrongSighashFlag { expected: EcdsaSighashType, got: u8 },
    MalformedSignature,
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Sighash(e) => write!(f, "sighash computation error: {}", e),
            Self::WrongSighashFlag { expected, got } => write!(
                f,
                "peer signature carries sighash flag {:#x}, expected {:#x}",
                got, *expected as u8
            ),
            Self::MalformedSignature => write!(f, "signature is missing its sighash flag byte"),
        }
    }
}

impl std::error::Error for SignerError {}

impl From<bitcoin::sighash::Error> for SignerError {
    fn from(e: bitcoin::sighash::Error) -> Self {
        Self::Sighash(e)
    }
}

/// Computes the BIP143 (SIGVERSION_WITNESS_V0) sighash over input 0 of `tx`
/// against `prev_script` (the witness script, *not* the P2WSH scriptPubKey)
/// and `prev_amount`.
pub fn sighash(
    tx: &Transaction,
    prev_script: &Script,
    prev_amount: u64,
    flag: EcdsaSighashType,
) -> Result<Message, SignerError> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache.segwit_signature_hash(0, prev_script, prev_amount, flag)?;
    Ok(Message::from_slice(&sighash.to_byte_array()).expect("sighash is 32 bytes"))
}

/// Signs `message` with `privkey` under `flag`, returning the DER signature
/// with the trailing sighash byte appended.
pub fn sign<C: Signing>(
    secp: &Secp256k1<C>,
    privkey: &PrivateKey,
    message: &Message,
    flag: EcdsaSighashType,
) -> RawSignature {
    let sig = secp.sign_ecdsa(message, &privkey.inner);
    let mut raw = sig.serialize_der().to_vec();
    raw.push(flag as u8);
    raw
}

/// Convenience combining [`sighash`] and [`sign`] for a single-input
/// template: the common case for every transaction kind in this protocol.
pub fn sign_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    prev_script: &Script,
    prev_amount: u64,
    privkey: &PrivateKey,
    flag: EcdsaSighashType,
) -> Result<RawSignature, SignerError> {
    let msg = sighash(tx, prev_script, prev_amount, flag)?;
    Ok(sign(secp, privkey, &msg, flag))
}

/// Validates that a raw signature someone else gave us carries the
/// SIGHASH flag we require, splitting off the flag byte. Used to enforce
/// spec.md §7's "assertion failure" policy on sighash-flag mismatches.
pub fn expect_flag(raw: &RawSignature, expected: EcdsaSighashType) -> Result<(), SignerError> {
    let (flag, _der) = raw.split_last().ok_or(SignerError::MalformedSignature)?;
    if *flag != expected as u8 {
        return Err(SignerError::WrongSighashFlag {
            expected,
            got: *flag,
        });
    }
    Ok(())
}

pub fn verify(
    secp: &Secp256k1<impl secp256k1::Verification>,
    pubkey: &secp256k1::PublicKey,
    message: &Message,
    raw: &RawSignature,
) -> Result<(), secp256k1::Error> {
    let (_flag, der) = raw.split_last().ok_or(secp256k1::Error::InvalidSignature)?;
    let sig = ecdsa::Signature::from_der(der)?;
    secp.verify_ecdsa(message, &sig, pubkey)
}

/// Witness for a transaction spending a vault (4-of-4 `OP_CHECKMULTISIG`)
/// or emergency (4-of-4 CSV `OP_CHECKMULTISIG`) output: the standard
/// CHECKMULTISIG dummy, the four signatures in slot order, then the script.
pub fn assemble_multisig_witness(script: &Script, sigs: &[RawSignature; 4]) -> Witness {
    let mut witness = Witness::new();
    witness.push(Vec::new());
    for sig in sigs {
        witness.push(sig.clone());
    }
    witness.push(script.to_bytes());
    witness
}

/// Witness for a revocation (Cancel, UnvaultEmergency) spending the
/// Unvault output via its "all four stakeholders" branch: the four
/// signatures in *reverse* slot order, then the script. No CHECKMULTISIG
/// dummy (the unvault script uses sum-of-CHECKSIGs, not CHECKMULTISIG).
pub fn assemble_unvault_revocation_witness(script: &Script, sigs: &[RawSignature; 4]) -> Witness {
    let mut witness = Witness::new();
    for sig in sigs.iter().rev() {
        witness.push(sig.clone());
    }
    witness.push(script.to_bytes());
    witness
}

/// Witness for a Spend transaction consuming the Unvault output's 2-of-3
/// (trader1, trader2, stakeholder1) + cosigner + CSV branch. Exactly one of
/// `trader1`/`trader2`/`stakeholder1` must be `None` (replaced by an empty
/// byte array); the cosigner signature is always present.
pub fn assemble_spend_witness(
    script: &Script,
    trader1: Option<&RawSignature>,
    trader2: Option<&RawSignature>,
    stakeholder1: Option<&RawSignature>,
    cosigner_sig: &RawSignature,
) -> Witness {
    let mut witness = Witness::new();
    witness.push(cosigner_sig.clone());
    witness.push(stakeholder1.cloned().unwrap_or_default());
    witness.push(trader2.cloned().unwrap_or_default());
    witness.push(trader1.cloned().unwrap_or_default());
    witness.push(script.to_bytes());
    witness
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::vault_script;
    use crate::testutils::{deterministic_secret_key, secp};
    use bitcoin::{absolute::LockTime, OutPoint, ScriptBuf, Sequence, TxIn, TxOut};

    fn dummy_tx() -> Transaction {
        Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: 1_000,
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn sighash_changes_with_flag() {
        let secp = secp();
        let pk = deterministic_secret_key(1);
        let privkey = PrivateKey::new(pk, bitcoin::Network::Regtest);
        let pubkeys = crate::testutils::dummy_pubkeys(5);
        let script = vault_script(&pubkeys);
        let tx = dummy_tx();

        let h_all = sighash(&tx, &script, 10_000, EcdsaSighashType::All).unwrap();
        let h_acp = sighash(
            &tx,
            &script,
            10_000,
            EcdsaSighashType::AllPlusAnyoneCanPay,
        )
        .unwrap();
        assert_ne!(h_all, h_acp);

        let sig_all = sign(&secp, &privkey, &h_all, EcdsaSighashType::All);
        assert_eq!(*sig_all.last().unwrap(), EcdsaSighashType::All as u8);
        expect_flag(&sig_all, EcdsaSighashType::All).unwrap();
        assert!(expect_flag(&sig_all, EcdsaSighashType::AllPlusAnyoneCanPay).is_err());
    }

    #[test]
    fn multisig_witness_has_dummy_and_four_sigs() {
        let pubkeys = crate::testutils::dummy_pubkeys(6);
        let script = vault_script(&pubkeys);
        let sigs: [RawSignature; 4] = [vec![1], vec![2], vec![3], vec![4]];
        let witness = assemble_multisig_witness(&script, &sigs);
        let items: Vec<&[u8]> = witness.iter().collect();
        assert_eq!(items.len(), 6);
        assert!(items[0].is_empty());
        assert_eq!(items[1], &[1]);
        assert_eq!(items[4], &[4]);
        assert_eq!(items[5], script.as_bytes());
    }

    #[test]
    fn unvault_revocation_witness_is_reverse_order() {
        let pubkeys = crate::testutils::dummy_pubkeys(6);
        let srv = crate::testutils::dummy_pubkeys(70)[0];
        let script = crate::scripts::unvault_script(&pubkeys, &srv);
        let sigs: [RawSignature; 4] = [vec![1], vec![2], vec![3], vec![4]];
        let witness = assemble_unvault_revocation_witness(&script, &sigs);
        let items: Vec<&[u8]> = witness.iter().collect();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0], &[4]);
        assert_eq!(items[1], &[3]);
        assert_eq!(items[2], &[2]);
        assert_eq!(items[3], &[1]);
    }

    #[test]
    fn spend_witness_skips_one_of_first_three() {
        let pubkeys = crate::testutils::dummy_pubkeys(6);
        let srv = crate::testutils::dummy_pubkeys(70)[0];
        let script = crate::scripts::unvault_script(&pubkeys, &srv);
        let t1: RawSignature = vec![0xaa];
        let s1: RawSignature = vec![0xcc];
        let cosig: RawSignature = vec![0xee];
        let witness = assemble_spend_witness(&script, Some(&t1), None, Some(&s1), &cosig);
        let items: Vec<&[u8]> = witness.iter().collect();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0], &[0xee]); // cosigner, bottom
        assert_eq!(items[1], &[0xcc]); // stakeholder1
        assert!(items[2].is_empty()); // trader2 skipped
        assert_eq!(items[3], &[0xaa]); // trader1, top
    }
}
