//! Top-level error aggregation.
//!
//! Each module defines its own narrow error enum with a hand-written
//! `Display`/`std::error::Error` impl (no `thiserror`), matching
//! `control.rs`'s style in the teacher daemon. `EngineError` is what the
//! engine's public entry points and pollers return, bridging the
//! lower-level errors with `From`.

use std::fmt;

use crate::bitcoind::BitcoindError;
use crate::cosigner::CosignerError;
use crate::feebump::FeeBumpError;
use crate::keys::KeyError;
use crate::signer::SignerError;
use crate::sigserver::SigServerError;
use crate::transactions::TxBuildError;

#[derive(Debug)]
pub enum EngineError {
    Bitcoind(BitcoindError),
    SigServer(SigServerError),
    Cosigner(CosignerError),
    Keys(KeyError),
    TxBuild(TxBuildError),
    Signer(SignerError),
    FeeBump(FeeBumpError),
    /// A watched UTXO's scriptPubKey didn't match any known derivation
    /// index (I2). Fatal to that ingest.
    DerivationMismatch { address: String },
    /// An I1-I5 invariant that should be unreachable in correct operation
    /// didn't hold. Surfaced rather than silently continuing.
    Invariant(&'static str),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bitcoind(e) => write!(f, "bitcoind error: {}", e),
            Self::SigServer(e) => write!(f, "sig-server error: {}", e),
            Self::Cosigner(e) => write!(f, "cosigner error: {}", e),
            Self::Keys(e) => write!(f, "key derivation error: {}", e),
            Self::TxBuild(e) => write!(f, "transaction construction error: {}", e),
            Self::Signer(e) => write!(f, "signing error: {}", e),
            Self::FeeBump(e) => write!(f, "fee-bump error: {}", e),
            Self::DerivationMismatch { address } => write!(
                f,
                "no known derivation index produces watched address '{}'",
                address
            ),
            Self::Invariant(msg) => write!(f, "invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<BitcoindError> for EngineError {
    fn from(e: BitcoindError) -> Self {
        Self::Bitcoind(e)
    }
}

impl From<SigServerError> for EngineError {
    fn from(e: SigServerError) -> Self {
        Self::SigServer(e)
    }
}

impl From<CosignerError> for EngineError {
    fn from(e: CosignerError) -> Self {
        Self::Cosigner(e)
    }
}

impl From<KeyError> for EngineError {
    fn from(e: KeyError) -> Self {
        Self::Keys(e)
    }
}

impl From<TxBuildError> for EngineError {
    fn from(e: TxBuildError) -> Self {
        Self::TxBuild(e)
    }
}

impl From<SignerError> for EngineError {
    fn from(e: SignerError) -> Self {
        Self::Signer(e)
    }
}

impl From<FeeBumpError> for EngineError {
    fn from(e: FeeBumpError) -> Self {
        Self::FeeBump(e)
    }
}
