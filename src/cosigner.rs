//! HTTP client for the cosigning server: the collaborator that countersigns
//! every Spend transaction's "2-of-3 plus cosigner" branch, so a CSV-expired
//! Unvault output can't be swept by only two colluding traders without the
//! stakeholders noticing via the Cancel path. See `other_examples`'
//! `revault-cosignerd` for the server side of this exact contract.

use std::fmt;

use bitcoin::{PublicKey, Txid};
use serde::Deserialize;

use crate::scripts::SlotPubkeys;
use crate::sigserver::AddressMap;

#[derive(Debug)]
pub enum CosignerError {
    Http(Box<ureq::Error>),
    Io(std::io::Error),
    InvalidPubkey,
    /// The cosigner refused to sign (already signed a conflicting Spend
    /// for this Unvault, per its anti-replay policy).
    Refused,
}

impl fmt::Display for CosignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "cosigner request failed: {}", e),
            Self::Io(e) => write!(f, "cosigner response I/O error: {}", e),
            Self::InvalidPubkey => write!(f, "cosigner returned a malformed pubkey"),
            Self::Refused => write!(f, "cosigner refused to sign (already signed a spend from this unvault)"),
        }
    }
}

impl std::error::Error for CosignerError {}

impl From<ureq::Error> for CosignerError {
    fn from(e: ureq::Error) -> Self {
        Self::Http(Box::new(e))
    }
}

impl From<std::io::Error> for CosignerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[derive(Debug, Deserialize)]
struct PubkeyBody {
    pubkey: String,
}

#[derive(Debug, Deserialize)]
struct CosignBody {
    signature: Option<String>,
}

pub struct CosignerClient {
    base_url: String,
    agent: ureq::Agent,
}

impl CosignerClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    /// The cosigner's long-lived pubkey for this vault series. Used once,
    /// at startup, to embed in every `unvault_script`.
    pub fn pubkey(&self) -> Result<PublicKey, CosignerError> {
        let url = format!("{}/pubkey", self.base_url);
        let body: PubkeyBody = self.agent.get(&url).call()?.into_json()?;
        body.pubkey.parse().map_err(|_| CosignerError::InvalidPubkey)
    }

    /// Asks the cosigner to sign a proposed Spend: the Unvault output it
    /// spends (by txid and prevout amount), the vault's slot-ordered
    /// pubkeys, and the destination address map — everything the cosigner
    /// needs to rebuild the same template and apply its own out-of-band
    /// policy check, without us handing over a raw transaction. Returns its
    /// DER signature with the trailing SIGHASH_ALL byte already appended.
    pub fn sign_spend(
        &self,
        unvault_txid: &Txid,
        pubkeys: &SlotPubkeys,
        outputs: &AddressMap,
        prev_amount: u64,
    ) -> Result<Vec<u8>, CosignerError> {
        let url = format!("{}/cosign", self.base_url);
        let body: CosignBody = self
            .agent
            .post(&url)
            .send_json(serde_json::json!({
                "unvault_txid": unvault_txid.to_string(),
                "pubkeys": pubkeys.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
                "outputs": outputs,
                "prev_amount": prev_amount,
            }))?
            .into_json()?;
        let sig_hex = body.signature.ok_or(CosignerError::Refused)?;
        hex::decode(sig_hex).map_err(|_| CosignerError::Refused)
    }
}
