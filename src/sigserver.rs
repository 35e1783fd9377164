//! HTTP client for the signature-exchange server: the collaborator
//! stakeholders use to publish and collect each other's ALL|ANYONECANPAY
//! revocation signatures, and traders use to propose and accept Spend
//! transactions. Plain JSON over HTTPS, no JSONRPC envelope — a much
//! narrower contract than talking to bitcoind.

use std::collections::HashMap;
use std::fmt;

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum SigServerError {
    Http(Box<ureq::Error>),
    Io(std::io::Error),
    /// The server returned 200 but a body we couldn't make sense of.
    MalformedResponse,
}

impl fmt::Display for SigServerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "sig-server request failed: {}", e),
            Self::Io(e) => write!(f, "sig-server response I/O error: {}", e),
            Self::MalformedResponse => write!(f, "sig-server returned an unexpected response"),
        }
    }
}

impl std::error::Error for SigServerError {}

impl From<ureq::Error> for SigServerError {
    fn from(e: ureq::Error) -> Self {
        Self::Http(Box::new(e))
    }
}

impl From<std::io::Error> for SigServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Which of the four pre-signed transaction kinds a signature or feerate
/// request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationKind {
    Emergency,
    Cancel,
    UnvaultEmergency,
}

impl RevocationKind {
    /// The sig-server's feerate key (spec.md §4.2): only two exist —
    /// `"emergency"` covers both emergency kinds, `"cancel"` covers both
    /// cancel and unvault, since UnvaultEmergency is sized and broadcast
    /// against the same target as Emergency.
    fn feerate_key(self) -> &'static str {
        match self {
            Self::Emergency | Self::UnvaultEmergency => "emergency",
            Self::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Serialize)]
struct PostSigBody {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct GetSigBody {
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeerateBody {
    feerate: u64,
}

/// A proposed Spend's outputs, address -> amount in sats. The wire shape
/// the sig-server stores and hands back (spec.md §4.5: "address-map"), not
/// a raw transaction: the poller only ever needs to judge destinations.
pub type AddressMap = HashMap<String, u64>;

#[derive(Debug, Deserialize)]
struct SpendAcceptanceBody {
    accepted: bool,
    refused: bool,
}

pub struct SigServerClient {
    base_url: String,
    agent: ureq::Agent,
}

impl SigServerClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    /// The feerate (sat/vbyte) the sig-server instructs us to use for the
    /// dummy-then-real two-pass sizing of a given revocation kind.
    pub fn feerate(&self, kind: RevocationKind) -> Result<u64, SigServerError> {
        let url = format!("{}/feerate/{}", self.base_url, kind.feerate_key());
        let body: FeerateBody = self.agent.get(&url).call()?.into_json()?;
        Ok(body.feerate)
    }

    /// Publishes our own ALL|ANYONECANPAY signature for a revocation
    /// transaction, identified by its txid.
    pub fn post_signature(
        &self,
        txid: &Txid,
        our_slot: usize,
        raw_sig_hex: &str,
    ) -> Result<(), SigServerError> {
        let url = format!("{}/sig/{}/{}", self.base_url, txid, our_slot);
        self.agent.post(&url).send_json(PostSigBody {
            signature: raw_sig_hex.to_string(),
        })?;
        Ok(())
    }

    /// Fetches a peer's signature for the given slot, if they've posted it
    /// yet. `None` means "not there yet", not an error.
    pub fn get_signature(
        &self,
        txid: &Txid,
        slot: usize,
    ) -> Result<Option<String>, SigServerError> {
        let url = format!("{}/sig/{}/{}", self.base_url, txid, slot);
        let resp = self.agent.get(&url).call();
        match resp {
            Ok(resp) => {
                let body: GetSigBody = resp.into_json()?;
                Ok(body.signature)
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A trader proposes a Spend, keyed by the Unvault txid it spends, as
    /// the map of destination address -> amount. The sig-server doesn't
    /// need the transaction itself (that's passed directly between traders
    /// and the cosigner); this is purely what the other stakeholders vote
    /// accept/refuse on.
    pub fn propose_spend(&self, unvault_txid: &Txid, outputs: &AddressMap) -> Result<(), SigServerError> {
        let url = format!("{}/spend/{}", self.base_url, unvault_txid);
        self.agent.post(&url).send_json(outputs)?;
        Ok(())
    }

    /// Fetches the currently-proposed Spend's address map for an Unvault,
    /// if any co-trader has submitted one.
    pub fn get_spend_proposal(&self, unvault_txid: &Txid) -> Result<Option<AddressMap>, SigServerError> {
        let url = format!("{}/spend/{}", self.base_url, unvault_txid);
        let resp = self.agent.get(&url).call();
        match resp {
            Ok(resp) => Ok(Some(resp.into_json()?)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetches every pending Spend proposal, keyed by the Unvault txid it
    /// spends. Used by the spend poller to discover proposals it hasn't
    /// voted on yet without polling each known vault individually.
    pub fn get_spends(&self) -> Result<HashMap<Txid, AddressMap>, SigServerError> {
        let url = format!("{}/spends", self.base_url);
        Ok(self.agent.get(&url).call()?.into_json()?)
    }

    /// Records this stakeholder's accept/refuse vote on a proposed Spend.
    pub fn vote_spend(&self, unvault_txid: &Txid, accept: bool) -> Result<(), SigServerError> {
        let endpoint = if accept { "accept" } else { "refuse" };
        let url = format!("{}/spend/{}/{}", self.base_url, unvault_txid, endpoint);
        self.agent.post(&url).call()?;
        Ok(())
    }

    /// Whether enough stakeholders have accepted the proposed Spend to
    /// complete it (spec.md's acked-addresses / acceptance threshold).
    pub fn spend_accepted(&self, unvault_txid: &Txid) -> Result<bool, SigServerError> {
        let url = format!("{}/spend/{}/accepted", self.base_url, unvault_txid);
        let body: SpendAcceptanceBody = self.agent.get(&url).call()?.into_json()?;
        Ok(body.accepted && !body.refused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_two_feerate_keys_exist() {
        assert_ne!(
            RevocationKind::Emergency.feerate_key(),
            RevocationKind::Cancel.feerate_key()
        );
        // UnvaultEmergency shares Emergency's feerate key — there is no
        // third, spec-undefined endpoint for it.
        assert_eq!(
            RevocationKind::UnvaultEmergency.feerate_key(),
            RevocationKind::Emergency.feerate_key()
        );
    }
}
