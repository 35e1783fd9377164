//! A narrow synchronous `bitcoind` RPC client: just the handful of calls the
//! engine needs to watch addresses, pull UTXOs, measure transaction sizes,
//! broadcast, and (for the fee-bumper) fund and sign a wallet-owned top-up
//! input. Cookie-file authentication only, no wallet passphrase handling:
//! this talks to a watch-only-plus-funding wallet that's already loaded.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use bitcoin::{Address, OutPoint, Transaction, Txid};
use jsonrpc::simple_http::{self, SimpleHttpTransport};
use jsonrpc::Client;
use serde::Deserialize;
use serde_json::value::RawValue;

#[derive(Debug)]
pub enum BitcoindError {
    CookieFile(std::io::Error),
    Server(jsonrpc::Error),
    /// A response didn't have the shape we expected for the method called.
    UnexpectedResponse { method: &'static str },
}

impl fmt::Display for BitcoindError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::CookieFile(e) => write!(f, "reading the bitcoind cookie file: {}", e),
            Self::Server(e) => write!(f, "bitcoind RPC error: {}", e),
            Self::UnexpectedResponse { method } => {
                write!(f, "unexpected response shape from bitcoind's '{}'", method)
            }
        }
    }
}

impl std::error::Error for BitcoindError {}

impl From<jsonrpc::Error> for BitcoindError {
    fn from(e: jsonrpc::Error) -> Self {
        Self::Server(e)
    }
}

/// A single entry from `listunspent`, filtered to what the funding poller
/// needs to recognize a new deposit.
#[derive(Debug, Clone, Deserialize)]
pub struct ListUnspentEntry {
    pub txid: Txid,
    pub vout: u32,
    pub address: Option<String>,
    pub amount: f64,
    pub confirmations: u32,
}

impl ListUnspentEntry {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    pub fn amount_sat(&self) -> u64 {
        (self.amount * 100_000_000.0).round() as u64
    }
}

pub struct BitcoindClient {
    client: Client,
}

impl BitcoindClient {
    pub fn new(url: &str, cookie_path: &PathBuf) -> Result<Self, BitcoindError> {
        let cookie = fs::read_to_string(cookie_path).map_err(BitcoindError::CookieFile)?;
        let (user, pass) = cookie
            .split_once(':')
            .unwrap_or((cookie.as_str(), ""));

        let transport = SimpleHttpTransport::builder()
            .url(url)
            .map_err(simple_http_to_rpc_err)?
            .auth(user, Some(pass))
            .build();

        Ok(Self {
            client: Client::with_transport(transport),
        })
    }

    fn call<T: for<'a> Deserialize<'a>>(
        &self,
        method: &'static str,
        params: &[Box<RawValue>],
    ) -> Result<T, BitcoindError> {
        let request = self.client.build_request(method, params);
        let response = self.client.send_request(request)?;
        response
            .result()
            .map_err(|_| BitcoindError::UnexpectedResponse { method })
    }

    /// UTXOs held by the watch-only wallet, used by the funding poller to
    /// notice new deposits and confirmations advancing.
    pub fn list_unspent(&self, min_conf: u32) -> Result<Vec<ListUnspentEntry>, BitcoindError> {
        let params = [jsonrpc::arg(min_conf), jsonrpc::arg(9_999_999)];
        self.call("listunspent", &params)
    }

    /// Registers an address for `importaddress`-style watching, so future
    /// deposits to it show up in `list_unspent`.
    pub fn import_address(&self, address: &Address) -> Result<(), BitcoindError> {
        let params = [
            jsonrpc::arg(address.to_string()),
            jsonrpc::arg(""),
            jsonrpc::arg(true),
        ];
        self.call("importaddress", &params)
    }

    pub fn get_raw_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, BitcoindError> {
        let params = [jsonrpc::arg(txid.to_string())];
        match self.call::<String>("getrawtransaction", &params) {
            Ok(hex) => {
                let bytes = hex::decode(hex).map_err(|_| BitcoindError::UnexpectedResponse {
                    method: "getrawtransaction",
                })?;
                bitcoin::consensus::deserialize(&bytes)
                    .map(Some)
                    .map_err(|_| BitcoindError::UnexpectedResponse {
                        method: "getrawtransaction",
                    })
            }
            Err(_) => Ok(None),
        }
    }

    pub fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, BitcoindError> {
        let raw = bitcoin::consensus::encode::serialize_hex(tx);
        let params = [jsonrpc::arg(raw)];
        self.call("sendrawtransaction", &params)
    }

    /// Whether bitcoind's mempool policy would accept `tx` as-is, without
    /// broadcasting it. Used before handing a signed revocation to a peer.
    pub fn test_mempool_accept(&self, tx: &Transaction) -> Result<bool, BitcoindError> {
        let raw = bitcoin::consensus::encode::serialize_hex(tx);
        let params = [jsonrpc::arg(vec![raw])];

        #[derive(Deserialize)]
        struct Entry {
            allowed: bool,
        }
        let results: Vec<Entry> = self.call("testmempoolaccept", &params)?;
        Ok(results.first().map(|e| e.allowed).unwrap_or(false))
    }

    /// The feerate (sat/vbyte) bitcoind currently estimates for confirmation
    /// within `target` blocks. Falls back to `None` if bitcoind doesn't have
    /// enough data yet (a cold regtest node, typically).
    pub fn estimate_smart_fee(&self, target: u32) -> Result<Option<f64>, BitcoindError> {
        let params = [jsonrpc::arg(target)];

        #[derive(Deserialize)]
        struct Response {
            feerate: Option<f64>,
        }
        let resp: Response = self.call("estimatesmartfee", &params)?;
        Ok(resp.feerate.map(|btc_per_kvb| btc_per_kvb * 100_000.0))
    }

    /// Has bitcoind's own wallet fund a raw transaction: adds inputs (and,
    /// if needed, a change output) from its own UTXOs to cover the outputs
    /// already present. Used by the fee-bumper to produce the top-up input
    /// spec.md §4.4 describes, without touching any stakeholder key.
    pub fn fund_raw_transaction(&self, tx: &Transaction) -> Result<Transaction, BitcoindError> {
        let raw = bitcoin::consensus::encode::serialize_hex(tx);
        let params = [jsonrpc::arg(raw)];

        #[derive(Deserialize)]
        struct Response {
            hex: String,
        }
        let resp: Response = self.call("fundrawtransaction", &params)?;
        let bytes = hex::decode(resp.hex).map_err(|_| BitcoindError::UnexpectedResponse {
            method: "fundrawtransaction",
        })?;
        bitcoin::consensus::deserialize(&bytes).map_err(|_| BitcoindError::UnexpectedResponse {
            method: "fundrawtransaction",
        })
    }

    /// Has bitcoind's own wallet sign the inputs it added via
    /// `fund_raw_transaction`. The stakeholder's own appended-input
    /// signature (over the scratch key) is applied separately by the
    /// caller; this only touches bitcoind-wallet-owned inputs.
    pub fn sign_raw_transaction_with_wallet(
        &self,
        tx: &Transaction,
    ) -> Result<Transaction, BitcoindError> {
        let raw = bitcoin::consensus::encode::serialize_hex(tx);
        let params = [jsonrpc::arg(raw)];

        #[derive(Deserialize)]
        struct Response {
            hex: String,
            complete: bool,
        }
        let resp: Response = self.call("signrawtransactionwithwallet", &params)?;
        if !resp.complete {
            return Err(BitcoindError::UnexpectedResponse {
                method: "signrawtransactionwithwallet",
            });
        }
        let bytes = hex::decode(resp.hex).map_err(|_| BitcoindError::UnexpectedResponse {
            method: "signrawtransactionwithwallet",
        })?;
        bitcoin::consensus::deserialize(&bytes).map_err(|_| BitcoindError::UnexpectedResponse {
            method: "signrawtransactionwithwallet",
        })
    }

    /// Submits a package of transactions (the fee-bump top-up plus the
    /// bumped revocation spending it) so bitcoind accepts both together
    /// even though the top-up alone wouldn't meet the target feerate.
    /// Falls back to broadcasting sequentially for nodes too old to have
    /// `submitpackage`; a rejection of the second transaction in that case
    /// still surfaces as an error, matching §7's "persistent reject is
    /// surfaced" policy.
    pub fn submit_package(&self, txs: &[Transaction]) -> Result<Vec<Txid>, BitcoindError> {
        let raws: Vec<String> = txs.iter().map(bitcoin::consensus::encode::serialize_hex).collect();
        let params = [jsonrpc::arg(raws)];

        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "tx-results")]
            tx_results: std::collections::HashMap<String, TxResult>,
        }
        #[derive(Deserialize)]
        struct TxResult {
            txid: Txid,
        }
        match self.call::<Response>("submitpackage", &params) {
            Ok(resp) => Ok(resp.tx_results.into_values().map(|r| r.txid).collect()),
            Err(_) => txs.iter().map(|tx| self.send_raw_transaction(tx)).collect(),
        }
    }
}

fn simple_http_to_rpc_err(e: simple_http::Error) -> BitcoindError {
    BitcoindError::Server(jsonrpc::Error::Transport(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_sat_rounds_btc_correctly() {
        let entry = ListUnspentEntry {
            txid: "0000000000000000000000000000000000000000000000000000000000000000"[..64]
                .parse()
                .expect("64 zero hex chars is a valid txid"),
            vout: 0,
            address: None,
            amount: 0.00_05_0000,
            confirmations: 1,
        };
        assert_eq!(entry.amount_sat(), 50_000);
    }
}
