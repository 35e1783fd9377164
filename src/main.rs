//! `revault-engined`: loads the configuration, brings up the three
//! collaborator clients, and runs the funding/signature/spend polling
//! loops. A `--conf <path>` argument is parsed by hand, matching the
//! narrowness of the rest of this binary's surface (no control socket, no
//! JSONRPC server: this engine's only interfaces are bitcoind, the
//! sig-server and the cosigner).

use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use revault_engine::config::Config;
use revault_engine::cosigner::CosignerClient;
use revault_engine::engine::{ingest, pollers, reconciliation, signatures, VaultEngine};
use revault_engine::{bitcoind::BitcoindClient, sigserver::SigServerClient};

/// How often the main loop re-polls bitcoind for funding and the sig-server
/// for spend proposals.
const LOOP_INTERVAL: Duration = Duration::from_secs(10);

fn parse_conf_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--conf" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    PathBuf::from("revault-engine.toml")
}

fn main() {
    let conf_path = parse_conf_path();

    let config = match Config::from_file(&conf_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {}", conf_path.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = revault_engine::logging::setup(&config.log_level) {
        eprintln!("failed to initialize logging: {}", e);
        process::exit(1);
    }

    log::info!(
        "starting revault-engined as stakeholder slot {} on {}",
        config.our_slot,
        config.network
    );

    let secp = bitcoin::secp256k1::Secp256k1::new();
    let keys = match revault_engine::keys::KeyChain::new(&secp, config.our_xpriv, config.all_xpubs)
    {
        Ok(k) => k,
        Err(e) => {
            log::error!("key configuration error: {}", e);
            process::exit(1);
        }
    };

    let bitcoind = match BitcoindClient::new(&config.bitcoind_url, &config.bitcoind_cookie_path) {
        Ok(b) => b,
        Err(e) => {
            log::error!("failed to connect to bitcoind: {}", e);
            process::exit(1);
        }
    };
    let sigserver = SigServerClient::new(config.sigserver_url.clone());
    let cosigner_client = CosignerClient::new(config.cosigner_url.clone());

    let cosigner_pubkey = match cosigner_client.pubkey() {
        Ok(pk) => pk,
        Err(e) => {
            log::error!("failed to fetch the cosigner's pubkey: {}", e);
            process::exit(1);
        }
    };

    let emergency_address =
        revault_engine::engine::emergency_address(&config.emergency_pubkeys, config.network);
    if let Err(e) = bitcoind.import_address(&emergency_address) {
        log::warn!("failed to register the emergency watch address: {}", e);
    }

    let mut engine = VaultEngine::new(
        secp,
        keys,
        config.emergency_pubkeys,
        cosigner_pubkey,
        config.network,
        config.starting_index,
        config.acked_addresses.clone(),
        bitcoind,
        sigserver,
        cosigner_client,
    );

    loop {
        if let Err(e) = ingest::poll_for_funds(&mut engine) {
            log::warn!("funding poll failed: {}", e);
        }
        for e in signatures::run_signature_round(&mut engine) {
            log::warn!("signature round failed for a vault: {}", e);
        }
        if let Err(e) = reconciliation::reconcile_vanished_funding(&mut engine) {
            log::warn!("reconciliation poll failed: {}", e);
        }
        match pollers::poll_for_spends(&mut engine) {
            Ok(completed) => {
                for outpoint in completed {
                    log::info!("spend completed for vault {}", outpoint);
                }
            }
            Err(e) => log::warn!("spend poll failed: {}", e),
        }
        thread::sleep(LOOP_INTERVAL);
    }
}
