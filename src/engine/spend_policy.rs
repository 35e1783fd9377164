//! The spend poller's accept/refuse decision (spec.md §4.6, loop 2; P8;
//! S6). Kept as a pure function of addresses so it's testable without a
//! sig-server or bitcoind fixture.

use std::collections::HashSet;

use crate::sigserver::AddressMap;

/// Whether a proposed Spend's outputs should be accepted.
///
/// Accept iff every output address is either a known vault address or in
/// `acked_addresses`, AND at least one output pays an `acked_addresses`
/// entry — a proposal that only pays back into our own vaults (pure
/// change) is refused, since it authorizes no external spend at all.
pub fn evaluate_spend_proposal(
    outputs: &AddressMap,
    known_vault_addresses: &HashSet<String>,
    acked_addresses: &[String],
) -> bool {
    let all_known_or_acked = outputs
        .keys()
        .all(|addr| known_vault_addresses.contains(addr) || acked_addresses.iter().any(|a| a == addr));
    let pays_an_acked_address = outputs
        .keys()
        .any(|addr| acked_addresses.iter().any(|a| a == addr));

    all_known_or_acked && pays_an_acked_address
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(pairs: &[(&str, u64)]) -> AddressMap {
        pairs.iter().map(|(a, v)| (a.to_string(), *v)).collect()
    }

    #[test]
    fn refuses_unknown_address() {
        let known = HashSet::from(["bc1qvault".to_string()]);
        let acked = vec!["bc1qacked".to_string()];
        let out = outputs(&[("bc1qstranger", 1_000)]);
        assert!(!evaluate_spend_proposal(&out, &known, &acked));
    }

    #[test]
    fn refuses_change_only() {
        let known = HashSet::from(["bc1qvault".to_string()]);
        let acked = vec!["bc1qacked".to_string()];
        let out = outputs(&[("bc1qvault", 90_000)]);
        assert!(!evaluate_spend_proposal(&out, &known, &acked));
    }

    #[test]
    fn accepts_acked_plus_change() {
        let known = HashSet::from(["bc1qvault".to_string()]);
        let acked = vec!["bc1qacked".to_string()];
        let out = outputs(&[("bc1qacked", 10_000), ("bc1qvault", 90_000)]);
        assert!(evaluate_spend_proposal(&out, &known, &acked));
    }

    #[test]
    fn accepts_acked_only() {
        let known = HashSet::from(["bc1qvault".to_string()]);
        let acked = vec!["bc1qacked".to_string()];
        let out = outputs(&[("bc1qacked", 1_000)]);
        assert!(evaluate_spend_proposal(&out, &known, &acked));
    }

    #[test]
    fn refuses_unknown_mixed_with_acked() {
        let known = HashSet::from(["bc1qvault".to_string()]);
        let acked = vec!["bc1qacked".to_string()];
        let out = outputs(&[("bc1qacked", 1_000), ("bc1qstranger", 1_000)]);
        assert!(!evaluate_spend_proposal(&out, &known, &acked));
    }
}
