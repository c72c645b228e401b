//! Source-IP allowlisting for the payment provider's callback endpoints.
//!
//! The Daraja callbacks carry no signature, so the network origin is the
//! only boundary check available. The ledger itself never trusts this; the
//! idempotency keys inside the handlers do the heavy lifting.

use std::net::SocketAddr;

use crate::state::AppState;

/// True when the peer may deliver payment callbacks.
pub fn is_allowed_callback_source(state: &AppState, peer: &SocketAddr) -> bool {
    ip_allowed(
        &state.config.mpesa_allowed_ips,
        state.config.callback_ip_guard_enabled(),
        peer,
    )
}

fn ip_allowed(allowed: &[String], guard_enabled: bool, peer: &SocketAddr) -> bool {
    if !guard_enabled {
        return true;
    }
    let peer_ip = peer.ip().to_string();
    allowed.iter().any(|entry| entry == &peer_ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> SocketAddr {
        format!("{ip}:443").parse().unwrap()
    }

    #[test]
    fn allows_listed_ip_and_rejects_others() {
        let allowed = vec!["196.201.214.200".to_string(), "196.201.214.206".to_string()];
        assert!(ip_allowed(&allowed, true, &addr("196.201.214.200")));
        assert!(!ip_allowed(&allowed, true, &addr("10.0.0.1")));
    }

    #[test]
    fn guard_disabled_allows_everyone() {
        let allowed = vec!["196.201.214.200".to_string()];
        assert!(ip_allowed(&allowed, false, &addr("10.0.0.1")));
    }

    #[test]
    fn empty_allowlist_rejects_all_when_guarded() {
        assert!(!ip_allowed(&[], true, &addr("196.201.214.200")));
    }
}
