// SPDX-License-Identifier: Apache-2.0 OR MIT

//! MD session identifiers.
//!
//! A session UUID only has to be unique among the sessions concurrently live
//! on one participant's network segment — it is never parsed as an RFC 4122
//! UUID by a peer, just compared for equality. `generate` therefore builds
//! one from three cheap, already-available sources rather than pulling in a
//! UUID or RNG crate: wall-clock microseconds (upper 64 bits, makes
//! same-process collisions require sub-microsecond timing), a per-process
//! monotonic counter (next 32 bits, the deciding tiebreaker within a
//! microsecond), and the local IPv4 address (low 32 bits, the cross-host
//! discriminator — `spec.md` §3 calls out a "MAC-address-or-random fallback"
//! for this slot; this crate has the host's IP already via
//! `local-ip-address` and no MAC-reading crate in the stack, so the IP
//! stands in, falling back to process id xor'd with wall-clock nanos on
//! networks where it cannot be determined).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a fresh, process-unique session identifier.
#[must_use]
pub fn generate() -> u128 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    let node = node_id();

    (u128::from(micros) << 64) | (u128::from(counter) << 32) | u128::from(node)
}

fn node_id() -> u32 {
    match local_ip_address::local_ip() {
        Ok(std::net::IpAddr::V4(addr)) => u32::from(addr),
        _ => random_fallback(),
    }
}

fn random_fallback() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos ^ std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_ids_are_distinct() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }

    #[test]
    fn counter_component_advances_within_same_microsecond() {
        let ids: Vec<u128> = (0..8).map(|_| generate()).collect();
        let unique: std::collections::HashSet<u128> = ids.into_iter().collect();
        assert_eq!(unique.len(), 8);
    }
}
