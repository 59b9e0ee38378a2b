// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session statistics counters.
//!
//! Mirrors the original implementation's per-session counters
//! (`numSend`, `numRxTx`, `numCrcErr`, ...) so a host can build the same
//! statistics-reporting surface the spec calls out as an external collaborator
//! (`spec.md` §1 Non-goals lists the wire-level reporting ComIDs, not the
//! counters themselves — those are carried here, see `SPEC_FULL.md`).
//!
//! Plain `u64` fields rather than atomics: counters are only ever touched
//! from inside `Session::process`, which already holds the relevant queue
//! mutex.

/// Read-only snapshot of a session's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// PD/MD frames successfully transmitted.
    pub num_send: u64,
    /// PD/MD frames successfully received and dispatched.
    pub num_rx_tx: u64,
    /// Frames dropped for header or data CRC mismatch.
    pub num_crc_err: u64,
    /// Frames dropped for unsupported protocol version.
    pub num_prot_err: u64,
    /// Frames dropped because no subscription/listener matched.
    pub num_no_subs: u64,
    /// Frames dropped for ETB/operational-train topology mismatch.
    pub num_topo_err: u64,
    /// Cumulative gap in sequence counters across all subscriptions
    /// (incremented by the size of the gap on each detected loss).
    pub num_missed: u64,
}

/// Mutable counter block owned by the session; [`SessionStats`] is the
/// read-only view handed to callers.
#[derive(Debug, Default)]
pub(crate) struct StatsInner {
    pub num_send: u64,
    pub num_rx_tx: u64,
    pub num_crc_err: u64,
    pub num_prot_err: u64,
    pub num_no_subs: u64,
    pub num_topo_err: u64,
    pub num_missed: u64,
}

impl StatsInner {
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            num_send: self.num_send,
            num_rx_tx: self.num_rx_tx,
            num_crc_err: self.num_crc_err,
            num_prot_err: self.num_prot_err,
            num_no_subs: self.num_no_subs,
            num_topo_err: self.num_topo_err,
            num_missed: self.num_missed,
        }
    }
}
