// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Addressing tuple: the identity shared by publications, subscriptions,
//! requests, and listeners (`spec.md` §3).

use std::net::Ipv4Addr;

/// Identifies a publication, subscription, request, or listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressingTuple {
    /// Communication identifier.
    pub com_id: u32,
    /// Source address (sender's own address for publications; accepted
    /// source for subscriptions, `0.0.0.0` meaning "any").
    pub source: Ipv4Addr,
    /// Optional secondary source address (some replicated senders use two).
    pub source2: Option<Ipv4Addr>,
    /// Destination address: unicast peer, broadcast, or multicast group.
    pub destination: Ipv4Addr,
    /// Multicast group, if `destination` is a multicast address.
    pub multicast_group: Option<Ipv4Addr>,
    /// ETB topology counter (0 = wildcard).
    pub etb_topo_cnt: u32,
    /// Operational-train topology counter (0 = wildcard).
    pub op_trn_topo_cnt: u32,
    /// Service identifier (protocol version `0x0101` and later).
    pub service_id: u32,
}

impl AddressingTuple {
    /// A wildcard tuple for the given comId, accepting any source/destination.
    #[must_use]
    pub fn any(com_id: u32) -> Self {
        Self {
            com_id,
            source: Ipv4Addr::UNSPECIFIED,
            source2: None,
            destination: Ipv4Addr::UNSPECIFIED,
            multicast_group: None,
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
            service_id: 0,
        }
    }

    /// Whether `self` (a listener/subscription filter) matches an inbound
    /// frame's tuple `incoming`.
    ///
    /// Per `spec.md` §3: comId matches, destination matches (or the filter is
    /// wildcard), source is within the listener's accepted range, and both
    /// topology counters are either zero (wildcard) on either side or equal.
    #[must_use]
    pub fn matches(&self, incoming: &AddressingTuple) -> bool {
        self.matches_address(incoming) && self.matches_topology(incoming)
    }

    /// comId/destination/source half of [`Self::matches`], without the
    /// topology check. Split out so the inbound PD/MD dispatch pipeline can
    /// tell "no subscription/listener for this address" (`NO_SUBS`) apart
    /// from "a subscription matched but topology disagreed" (`TOPO_ERR`,
    /// `spec.md` §4.3) instead of collapsing both into one outcome.
    #[must_use]
    pub fn matches_address(&self, incoming: &AddressingTuple) -> bool {
        if self.com_id != incoming.com_id {
            return false;
        }

        let dest_ok = self.destination == Ipv4Addr::UNSPECIFIED
            || self.destination == incoming.destination
            || (self.multicast_group.is_some() && self.multicast_group == incoming.multicast_group);
        if !dest_ok {
            return false;
        }

        self.source == Ipv4Addr::UNSPECIFIED
            || self.source == incoming.source
            || self.source2 == Some(incoming.source)
    }

    /// Topology half of [`Self::matches`]: both counters wildcard-or-equal.
    #[must_use]
    pub fn matches_topology(&self, incoming: &AddressingTuple) -> bool {
        topo_matches(self.etb_topo_cnt, incoming.etb_topo_cnt)
            && topo_matches(self.op_trn_topo_cnt, incoming.op_trn_topo_cnt)
    }
}

fn topo_matches(filter: u32, incoming: u32) -> bool {
    filter == 0 || incoming == 0 || filter == incoming
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(com_id: u32, etb: u32, op: u32) -> AddressingTuple {
        AddressingTuple {
            com_id,
            source: Ipv4Addr::new(10, 0, 0, 1),
            source2: None,
            destination: Ipv4Addr::new(10, 0, 0, 2),
            multicast_group: None,
            etb_topo_cnt: etb,
            op_trn_topo_cnt: op,
            service_id: 0,
        }
    }

    #[test]
    fn mismatched_com_id_never_matches() {
        let filter = tuple(1, 0, 0);
        let incoming = tuple(2, 0, 0);
        assert!(!filter.matches(&incoming));
    }

    #[test]
    fn wildcard_topology_matches_anything() {
        let filter = tuple(1, 0, 0);
        let incoming = tuple(1, 7, 9);
        assert!(filter.matches(&incoming));
    }

    #[test]
    fn nonzero_topology_must_be_equal() {
        let filter = tuple(1, 5, 0);
        let incoming = tuple(1, 6, 0);
        assert!(!filter.matches(&incoming));

        let incoming_ok = tuple(1, 5, 0);
        assert!(filter.matches(&incoming_ok));
    }

    #[test]
    fn wildcard_destination_accepts_any() {
        let mut filter = tuple(1, 0, 0);
        filter.destination = Ipv4Addr::UNSPECIFIED;
        let incoming = tuple(1, 0, 0);
        assert!(filter.matches(&incoming));
    }
}
