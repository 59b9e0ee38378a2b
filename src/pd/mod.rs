// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process Data engine: cyclic publish/subscribe over UDP (`spec.md` §4.2, §4.3).
//!
//! [`Publication`] and [`Subscription`] are independent per-entry state
//! machines; this module owns the tables that index them, the per-comId
//! outbound sequence-counter shared by a redundancy group, and the inbound
//! dispatch pipeline that turns a raw datagram into zero or one [`PdEvent`].

pub mod header;
pub mod publication;
pub mod seqcount;
pub mod subscription;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::addressing::AddressingTuple;
use crate::stats::StatsInner;
use header::{PdHeader, PD_HEADER_LEN};
use seqcount::SeqCheck;

pub use publication::{PubFlags, PubHandle, Publication};
pub use subscription::{SubHandle, Subscription};

/// Notification delivered to the host for an inbound PD event.
///
/// `spec.md` §9 REDESIGN FLAGS calls for replacing the original raw
/// function-pointer-plus-void-context callback with something the type
/// system can check: one enum of variants dispatched through a single sink,
/// rather than one callback per event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdEvent {
    /// Fresh data accepted for `handle`. `gap` is the number of sequence
    /// counters skipped since the last accepted frame from this source (0 if
    /// contiguous or first-ever).
    DataReceived { handle: SubHandle, source: Ipv4Addr, gap: u64 },
    /// `handle`'s receive-timeout deadline elapsed with nothing newer
    /// arriving in time. Delivered exactly once per elapsed deadline.
    Timeout { handle: SubHandle },
    /// An inbound frame matched no subscription, failed topology
    /// validation, or failed a CRC/version check before it could be
    /// attributed to any single subscription.
    FrameDropped { reason: DropReason },
}

/// Why an inbound PD frame never reached a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Datagram shorter than a header, or header/data CRC mismatch.
    Crc,
    /// `protocolVersion` not supported by this session.
    ProtocolVersion,
    /// comId/destination/source matched a subscription but topology did not.
    Topology,
    /// No subscription at all matched comId/destination/source.
    NoSubscription,
}

/// Sink for [`PdEvent`]s, invoked synchronously from [`dispatch_inbound`].
/// A plain closure satisfies this via the blanket impl below.
pub trait PdSink {
    fn on_pd_event(&mut self, event: PdEvent);
}

impl<F: FnMut(PdEvent)> PdSink for F {
    fn on_pd_event(&mut self, event: PdEvent) {
        self(event)
    }
}

/// Per-`(comId, msgType, sourceIP)` outbound sequence counter, shared by every
/// publication of that tuple so a redundancy-group failover keeps the
/// sequence continuous (`spec.md` §4.6) rather than each publication object
/// starting its own count.
#[derive(Default)]
pub struct OutboundSeqTable {
    counters: HashMap<(u32, u16, Ipv4Addr), u32>,
}

impl OutboundSeqTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter value for a tuple, `0` if never seen.
    #[must_use]
    pub fn current(&self, com_id: u32, msg_type: u16, source: Ipv4Addr) -> u32 {
        self.counters.get(&(com_id, msg_type, source)).copied().unwrap_or(0)
    }

    /// Record the value a publication just sent with, so the next
    /// publication created for the same tuple (a redundancy failover) seeds
    /// from here instead of restarting at zero.
    pub fn record(&mut self, com_id: u32, msg_type: u16, source: Ipv4Addr, value: u32) {
        self.counters.insert((com_id, msg_type, source), value);
    }
}

/// Validate an inbound datagram's header and dispatch it to whichever
/// subscription in `subscriptions` matches, updating `stats` for every
/// reason a frame can fail to be delivered.
///
/// Implements `spec.md` §4.3 steps 1-6: length, protocol version, header CRC
/// (via [`PdHeader::decode`]), addressing match, topology match, sequence
/// counter (via [`Subscription::accept`]), data CRC, deliver. Matching stops
/// at the first subscription whose address half matches; a later topology
/// mismatch on that same subscription is reported as `Topology`, not
/// `NoSubscription`, even if a different subscription would have matched
/// address-wise too — comId collisions across topology domains are not a
/// configuration this dispatch needs to disambiguate further.
pub fn dispatch_inbound(
    subscriptions: &mut [Subscription],
    raw: &[u8],
    source: Ipv4Addr,
    destination: Ipv4Addr,
    now: Instant,
    stats: &mut StatsInner,
    sink: &mut impl PdSink,
) {
    let header = match PdHeader::decode(raw) {
        Ok(h) => h,
        Err(_) => {
            stats.num_crc_err += 1;
            sink.on_pd_event(PdEvent::FrameDropped { reason: DropReason::Crc });
            return;
        }
    };

    if header.protocol_version != crate::config::PROTOCOL_VERSION_1_0
        && header.protocol_version != crate::config::PROTOCOL_VERSION_1_1
    {
        stats.num_prot_err += 1;
        sink.on_pd_event(PdEvent::FrameDropped { reason: DropReason::ProtocolVersion });
        return;
    }

    let payload_start = PD_HEADER_LEN;
    let incoming = AddressingTuple {
        com_id: header.com_id,
        source,
        source2: None,
        destination,
        multicast_group: None,
        etb_topo_cnt: header.etb_topo_cnt,
        op_trn_topo_cnt: header.op_trn_topo_cnt,
        service_id: 0,
    };

    let Some(sub) = subscriptions.iter_mut().find(|s| s.addressing.matches_address(&incoming)) else {
        stats.num_no_subs += 1;
        sink.on_pd_event(PdEvent::FrameDropped { reason: DropReason::NoSubscription });
        return;
    };

    if !sub.addressing.matches_topology(&incoming) {
        stats.num_topo_err += 1;
        sink.on_pd_event(PdEvent::FrameDropped { reason: DropReason::Topology });
        return;
    }

    if header::verify_data_crc(raw, payload_start, header.dataset_length as usize).is_err() {
        stats.num_crc_err += 1;
        sink.on_pd_event(PdEvent::FrameDropped { reason: DropReason::Crc });
        return;
    }

    let payload = &raw[payload_start..payload_start + header.dataset_length as usize];
    let handle = sub.handle;
    match sub.accept(now, source, header.msg_type, header.sequence_counter, payload) {
        Ok(SeqCheck::Fresh { gap }) => {
            stats.num_rx_tx += 1;
            stats.num_missed += gap;
            sink.on_pd_event(PdEvent::DataReceived { handle, source, gap });
        }
        Ok(SeqCheck::Duplicate) => {}
        Err(_) => {
            stats.num_crc_err += 1;
            sink.on_pd_event(PdEvent::FrameDropped { reason: DropReason::Crc });
        }
    }
}

/// Scan every subscription for an elapsed, not-yet-reported receive-timeout
/// deadline and notify the sink for each (`spec.md` §4.3). Called once per
/// `Session::process` tick.
pub fn poll_timeouts(subscriptions: &mut [Subscription], now: Instant, sink: &mut impl PdSink) {
    for sub in subscriptions {
        if sub.check_timeout(now) {
            sink.on_pd_event(PdEvent::Timeout { handle: sub.handle });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::config::{MsgType, TimeoutBehaviour};
    use crate::pd::header::PdHeader;
    use std::time::Duration;

    fn build_frame(com_id: u32, seq: u32, data: &[u8]) -> Vec<u8> {
        let header = PdHeader {
            sequence_counter: seq,
            protocol_version: crate::config::PROTOCOL_VERSION_1_0,
            msg_type: MsgType::PdData as u16,
            com_id,
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
            dataset_length: data.len() as u32,
            reserved: 0,
            reply_com_id: 0,
            reply_ip_addr: 0,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        let payload_start = buf.len();
        buf.extend_from_slice(data);
        header::append_data_crc(&mut buf, payload_start);
        buf
    }

    fn subscription(arena: &mut Arena, now: Instant) -> Subscription {
        Subscription::new(
            SubHandle(1),
            AddressingTuple::any(1001),
            Duration::from_millis(0),
            TimeoutBehaviour::ZeroOut,
            4,
            0,
            16,
            arena,
            now,
        )
        .unwrap()
    }

    #[test]
    fn matching_frame_is_delivered() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut subs = vec![subscription(&mut arena, now)];
        let mut stats = StatsInner::default();
        let mut events = Vec::new();
        let frame = build_frame(1001, 1, &[1, 2, 3, 4]);
        dispatch_inbound(
            &mut subs,
            &frame,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::UNSPECIFIED,
            now,
            &mut stats,
            &mut |e: PdEvent| events.push(e),
        );
        assert_eq!(stats.num_rx_tx, 1);
        assert_eq!(subs[0].data(), &[1, 2, 3, 4]);
        assert!(matches!(events[0], PdEvent::DataReceived { gap: 0, .. }));
    }

    #[test]
    fn unmatched_com_id_counts_no_subs() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut subs = vec![subscription(&mut arena, now)];
        let mut stats = StatsInner::default();
        let frame = build_frame(9999, 1, &[1, 2, 3, 4]);
        dispatch_inbound(
            &mut subs,
            &frame,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::UNSPECIFIED,
            now,
            &mut stats,
            &mut |_| {},
        );
        assert_eq!(stats.num_no_subs, 1);
        assert!(!subs[0].has_data());
    }

    #[test]
    fn topology_mismatch_counts_topo_err() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut subs = vec![subscription(&mut arena, now)];
        subs[0].addressing.etb_topo_cnt = 7;
        let mut stats = StatsInner::default();
        let frame = build_frame(1001, 1, &[1, 2, 3, 4]);
        let mut header = PdHeader::decode(&frame).unwrap();
        header.etb_topo_cnt = 8;
        let mut buf = Vec::new();
        header.encode(&mut buf);
        let payload_start = buf.len();
        buf.extend_from_slice(&[1, 2, 3, 4]);
        header::append_data_crc(&mut buf, payload_start);
        dispatch_inbound(
            &mut subs,
            &buf,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::UNSPECIFIED,
            now,
            &mut stats,
            &mut |_| {},
        );
        assert_eq!(stats.num_topo_err, 1);
    }

    #[test]
    fn corrupted_header_counts_crc_err() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut subs = vec![subscription(&mut arena, now)];
        let mut stats = StatsInner::default();
        let mut frame = build_frame(1001, 1, &[1, 2, 3, 4]);
        frame[0] ^= 0xFF;
        dispatch_inbound(
            &mut subs,
            &frame,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::UNSPECIFIED,
            now,
            &mut stats,
            &mut |_| {},
        );
        assert_eq!(stats.num_crc_err, 1);
    }

    #[test]
    fn duplicate_frame_is_silently_dropped() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut subs = vec![subscription(&mut arena, now)];
        let mut stats = StatsInner::default();
        let frame = build_frame(1001, 5, &[1, 2, 3, 4]);
        dispatch_inbound(
            &mut subs,
            &frame,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::UNSPECIFIED,
            now,
            &mut stats,
            &mut |_| {},
        );
        dispatch_inbound(
            &mut subs,
            &frame,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::UNSPECIFIED,
            now,
            &mut stats,
            &mut |_| {},
        );
        assert_eq!(stats.num_rx_tx, 1);
    }

    #[test]
    fn outbound_seq_table_tracks_per_tuple() {
        let mut table = OutboundSeqTable::new();
        let src = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(table.current(1001, MsgType::PdData as u16, src), 0);
        table.record(1001, MsgType::PdData as u16, src, 42);
        assert_eq!(table.current(1001, MsgType::PdData as u16, src), 42);
    }

    #[test]
    fn poll_timeouts_fires_once() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut subs = vec![Subscription::new(
            SubHandle(1),
            AddressingTuple::any(1001),
            Duration::from_millis(10),
            TimeoutBehaviour::ZeroOut,
            4,
            0,
            16,
            &mut arena,
            now,
        )
        .unwrap()];
        let later = now + Duration::from_millis(11);
        let mut fired = 0;
        poll_timeouts(&mut subs, later, &mut |_: PdEvent| fired += 1);
        poll_timeouts(&mut subs, later, &mut |_: PdEvent| fired += 1);
        assert_eq!(fired, 1);
    }
}
