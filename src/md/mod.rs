// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Message Data engine: transactional request/reply/confirm over UDP or TCP
//! (`spec.md` §4.4, §4.5).
//!
//! [`MdTable`] indexes every live [`MdSession`] by its handle and by its wire
//! `sessionId` so an inbound reply/replyQuery/confirm can be routed back to
//! the transaction it belongs to; [`dispatch_inbound`] is the MD counterpart
//! of [`crate::pd::dispatch_inbound`].

pub mod caller;
pub mod header;
pub mod replier;
pub mod session;
pub mod uuid;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::arena::Arena;
use crate::config::MsgType;
use crate::stats::StatsInner;
use caller::CallerEvent;
use header::MdHeader;
use replier::{Listener, ReplierEvent};
pub use session::{MdHandle, MdSession, MdState};

/// Notification delivered to the host for an inbound MD event (`spec.md` §9
/// REDESIGN FLAGS: one enum through one sink).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdEvent {
    Caller { handle: MdHandle, event: CallerEvent },
    Replier { handle: MdHandle, event: ReplierEvent },
    FrameDropped { reason: DropReason },
}

/// Why an inbound MD frame never reached a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Datagram shorter than a header, or header/data CRC mismatch.
    Crc,
    /// `protocolVersion` not supported by this session.
    ProtocolVersion,
    /// A notify/request matched no standing listener.
    NoListener,
    /// A reply/replyQuery/confirm's `sessionId` matched no live session.
    NoSession,
}

/// Sink for [`MdEvent`]s, invoked synchronously from [`dispatch_inbound`].
pub trait MdSink {
    fn on_md_event(&mut self, event: MdEvent);
}

impl<F: FnMut(MdEvent)> MdSink for F {
    fn on_md_event(&mut self, event: MdEvent) {
        self(event)
    }
}

/// Live MD sessions, indexed by handle and by wire session id.
#[derive(Default)]
pub struct MdTable {
    sessions: HashMap<u32, MdSession>,
    by_session_id: HashMap<u128, u32>,
    next_handle: u32,
}

impl MdTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next handle without inserting a session yet — callers
    /// building a frame need the handle before the session exists.
    pub fn alloc_handle(&mut self) -> MdHandle {
        let handle = MdHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        handle
    }

    pub fn insert(&mut self, session: MdSession) {
        self.by_session_id.insert(session.session_id, session.handle.0);
        self.sessions.insert(session.handle.0, session);
    }

    pub fn get_mut(&mut self, handle: MdHandle) -> Option<&mut MdSession> {
        self.sessions.get_mut(&handle.0)
    }

    pub fn find_by_session_id(&mut self, session_id: u128) -> Option<&mut MdSession> {
        let key = *self.by_session_id.get(&session_id)?;
        self.sessions.get_mut(&key)
    }

    pub fn remove(&mut self, handle: MdHandle) -> Option<MdSession> {
        let session = self.sessions.remove(&handle.0)?;
        self.by_session_id.remove(&session.session_id);
        Some(session)
    }

    /// Handles of every session whose state has nothing further to do;
    /// the host (or `Session::process`) drains these and frees their frames.
    #[must_use]
    pub fn terminal_handles(&self) -> Vec<MdHandle> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.state.is_terminal())
            .map(|(k, _)| MdHandle(*k))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate every live session, e.g. to find the earliest deadline.
    pub fn sessions_iter(&self) -> impl Iterator<Item = &MdSession> {
        self.sessions.values()
    }
}

/// Validate an inbound MD datagram and either start a new session (notify,
/// request) or route it to an existing one (reply, replyQuery, confirm).
///
/// Listener topology matching is not split from addressing the way
/// [`crate::pd::dispatch_inbound`] splits it for PD: the wire spec gives MD
/// topology counters the same wildcard-or-equal semantics, but MD has no
/// separate `numTopoErr`-style counter in `spec.md` §9's statistics
/// supplement, so a topology mismatch here is folded into `NoListener`.
#[allow(clippy::too_many_arguments)]
pub fn dispatch_inbound(
    listeners: &[Listener],
    table: &mut MdTable,
    raw: &[u8],
    now: Instant,
    default_reply_timeout: Duration,
    default_confirm_timeout: Duration,
    socket_slot: usize,
    use_tcp: bool,
    arena: &mut Arena,
    stats: &mut StatsInner,
    sink: &mut impl MdSink,
) {
    let header = match MdHeader::decode(raw) {
        Ok(h) => h,
        Err(_) => {
            stats.num_crc_err += 1;
            sink.on_md_event(MdEvent::FrameDropped { reason: DropReason::Crc });
            return;
        }
    };

    if header.protocol_version != crate::config::PROTOCOL_VERSION_1_0
        && header.protocol_version != crate::config::PROTOCOL_VERSION_1_1
    {
        stats.num_prot_err += 1;
        sink.on_md_event(MdEvent::FrameDropped { reason: DropReason::ProtocolVersion });
        return;
    }

    let payload_start = header::MD_HEADER_LEN;
    if header::verify_data_crc(raw, payload_start, header.dataset_length as usize).is_err() {
        stats.num_crc_err += 1;
        sink.on_md_event(MdEvent::FrameDropped { reason: DropReason::Crc });
        return;
    }

    let incoming = crate::addressing::AddressingTuple {
        com_id: header.com_id,
        source: std::net::Ipv4Addr::UNSPECIFIED,
        source2: None,
        destination: std::net::Ipv4Addr::UNSPECIFIED,
        multicast_group: None,
        etb_topo_cnt: header.etb_topo_cnt,
        op_trn_topo_cnt: header.op_trn_topo_cnt,
        service_id: 0,
    };

    if header.msg_type == MsgType::MdNotify as u16 || header.msg_type == MsgType::MdRequest as u16 {
        let Some(listener) = listeners.iter().find(|l| l.matches(&incoming)) else {
            stats.num_no_subs += 1;
            sink.on_md_event(MdEvent::FrameDropped { reason: DropReason::NoListener });
            return;
        };

        let handle = table.alloc_handle();
        let built = if header.msg_type == MsgType::MdNotify as u16 {
            replier::session_from_notify(handle, listener.addressing, socket_slot, use_tcp, header.session_id, arena)
                .map(|s| (s, ReplierEvent::Notified))
        } else {
            let timeout = if header.reply_timeout == 0 {
                default_reply_timeout
            } else {
                Duration::from_millis(u64::from(header.reply_timeout))
            };
            replier::session_from_request(handle, listener.addressing, socket_slot, use_tcp, header.session_id, timeout, now, arena)
                .map(|s| (s, ReplierEvent::Requested))
        };

        match built {
            Ok((session, event)) => {
                table.insert(session);
                stats.num_rx_tx += 1;
                sink.on_md_event(MdEvent::Replier { handle, event });
            }
            Err(_) => {
                stats.num_crc_err += 1;
                sink.on_md_event(MdEvent::FrameDropped { reason: DropReason::Crc });
            }
        }
        return;
    }

    if header.msg_type == MsgType::MdConfirm as u16 {
        let Some(session) = table.find_by_session_id(header.session_id) else {
            stats.num_no_subs += 1;
            sink.on_md_event(MdEvent::FrameDropped { reason: DropReason::NoSession });
            return;
        };
        let handle = session.handle;
        let event = replier::on_confirm(session);
        stats.num_rx_tx += 1;
        sink.on_md_event(MdEvent::Replier { handle, event });
        return;
    }

    // MdReply / MdReplyQuery / MdError: route to the caller-side session.
    let Some(session) = table.find_by_session_id(header.session_id) else {
        stats.num_no_subs += 1;
        sink.on_md_event(MdEvent::FrameDropped { reason: DropReason::NoSession });
        return;
    };
    let handle = session.handle;
    let event = caller::on_reply(session, now, &header, default_confirm_timeout);
    stats.num_rx_tx += 1;
    sink.on_md_event(MdEvent::Caller { handle, event });
}

/// Scan every session for an elapsed, unprocessed deadline: caller-side
/// retry/give-up on a request, caller-side confirm-send timeout, and
/// replier-side confirm-wait timeout. Called once per `Session::process` tick.
pub fn poll_timeouts(table: &mut MdTable, now: Instant, sink: &mut impl MdSink) -> Vec<(MdHandle, bool)> {
    let mut resends = Vec::new();
    for (&key, session) in &mut table.sessions {
        let handle = MdHandle(key);
        match session.state {
            MdState::TxRequestW4Reply => {
                if let Some(outcome) = caller::check_retry(session, now) {
                    let retry = outcome == caller::RetryOutcome::Retry;
                    if retry {
                        resends.push((handle, true));
                    } else {
                        sink.on_md_event(MdEvent::Caller { handle, event: CallerEvent::ReplyTimedOut });
                    }
                }
            }
            MdState::TxRequestW4ApplConfirm => {
                if caller::check_confirm_send_timeout(session, now) {
                    sink.on_md_event(MdEvent::Caller { handle, event: CallerEvent::ConfirmSendTimedOut });
                }
            }
            MdState::RxReplyQueryW4Confirm => {
                if replier::check_confirm_timeout(session, now) {
                    sink.on_md_event(MdEvent::Replier { handle, event: ReplierEvent::ConfirmTimedOut });
                }
            }
            _ => {}
        }
    }
    resends
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::AddressingTuple;
    use crate::md::header::encode_uri;

    fn build_request_frame(com_id: u32, session_id: u128) -> Vec<u8> {
        let header = MdHeader {
            sequence_counter: 0,
            protocol_version: crate::config::PROTOCOL_VERSION_1_0,
            msg_type: MsgType::MdRequest as u16,
            com_id,
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
            dataset_length: 0,
            reply_status: 0,
            session_id,
            reply_timeout: 1000,
            source_uri: encode_uri("caller"),
            destination_uri: encode_uri("replier"),
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        let payload_start = buf.len();
        header::append_data_crc(&mut buf, payload_start);
        buf
    }

    #[test]
    fn request_creates_replier_session() {
        let listeners = vec![Listener::new(AddressingTuple::any(3001), 0)];
        let mut table = MdTable::new();
        let mut arena = Arena::new();
        let mut stats = StatsInner::default();
        let mut events = Vec::new();
        let frame = build_request_frame(3001, 42);
        dispatch_inbound(
            &listeners,
            &mut table,
            &frame,
            Instant::now(),
            Duration::from_secs(5),
            Duration::from_secs(2),
            0,
            false,
            &mut arena,
            &mut stats,
            &mut |e: MdEvent| events.push(e),
        );
        assert_eq!(table.len(), 1);
        assert!(matches!(events[0], MdEvent::Replier { event: ReplierEvent::Requested, .. }));
    }

    #[test]
    fn request_with_no_listener_counts_drop() {
        let listeners: Vec<Listener> = Vec::new();
        let mut table = MdTable::new();
        let mut arena = Arena::new();
        let mut stats = StatsInner::default();
        let frame = build_request_frame(3001, 42);
        dispatch_inbound(
            &listeners,
            &mut table,
            &frame,
            Instant::now(),
            Duration::from_secs(5),
            Duration::from_secs(2),
            0,
            false,
            &mut arena,
            &mut stats,
            &mut |_: MdEvent| {},
        );
        assert_eq!(table.len(), 0);
        assert_eq!(stats.num_no_subs, 1);
    }

    #[test]
    fn terminal_handles_reports_notify_sessions() {
        let listeners = vec![Listener::new(AddressingTuple::any(3001), 0)];
        let mut table = MdTable::new();
        let mut arena = Arena::new();
        let mut stats = StatsInner::default();
        let header = MdHeader {
            sequence_counter: 0,
            protocol_version: crate::config::PROTOCOL_VERSION_1_0,
            msg_type: MsgType::MdNotify as u16,
            com_id: 3001,
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
            dataset_length: 0,
            reply_status: 0,
            session_id: 7,
            reply_timeout: 0,
            source_uri: encode_uri("a"),
            destination_uri: encode_uri("b"),
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        let payload_start = buf.len();
        header::append_data_crc(&mut buf, payload_start);
        dispatch_inbound(
            &listeners,
            &mut table,
            &buf,
            Instant::now(),
            Duration::from_secs(5),
            Duration::from_secs(2),
            0,
            false,
            &mut arena,
            &mut stats,
            &mut |_: MdEvent| {},
        );
        assert_eq!(table.terminal_handles().len(), 1);
    }
}
