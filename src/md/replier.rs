// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Replier side of the MD engine: listener matching, `reply`, `replyQuery`,
//! and confirm-timeout supervision (`spec.md` §4.5).

use std::time::{Duration, Instant};

use crate::addressing::AddressingTuple;
use crate::arena::{Arena, ArenaBuf};
use crate::config::MsgType;
use crate::error::Result;
use crate::md::header::{self, encode_uri, MdHeader};
use crate::md::session::{MdHandle, MdSession, MdState};

/// A standing listener: matches inbound notify/request frames by addressing
/// tuple and hands the host a fresh [`MdSession`] for each match.
pub struct Listener {
    pub addressing: AddressingTuple,
    pub(crate) socket_slot: usize,
}

impl Listener {
    #[must_use]
    pub fn new(addressing: AddressingTuple, socket_slot: usize) -> Self {
        Self { addressing, socket_slot }
    }

    /// Whether this listener accepts a frame with header `header` from `incoming`.
    #[must_use]
    pub fn matches(&self, incoming: &AddressingTuple) -> bool {
        self.addressing.matches(incoming)
    }
}

/// Notification handed to the host for an inbound MD event on the replier
/// side (`spec.md` §9 REDESIGN FLAGS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplierEvent {
    /// A notify arrived: terminal, no reply possible.
    Notified,
    /// A request arrived: the application must build a reply (or
    /// replyQuery) before the deadline implied by the request's own
    /// `replyTimeout` field.
    Requested,
    /// The caller's confirm arrived for an outstanding `replyQuery`.
    Confirmed,
    /// No confirm arrived before the confirm-timeout deadline.
    ConfirmTimedOut,
}

#[allow(clippy::too_many_arguments)]
fn build_frame(
    arena: &mut Arena,
    msg_type: MsgType,
    addressing: &AddressingTuple,
    session_id: u128,
    reply_status: i32,
    source_uri: &str,
    destination_uri: &str,
    data: &[u8],
) -> Result<(ArenaBuf, usize)> {
    let frame_header = MdHeader {
        sequence_counter: 0,
        protocol_version: crate::config::PROTOCOL_VERSION_1_0,
        msg_type: msg_type as u16,
        com_id: addressing.com_id,
        etb_topo_cnt: addressing.etb_topo_cnt,
        op_trn_topo_cnt: addressing.op_trn_topo_cnt,
        dataset_length: data.len() as u32,
        reply_status,
        session_id,
        reply_timeout: 0,
        source_uri: encode_uri(source_uri),
        destination_uri: encode_uri(destination_uri),
    };

    let mut bytes = Vec::with_capacity(header::MD_HEADER_LEN + data.len() + 8);
    frame_header.encode(&mut bytes);
    let payload_start = bytes.len();
    bytes.extend_from_slice(data);
    header::append_data_crc(&mut bytes, payload_start);

    let mut frame = arena.alloc(bytes.len())?;
    frame.as_mut_slice().copy_from_slice(&bytes);
    Ok((frame, payload_start))
}

/// Build the session created by an inbound notify: terminal immediately,
/// there is nothing further to send.
pub fn session_from_notify(
    handle: MdHandle,
    addressing: AddressingTuple,
    socket_slot: usize,
    use_tcp: bool,
    session_id: u128,
    arena: &mut Arena,
) -> Result<MdSession> {
    let (frame, payload_start) = build_frame(arena, MsgType::MdNotify, &addressing, session_id, 0, "", "", &[])?;
    Ok(MdSession::new(
        handle,
        session_id,
        addressing,
        MdState::RxNotifyReceived,
        socket_slot,
        use_tcp,
        frame,
        payload_start,
        0,
    ))
}

/// Build the session created by an inbound request: the application now
/// owes a reply (or replyQuery) within `reply_timeout`.
pub fn session_from_request(
    handle: MdHandle,
    addressing: AddressingTuple,
    socket_slot: usize,
    use_tcp: bool,
    session_id: u128,
    reply_timeout: Duration,
    now: Instant,
    arena: &mut Arena,
) -> Result<MdSession> {
    let (frame, payload_start) = build_frame(arena, MsgType::MdRequest, &addressing, session_id, 0, "", "", &[])?;
    let mut session = MdSession::new(
        handle,
        session_id,
        addressing,
        MdState::RxRequestW4ApplReply,
        socket_slot,
        use_tcp,
        frame,
        payload_start,
        0,
    );
    session.arm(now, reply_timeout);
    Ok(session)
}

/// Build a final reply (no confirm requested): `TxReplyArm`.
#[allow(clippy::too_many_arguments)]
pub fn build_reply(
    handle: MdHandle,
    addressing: AddressingTuple,
    socket_slot: usize,
    use_tcp: bool,
    session_id: u128,
    reply_status: i32,
    source_uri: &str,
    destination_uri: &str,
    data: &[u8],
    arena: &mut Arena,
) -> Result<MdSession> {
    let (frame, payload_start) =
        build_frame(arena, MsgType::MdReply, &addressing, session_id, reply_status, source_uri, destination_uri, data)?;
    let dataset_len = data.len();
    Ok(MdSession::new(
        handle,
        session_id,
        addressing,
        MdState::TxReplyArm,
        socket_slot,
        use_tcp,
        frame,
        payload_start,
        dataset_len,
    ))
}

/// Build a reply that requests a confirm: `TxReplyQueryArm`.
#[allow(clippy::too_many_arguments)]
pub fn build_reply_query(
    handle: MdHandle,
    addressing: AddressingTuple,
    socket_slot: usize,
    use_tcp: bool,
    session_id: u128,
    reply_status: i32,
    source_uri: &str,
    destination_uri: &str,
    data: &[u8],
    arena: &mut Arena,
) -> Result<MdSession> {
    let (frame, payload_start) = build_frame(
        arena,
        MsgType::MdReplyQuery,
        &addressing,
        session_id,
        reply_status,
        source_uri,
        destination_uri,
        data,
    )?;
    let dataset_len = data.len();
    Ok(MdSession::new(
        handle,
        session_id,
        addressing,
        MdState::TxReplyQueryArm,
        socket_slot,
        use_tcp,
        frame,
        payload_start,
        dataset_len,
    ))
}

/// Transition an armed reply to its post-send state, arming the
/// confirm-wait deadline for `replyQuery`.
pub fn on_sent(session: &mut MdSession, now: Instant, confirm_timeout: Duration) {
    session.state = match session.state {
        MdState::TxReplyArm => MdState::RxReplySent,
        MdState::TxReplyQueryArm => {
            session.arm(now, confirm_timeout);
            MdState::RxReplyQueryW4Confirm
        }
        other => other,
    };
}

/// Absorb an inbound confirm for a `RxReplyQueryW4Confirm` session.
pub fn on_confirm(session: &mut MdSession) -> ReplierEvent {
    session.state = MdState::RxConfirmReceived;
    ReplierEvent::Confirmed
}

/// Check a `RxReplyQueryW4Confirm` session's confirm-wait deadline.
#[must_use]
pub fn check_confirm_timeout(session: &mut MdSession, now: Instant) -> bool {
    if session.state != MdState::RxReplyQueryW4Confirm || !session.has_elapsed(now) {
        return false;
    }
    session.state = MdState::RxReplySent;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addressing() -> AddressingTuple {
        AddressingTuple::any(2002)
    }

    #[test]
    fn reply_without_confirm_is_terminal_after_send() {
        let mut arena = Arena::new();
        let mut s = build_reply(MdHandle(0), addressing(), 0, false, 1, 0, "r", "c", &[], &mut arena).unwrap();
        on_sent(&mut s, Instant::now(), Duration::from_secs(1));
        assert_eq!(s.state, MdState::RxReplySent);
    }

    #[test]
    fn reply_query_waits_for_confirm_then_receives_it() {
        let mut arena = Arena::new();
        let mut s = build_reply_query(MdHandle(0), addressing(), 0, false, 1, 0, "r", "c", &[], &mut arena).unwrap();
        let now = Instant::now();
        on_sent(&mut s, now, Duration::from_millis(50));
        assert_eq!(s.state, MdState::RxReplyQueryW4Confirm);
        assert_eq!(on_confirm(&mut s), ReplierEvent::Confirmed);
        assert_eq!(s.state, MdState::RxConfirmReceived);
    }

    #[test]
    fn confirm_timeout_falls_back_to_reply_sent() {
        let mut arena = Arena::new();
        let mut s = build_reply_query(MdHandle(0), addressing(), 0, false, 1, 0, "r", "c", &[], &mut arena).unwrap();
        let now = Instant::now();
        on_sent(&mut s, now, Duration::from_millis(10));
        let elapsed = now + Duration::from_millis(11);
        assert!(check_confirm_timeout(&mut s, elapsed));
        assert_eq!(s.state, MdState::RxReplySent);
    }

    #[test]
    fn listener_matches_on_addressing() {
        let listener = Listener::new(AddressingTuple::any(2002), 0);
        let incoming = AddressingTuple::any(2002);
        assert!(listener.matches(&incoming));
        let other = AddressingTuple::any(9999);
        assert!(!listener.matches(&other));
    }
}
