// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Caller side of the MD engine: `notify`, `request`, and the confirm a
//! caller sends back after a `replyQuery` (`spec.md` §4.4).

use std::time::{Duration, Instant};

use crate::addressing::AddressingTuple;
use crate::arena::{Arena, ArenaBuf};
use crate::config::MsgType;
use crate::error::Result;
use crate::md::header::{self, encode_uri, MdHeader, URI_LEN};
use crate::md::session::{MdHandle, MdSession, MdState};

/// Notification the caller side hands back to the host as an MD session
/// progresses (`spec.md` §9 REDESIGN FLAGS: one enum through one sink).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerEvent {
    /// A reply (or error reply) arrived; `more_expected` is false once every
    /// known replier has answered (or, for an unconfirmed fan-out, never —
    /// the session only ends on timeout).
    Reply { reply_status: i32, more_expected: bool },
    /// A `replyQuery` arrived: the application must call a confirm-building
    /// helper before the confirm-send deadline or the session times out.
    ReplyWithConfirmRequested { reply_status: i32 },
    /// No (or not enough) replies arrived before the reply-timeout deadline.
    ReplyTimedOut,
    /// The application did not confirm a `replyQuery` in time.
    ConfirmSendTimedOut,
}

/// What a caller-side request session should do when its deadline elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Resend the same frame (sequence counter and session id unchanged)
    /// and rearm for another `retry_interval`.
    Retry,
    /// Retries exhausted (or none configured): report [`CallerEvent::ReplyTimedOut`].
    GiveUp,
}

#[allow(clippy::too_many_arguments)]
fn build_frame(
    arena: &mut Arena,
    msg_type: MsgType,
    addressing: &AddressingTuple,
    session_id: u128,
    reply_status: i32,
    reply_timeout: Duration,
    source_uri: &str,
    destination_uri: &str,
    data: &[u8],
) -> Result<(ArenaBuf, usize)> {
    let header = MdHeader {
        sequence_counter: 0,
        protocol_version: crate::config::PROTOCOL_VERSION_1_0,
        msg_type: msg_type as u16,
        com_id: addressing.com_id,
        etb_topo_cnt: addressing.etb_topo_cnt,
        op_trn_topo_cnt: addressing.op_trn_topo_cnt,
        dataset_length: data.len() as u32,
        reply_status,
        session_id,
        reply_timeout: reply_timeout.as_millis() as u32,
        source_uri: encode_uri(source_uri),
        destination_uri: encode_uri(destination_uri),
    };

    let mut bytes = Vec::with_capacity(header::MD_HEADER_LEN + data.len() + 8);
    header.encode(&mut bytes);
    let payload_start = bytes.len();
    bytes.extend_from_slice(data);
    header::append_data_crc(&mut bytes, payload_start);

    let mut frame = arena.alloc(bytes.len())?;
    frame.as_mut_slice().copy_from_slice(&bytes);
    Ok((frame, payload_start))
}

/// Build a fire-and-forget notify session (`TxNotifyArm`): no reply is ever
/// expected, the entry is terminal the moment it is sent.
#[allow(clippy::too_many_arguments)]
pub fn build_notify(
    handle: MdHandle,
    addressing: AddressingTuple,
    socket_slot: usize,
    use_tcp: bool,
    session_id: u128,
    source_uri: &str,
    destination_uri: &str,
    data: &[u8],
    arena: &mut Arena,
) -> Result<MdSession> {
    let (frame, payload_start) = build_frame(
        arena,
        MsgType::MdNotify,
        &addressing,
        session_id,
        0,
        Duration::ZERO,
        source_uri,
        destination_uri,
        data,
    )?;
    let dataset_len = data.len();
    Ok(MdSession::new(
        handle,
        session_id,
        addressing,
        MdState::TxNotifyArm,
        socket_slot,
        use_tcp,
        frame,
        payload_start,
        dataset_len,
    ))
}

/// Build a request session (`TxRequestArm`). `num_replies_expected` is the
/// size of a known-repliers list, or `0` for an unconfirmed fan-out that
/// collects replies until `reply_timeout` regardless of count.
#[allow(clippy::too_many_arguments)]
pub fn build_request(
    handle: MdHandle,
    addressing: AddressingTuple,
    socket_slot: usize,
    use_tcp: bool,
    session_id: u128,
    reply_timeout: Duration,
    num_replies_expected: u32,
    num_retries_max: u32,
    retry_interval: Duration,
    source_uri: &str,
    destination_uri: &str,
    data: &[u8],
    arena: &mut Arena,
) -> Result<MdSession> {
    let (frame, payload_start) = build_frame(
        arena,
        MsgType::MdRequest,
        &addressing,
        session_id,
        0,
        reply_timeout,
        source_uri,
        destination_uri,
        data,
    )?;
    let dataset_len = data.len();
    let mut session = MdSession::new(
        handle,
        session_id,
        addressing,
        MdState::TxRequestArm,
        socket_slot,
        use_tcp,
        frame,
        payload_start,
        dataset_len,
    );
    session.num_replies_expected = num_replies_expected;
    session.num_retries_left = num_retries_max;
    session.retry_interval = retry_interval;
    Ok(session)
}

/// Build the confirm a caller sends after a `replyQuery` (`TxConfirmArm`).
#[allow(clippy::too_many_arguments)]
pub fn build_confirm(
    handle: MdHandle,
    addressing: AddressingTuple,
    socket_slot: usize,
    use_tcp: bool,
    session_id: u128,
    reply_status: i32,
    source_uri: &str,
    destination_uri: &str,
    arena: &mut Arena,
) -> Result<MdSession> {
    let (frame, payload_start) = build_frame(
        arena,
        MsgType::MdConfirm,
        &addressing,
        session_id,
        reply_status,
        Duration::ZERO,
        source_uri,
        destination_uri,
        &[],
    )?;
    Ok(MdSession::new(
        handle,
        session_id,
        addressing,
        MdState::TxConfirmArm,
        socket_slot,
        use_tcp,
        frame,
        payload_start,
        0,
    ))
}

/// Transition an armed session to its post-send state once the socket layer
/// has transmitted its frame, arming the appropriate deadline.
pub fn on_sent(session: &mut MdSession, now: Instant, reply_timeout: Duration, confirm_send_timeout: Duration) {
    session.state = match session.state {
        MdState::TxNotifyArm => MdState::Idle,
        MdState::TxRequestArm => {
            session.arm(now, reply_timeout);
            MdState::TxRequestW4Reply
        }
        MdState::TxConfirmArm => MdState::Idle,
        other => other,
    };
    let _ = confirm_send_timeout;
}

/// Absorb an inbound reply/replyQuery/error frame whose `sessionId` matched
/// this session.
#[must_use]
pub fn on_reply(session: &mut MdSession, now: Instant, header: &MdHeader, confirm_send_timeout: Duration) -> CallerEvent {
    session.num_replies_received += 1;

    if header.msg_type == MsgType::MdReplyQuery as u16 {
        session.state = MdState::TxRequestW4ApplConfirm;
        session.arm(now, confirm_send_timeout);
        return CallerEvent::ReplyWithConfirmRequested { reply_status: header.reply_status };
    }

    let more_expected = session.num_replies_expected == 0
        || session.num_replies_received < session.num_replies_expected;
    if !more_expected {
        session.state = MdState::TxReplyReceived;
    }
    CallerEvent::Reply { reply_status: header.reply_status, more_expected }
}

/// Check a `TxRequestW4Reply` session's deadline: retry if budget remains,
/// otherwise give up.
#[must_use]
pub fn check_retry(session: &mut MdSession, now: Instant) -> Option<RetryOutcome> {
    if session.state != MdState::TxRequestW4Reply || !session.has_elapsed(now) {
        return None;
    }
    if session.num_retries_left > 0 {
        session.num_retries_left -= 1;
        let interval = session.retry_interval;
        session.arm(now, interval);
        Some(RetryOutcome::Retry)
    } else {
        session.state = MdState::TxReplyReceived;
        Some(RetryOutcome::GiveUp)
    }
}

/// Check a `TxRequestW4ApplConfirm` session's confirm-send deadline.
#[must_use]
pub fn check_confirm_send_timeout(session: &mut MdSession, now: Instant) -> bool {
    if session.state != MdState::TxRequestW4ApplConfirm || !session.has_elapsed(now) {
        return false;
    }
    session.state = MdState::Idle;
    true
}
