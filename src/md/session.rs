// SPDX-License-Identifier: Apache-2.0 OR MIT

//! MD session state machine (`spec.md` §3, §4.4, §4.5).
//!
//! One [`MdSession`] exists per in-flight transaction, on both the caller and
//! replier side; [`MdState`] tracks which leg of notify/request-reply/
//! reply-with-confirm it is currently in. `caller`/`replier` build and drive
//! these; this module only owns the shared shape and the deadline/frame
//! plumbing both sides need.

use std::time::{Duration, Instant};

use crate::addressing::AddressingTuple;
use crate::arena::ArenaBuf;
use crate::time::Deadline;

/// MD transaction state (`spec.md` §3). Fifteen states split across three
/// roles: pending-send ("arm"), caller awaiting a reply, and replier
/// awaiting a confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdState {
    /// No transaction in progress; entry not yet (re)used.
    Idle,
    /// A notify is queued to send.
    TxNotifyArm,
    /// A request is queued to send.
    TxRequestArm,
    /// A reply (no confirm needed) is queued to send.
    TxReplyArm,
    /// A reply-with-confirm-request is queued to send.
    TxReplyQueryArm,
    /// A confirm is queued to send.
    TxConfirmArm,
    /// A listener is armed and waiting for an inbound request/notify.
    RxReady,
    /// Caller sent a request, awaiting one or more replies.
    TxRequestW4Reply,
    /// Replier sent `replyQuery`, awaiting the caller's confirm.
    RxReplyQueryW4Confirm,
    /// Replier received a request, application is composing its reply.
    RxRequestW4ApplReply,
    /// Caller received a `replyQuery`, application is composing its confirm.
    TxRequestW4ApplConfirm,
    /// Replier's reply was sent; terminal unless a confirm was requested.
    RxReplySent,
    /// Listener received a notify; terminal, no reply expected.
    RxNotifyReceived,
    /// Caller received a (final) reply; terminal.
    TxReplyReceived,
    /// Replier received the caller's confirm; terminal.
    RxConfirmReceived,
}

impl MdState {
    /// Whether this state has nothing further to send or wait for and the
    /// entry can be reclaimed once the host has drained its result.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MdState::Idle | MdState::RxReplySent | MdState::RxNotifyReceived | MdState::TxReplyReceived | MdState::RxConfirmReceived
        )
    }
}

/// Opaque handle naming an `MdSession` in a session's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MdHandle(pub u32);

/// One in-flight MD transaction.
pub struct MdSession {
    pub handle: MdHandle,
    pub session_id: u128,
    pub addressing: AddressingTuple,
    pub state: MdState,
    pub(crate) socket_slot: usize,
    pub(crate) use_tcp: bool,
    pub(crate) deadline: Deadline,
    /// Repliers known in advance for a request (empty = unconfirmed/multicast
    /// fan-out, `spec.md` §4.4: "a known-repliers list or none").
    pub num_replies_expected: u32,
    pub num_replies_received: u32,
    pub(crate) num_retries_left: u32,
    pub(crate) retry_interval: Duration,
    pub(crate) frame: ArenaBuf,
    pub(crate) payload_start: usize,
    pub(crate) dataset_len: usize,
    pub(crate) sequence_counter: u32,
}

impl MdSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle: MdHandle,
        session_id: u128,
        addressing: AddressingTuple,
        state: MdState,
        socket_slot: usize,
        use_tcp: bool,
        frame: ArenaBuf,
        payload_start: usize,
        dataset_len: usize,
    ) -> Self {
        Self {
            handle,
            session_id,
            addressing,
            state,
            socket_slot,
            use_tcp,
            deadline: Deadline::Never,
            num_replies_expected: 0,
            num_replies_received: 0,
            num_retries_left: 0,
            retry_interval: Duration::ZERO,
            frame,
            payload_start,
            dataset_len,
            sequence_counter: 0,
        }
    }

    /// Arm (or re-arm) the session's supervision deadline.
    pub(crate) fn arm(&mut self, now: Instant, timeout: Duration) {
        self.deadline = Deadline::after(now, timeout);
    }

    #[must_use]
    pub(crate) fn has_elapsed(&self, now: Instant) -> bool {
        self.deadline.has_elapsed(now)
    }

    pub(crate) fn into_frame(self) -> ArenaBuf {
        self.frame
    }

    /// The fully built wire frame (header + payload + data CRC), ready to
    /// send as-is; `tick_frame`-style sequence-counter rewriting does not
    /// apply to MD, which sends each frame exactly once.
    #[must_use]
    pub fn frame_bytes(&self) -> &[u8] {
        self.frame.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_exactly_the_expected_set() {
        assert!(MdState::Idle.is_terminal());
        assert!(MdState::RxReplySent.is_terminal());
        assert!(MdState::RxNotifyReceived.is_terminal());
        assert!(MdState::TxReplyReceived.is_terminal());
        assert!(MdState::RxConfirmReceived.is_terminal());
        assert!(!MdState::TxRequestW4Reply.is_terminal());
        assert!(!MdState::RxReplyQueryW4Confirm.is_terminal());
        assert!(!MdState::RxRequestW4ApplReply.is_terminal());
    }
}
