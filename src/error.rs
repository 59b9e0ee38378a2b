// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Crate-wide error taxonomy.
//!
//! One variant per failure concern, grouped the way the wire protocol and
//! the original TRDP API group their result codes. Wire errors on inbound
//! frames are never propagated as an `Err` up to the application — they are
//! counted (see [`crate::stats::SessionStats`]) and the frame is dropped.
//! `Error` is reserved for calls that can fail synchronously: `publish`,
//! `subscribe`, `request`, socket setup, and session open/close.

use std::fmt;
use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Result/error taxonomy. Mirrors `spec.md` §7.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Parameter / initialisation errors
    // ========================================================================
    /// An argument was out of range or otherwise invalid.
    Param(&'static str),
    /// Session open failed before any resource was usable.
    Init(String),
    /// A call was made against a session that was never opened or already closed.
    NoInit,
    /// Operation cannot complete without blocking and non-blocking was required.
    Block,

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// Socket-level failure (bind, connect, option).
    Sock(String),
    /// I/O error with underlying cause.
    Io(io::Error),
    /// Expected data was not available (non-blocking read found nothing).
    NoData,

    // ========================================================================
    // Memory / concurrency errors
    // ========================================================================
    /// The session arena has no bucket large enough or the bucket is exhausted.
    Mem,
    /// A mutex acquisition would have violated the documented lock order.
    LockOrder(&'static str),
    /// A bounded queue rejected an insert because it is full.
    QueueFull,

    // ========================================================================
    // Semantic errors
    // ========================================================================
    /// No such session exists.
    NoSession,
    /// No such subscription exists.
    NoSub,
    /// No such publication exists.
    NoPub,
    /// No such listener exists.
    NoList,
    /// ComId is not registered with this session.
    ComId(u32),
    /// Call is not valid for the MD session's current state.
    State(&'static str),

    // ========================================================================
    // Wire / data errors
    // ========================================================================
    /// Header or data CRC mismatch.
    Crc,
    /// Frame is structurally malformed (short, bad version, unknown msg type).
    Wire(&'static str),
    /// ETB/operational-train topology counters did not match.
    Topo,
    /// Frame exceeds the configured maximum length for its kind.
    Packet,

    // ========================================================================
    // Timeout errors
    // ========================================================================
    /// A PD subscription's receive-timeout deadline elapsed.
    Timeout,
    /// An MD request received no (or not enough) replies before its deadline.
    ReplyTimeout,
    /// An MD reply-with-confirm session received no confirm before its deadline.
    ConfirmTimeout,
    /// The caller-side confirm-send deadline elapsed before `reply_confirm` ran.
    ReqConfirmTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Param(msg) => write!(f, "invalid parameter: {msg}"),
            Error::Init(msg) => write!(f, "session init failed: {msg}"),
            Error::NoInit => write!(f, "session not initialised"),
            Error::Block => write!(f, "operation would block"),
            Error::Sock(msg) => write!(f, "socket error: {msg}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::NoData => write!(f, "no data available"),
            Error::Mem => write!(f, "arena allocation failed"),
            Error::LockOrder(scope) => write!(f, "lock order violation at {scope}"),
            Error::QueueFull => write!(f, "queue is full"),
            Error::NoSession => write!(f, "no such session"),
            Error::NoSub => write!(f, "no such subscription"),
            Error::NoPub => write!(f, "no such publication"),
            Error::NoList => write!(f, "no such listener"),
            Error::ComId(id) => write!(f, "unknown comId {id}"),
            Error::State(state) => write!(f, "invalid call for state {state}"),
            Error::Crc => write!(f, "CRC mismatch"),
            Error::Wire(msg) => write!(f, "malformed frame: {msg}"),
            Error::Topo => write!(f, "topology counter mismatch"),
            Error::Packet => write!(f, "frame exceeds maximum length"),
            Error::Timeout => write!(f, "receive timeout"),
            Error::ReplyTimeout => write!(f, "reply timeout"),
            Error::ConfirmTimeout => write!(f, "confirm timeout"),
            Error::ReqConfirmTimeout => write!(f, "confirm-send timeout"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
