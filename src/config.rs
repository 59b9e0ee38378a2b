// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Protocol constants and session-level configuration defaults.

use std::time::Duration;

/// Default UDP port for Process Data traffic.
pub const PD_UDP_PORT: u16 = 17224;
/// Default UDP/TCP port for Message Data traffic.
pub const MD_UDP_PORT: u16 = 17225;

/// Protocol version without service-id support.
pub const PROTOCOL_VERSION_1_0: u16 = 0x0100;
/// Protocol version with service-id support.
pub const PROTOCOL_VERSION_1_1: u16 = 0x0101;

/// Maximum PD dataset length (octets), per the wire spec.
pub const MAX_PD_DATA_LEN: usize = 1432;

/// Message type codes (wire, big-endian `u16`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    /// PD data (`Pd`)
    PdData = 0x5064,
    /// PD pull reply (`Pp`)
    PdPullReply = 0x5070,
    /// PD request (`Pr`)
    PdRequest = 0x5072,
    /// PD error (`Pe`)
    PdError = 0x5065,
    /// MD notification (`Mn`)
    MdNotify = 0x4D6E,
    /// MD request (`Mr`)
    MdRequest = 0x4D72,
    /// MD reply (`Mp`)
    MdReply = 0x4D70,
    /// MD reply with confirm request (`Mq`)
    MdReplyQuery = 0x4D71,
    /// MD confirm (`Mc`)
    MdConfirm = 0x4D63,
    /// MD error (`Me`)
    MdError = 0x4D65,
}

impl MsgType {
    /// Decode a wire value, returning `None` for unknown codes.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x5064 => MsgType::PdData,
            0x5070 => MsgType::PdPullReply,
            0x5072 => MsgType::PdRequest,
            0x5065 => MsgType::PdError,
            0x4D6E => MsgType::MdNotify,
            0x4D72 => MsgType::MdRequest,
            0x4D70 => MsgType::MdReply,
            0x4D71 => MsgType::MdReplyQuery,
            0x4D63 => MsgType::MdConfirm,
            0x4D65 => MsgType::MdError,
            _ => return None,
        })
    }
}

/// Timeout policy applied when a subscription's receive deadline expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutBehaviour {
    /// Clear the cached payload and deliver it as all-zero with `INVALID_DATA`.
    ZeroOut,
    /// Deliver the last cached payload unchanged.
    KeepLast,
}

/// Session-wide defaults passed to [`crate::session::Session::open`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Defaults applied to new publications/subscriptions.
    pub pd: PdConfig,
    /// Defaults applied to new MD sessions/listeners.
    pub md: MdConfig,
    /// Minimum useful wake interval; the work loop never promises finer granularity.
    pub tick_resolution: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pd: PdConfig::default(),
            md: MdConfig::default(),
            tick_resolution: Duration::from_millis(1),
        }
    }
}

/// PD engine defaults.
#[derive(Debug, Clone)]
pub struct PdConfig {
    /// Default receive timeout for new subscriptions (0 disables supervision).
    pub default_timeout: Duration,
    /// Default timeout policy.
    pub default_timeout_behaviour: TimeoutBehaviour,
    /// Initial capacity of a subscription's sequence-counter list.
    pub seqcount_initial_capacity: usize,
}

impl Default for PdConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(0),
            default_timeout_behaviour: TimeoutBehaviour::ZeroOut,
            seqcount_initial_capacity: 64,
        }
    }
}

/// MD engine defaults.
#[derive(Debug, Clone)]
pub struct MdConfig {
    /// Default reply timeout for `request`.
    pub default_reply_timeout: Duration,
    /// Default confirm timeout for `replyQuery`.
    pub default_confirm_timeout: Duration,
    /// Default connect timeout for TCP corners.
    pub default_connect_timeout: Duration,
    /// Default send timeout for a single outgoing TCP message.
    pub default_sending_timeout: Duration,
    /// Maximum retries for a caller-side request before declaring `REPLYTO_ERR`.
    pub num_retries_max: u32,
    /// Delay between a caller-side request retry and the next.
    pub retry_interval: Duration,
    /// Maximum MD frame length accepted/sent (implementation-defined, configurable).
    pub max_md_data_len: usize,
}

impl Default for MdConfig {
    fn default() -> Self {
        Self {
            default_reply_timeout: Duration::from_secs(5),
            default_confirm_timeout: Duration::from_secs(2),
            default_connect_timeout: Duration::from_secs(3),
            default_sending_timeout: Duration::from_secs(3),
            num_retries_max: 0,
            retry_interval: Duration::from_secs(1),
            max_md_data_len: 64 * 1024,
        }
    }
}
