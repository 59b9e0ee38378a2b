// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # trdp - Train Real-time Data Protocol
//!
//! A pure Rust implementation of the TRDP communication profile (IEC 61375-2-3):
//! cyclic Process Data (PD) publish/subscribe over UDP, and transactional
//! Message Data (MD) request/reply/confirm over UDP or TCP, sharing one
//! session context.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::{Duration, Instant};
//! use trdp::{AddressingTuple, SessionConfig, TimeoutBehaviour};
//! use trdp::Session;
//!
//! fn main() -> trdp::Result<()> {
//!     let session = Session::open(SessionConfig::default())?;
//!
//!     let addressing = AddressingTuple::any(1001);
//!     session.publish(addressing, Duration::from_millis(100), &[0u8; 8], None)?;
//!     let sub = session.subscribe(addressing, Duration::from_secs(1), TimeoutBehaviour::ZeroOut, 8)?;
//!
//!     loop {
//!         let now = Instant::now();
//!         session.process(now, &mut |_event| {}, &mut |_event| {})?;
//!         let _ = session.get(sub)?;
//!         break;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                         Application                          |
//! |   Session::publish/subscribe/notify/request/reply/confirm     |
//! +--------------------------------------------------------------+
//! |                      Session::process                        |
//! |   pd::dispatch_inbound | md::dispatch_inbound | retries/reap  |
//! +--------------------------------------------------------------+
//! |              pd (publication/subscription)                   |
//! |              md (caller/replier/session state)                |
//! +--------------------------------------------------------------+
//! |         socket (UDP pool, TCP corners) | arena (buffers)      |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Session`] | Entry point: one open communication session |
//! | [`pd::PdEvent`] | Inbound PD notification (data, timeout, drop) |
//! | [`md::MdEvent`] | Inbound MD notification (caller/replier progress) |
//! | [`AddressingTuple`] | Identity shared by publications/subscriptions/listeners |
//!
//! ## Modules Overview
//!
//! - [`session`] - Session lifecycle and the host-driven work loop
//! - [`pd`] - Process Data engine (cyclic publish/subscribe)
//! - [`md`] - Message Data engine (request/reply/confirm)
//! - [`socket`] - UDP socket pool and TCP connection ("corner") management
//! - [`arena`] - Session-lifetime bucketed buffer allocator
//! - [`addressing`] - The comId/source/destination/topology matching tuple
//! - [`config`] - Protocol constants and session configuration defaults
//! - [`error`] - Crate-wide error taxonomy
//! - [`stats`] - Session traffic counters

pub mod addressing;
pub mod arena;
pub mod config;
pub mod crc;
pub mod error;
pub mod flags;
pub mod md;
pub mod pd;
pub mod session;
pub mod socket;
pub mod stats;
pub mod time;

pub use addressing::AddressingTuple;
pub use config::{MdConfig, PdConfig, SessionConfig, TimeoutBehaviour};
pub use error::{Error, Result};
pub use md::{MdEvent, MdSink};
pub use pd::{PdEvent, PdSink};
pub use session::Session;
pub use stats::SessionStats;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn publish_subscribe_round_trip_through_public_api() {
        let session = Session::open(SessionConfig::default()).unwrap();
        let mut addressing = AddressingTuple::any(4242);
        addressing.destination = std::net::Ipv4Addr::LOCALHOST;

        let sub = session.subscribe(addressing, Duration::from_secs(0), TimeoutBehaviour::ZeroOut, 4).unwrap();
        session.publish(addressing, Duration::from_millis(0), &[1, 2, 3, 4], None).unwrap();

        let mut now = Instant::now();
        for _ in 0..50 {
            session.process(now, &mut |_| {}, &mut |_| {}).unwrap();
            if session.get(sub).unwrap() == [1, 2, 3, 4] {
                break;
            }
            now += Duration::from_millis(2);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(session.get(sub).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn session_close_rejects_further_registrations() {
        let session = Session::open(SessionConfig::default()).unwrap();
        session.close();
        assert!(session.is_closed());
        assert!(session.subscribe(AddressingTuple::any(1), Duration::ZERO, TimeoutBehaviour::ZeroOut, 8).is_err());
    }
}
