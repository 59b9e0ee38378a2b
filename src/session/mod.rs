// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session: the top-level handle a host opens once and drives via
//! [`work_loop`] (`spec.md` §4.1).
//!
//! # Lock order
//!
//! `control` → `tx` → `rx` → `md` → `sockets` → `arena`. A call never holds
//! two of these at once except by acquiring them strictly in this order
//! (e.g. `subscribe` takes `control` to allocate a handle, then `sockets` to
//! get a slot, then `arena` to size the cache, then `rx` to insert the
//! entry — never the reverse). `work_loop::process` is the one caller that
//! legitimately needs more than one: it walks `tx`, then `rx`, then `md` in
//! that order every tick, always releasing each before taking the next.

pub mod work_loop;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::addressing::AddressingTuple;
use crate::arena::Arena;
use crate::config::{MdConfig, PdConfig, SessionConfig, TimeoutBehaviour};
use crate::error::{Error, Result};
use crate::md::replier::Listener;
use crate::md::session::MdHandle;
use crate::md::MdTable;
use crate::pd::publication::{PubHandle, Publication};
use crate::pd::subscription::{SubHandle, Subscription};
use crate::pd::OutboundSeqTable;
use crate::socket::tcp::TcpCorners;
use crate::socket::{SocketPool, SocketPurpose};
use crate::stats::{SessionStats, StatsInner};

struct Control {
    next_pub_handle: u32,
    next_sub_handle: u32,
    closed: bool,
}

pub(crate) struct TxState {
    pub(crate) publications: Vec<Publication>,
    pub(crate) outbound_seq: OutboundSeqTable,
}

pub(crate) struct RxState {
    pub(crate) subscriptions: Vec<Subscription>,
}

pub(crate) struct MdEngineState {
    pub(crate) listeners: Vec<Listener>,
    pub(crate) table: MdTable,
    pub(crate) tcp: TcpCorners,
    /// Bound lazily by the first `listen(.., use_tcp = true)` call; accepts
    /// inbound MD-over-TCP corners (`spec.md` §4.5).
    pub(crate) tcp_listener: Option<std::net::TcpListener>,
}

/// One open TRDP communication session (`spec.md` §4.1).
pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) local_ip: Ipv4Addr,
    control: Mutex<Control>,
    pub(crate) tx: Mutex<TxState>,
    pub(crate) rx: Mutex<RxState>,
    pub(crate) md: Mutex<MdEngineState>,
    pub(crate) sockets: Mutex<SocketPool>,
    pub(crate) arena: Mutex<Arena>,
    pub(crate) stats: Mutex<StatsInner>,
}

impl Session {
    /// Open a new session, discovering the host's primary IPv4 address.
    ///
    /// # Errors
    /// [`Error::Init`] if no usable local address can be determined.
    pub fn open(config: SessionConfig) -> Result<Self> {
        let local_ip = match local_ip_address::local_ip() {
            Ok(std::net::IpAddr::V4(addr)) => addr,
            Ok(std::net::IpAddr::V6(_)) => return Err(Error::Init("host has no IPv4 address".into())),
            Err(e) => return Err(Error::Init(format!("could not determine local address: {e}"))),
        };
        log::info!("trdp session opening on {local_ip}");

        Ok(Self {
            config,
            local_ip,
            control: Mutex::new(Control { next_pub_handle: 0, next_sub_handle: 0, closed: false }),
            tx: Mutex::new(TxState { publications: Vec::new(), outbound_seq: OutboundSeqTable::new() }),
            rx: Mutex::new(RxState { subscriptions: Vec::new() }),
            md: Mutex::new(MdEngineState {
                listeners: Vec::new(),
                table: MdTable::new(),
                tcp: TcpCorners::new(),
                tcp_listener: None,
            }),
            sockets: Mutex::new(SocketPool::new()),
            arena: Mutex::new(Arena::new()),
            stats: Mutex::new(StatsInner::default()),
        })
    }

    /// The host IPv4 address discovered at [`Session::open`], used as the
    /// default source for publications and the bind address for every MD
    /// socket.
    #[must_use]
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    #[must_use]
    pub fn pd_config(&self) -> &PdConfig {
        &self.config.pd
    }

    #[must_use]
    pub fn md_config(&self) -> &MdConfig {
        &self.config.md
    }

    /// Close the session: nothing further is sent or received, but already
    /// allocated entries are left for the caller to drop.
    pub fn close(&self) {
        self.control.lock().closed = true;
        log::info!("trdp session closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.control.lock().closed
    }

    /// Snapshot of the session's traffic counters (`spec.md` §9 supplement).
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats.lock().snapshot()
    }

    fn check_open(&self) -> Result<()> {
        if self.control.lock().closed {
            Err(Error::NoInit)
        } else {
            Ok(())
        }
    }

    /// Register a cyclic publication. Sizes and seeds the publication's
    /// frame once; `put` replaces its payload later without reallocating.
    ///
    /// # Errors
    /// Propagates socket bind or arena allocation failures.
    pub fn publish(
        &self,
        mut addressing: AddressingTuple,
        interval: Duration,
        data: &[u8],
        redundancy_group: Option<u32>,
    ) -> Result<PubHandle> {
        self.check_open()?;
        if addressing.source == Ipv4Addr::UNSPECIFIED {
            addressing.source = self.local_ip;
        }
        if data.len() > crate::config::MAX_PD_DATA_LEN {
            return Err(Error::Packet);
        }

        let handle = {
            let mut control = self.control.lock();
            let handle = PubHandle(control.next_pub_handle);
            control.next_pub_handle = control.next_pub_handle.wrapping_add(1);
            handle
        };

        let bind_addr = SocketAddrV4::new(self.local_ip, crate::config::PD_UDP_PORT);
        let socket_slot = self.sockets.lock().request(SocketPurpose::PdUdp, bind_addr)?;

        let now = Instant::now();
        let mut tx = self.tx.lock();
        let seed_seq = tx.outbound_seq.current(addressing.com_id, crate::config::MsgType::PdData as u16, addressing.source);

        let mut arena = self.arena.lock();
        let frame_len = crate::pd::header::PD_HEADER_LEN + crate::pd::header::padded_len(data.len()) + 4;
        let frame = arena.alloc(frame_len)?;
        drop(arena);

        let publication = Publication::new(
            handle,
            addressing,
            interval,
            now,
            socket_slot,
            redundancy_group,
            frame,
            data,
            crate::pd::publication::PubFlags::NONE,
            seed_seq,
        );
        tx.outbound_seq.record(addressing.com_id, crate::config::MsgType::PdData as u16, addressing.source, seed_seq);
        tx.publications.push(publication);
        Ok(handle)
    }

    /// Suppress or resume a redundancy-group publication's actual
    /// transmission without touching its sequencing (`spec.md` §4.6): the
    /// session carries no leader election of its own, a host's external
    /// policy calls this as its election result changes.
    ///
    /// # Errors
    /// [`Error::NoPub`] if `handle` is unknown.
    pub fn set_redundancy_suppressed(&self, handle: PubHandle, suppressed: bool) -> Result<()> {
        let mut tx = self.tx.lock();
        let publication = tx.publications.iter_mut().find(|p| p.handle == handle).ok_or(Error::NoPub)?;
        if suppressed {
            publication.flags.set(crate::pd::publication::PubFlags::REDUNDANCY_SUPPRESSED);
        } else {
            publication.flags.clear(crate::pd::publication::PubFlags::REDUNDANCY_SUPPRESSED);
        }
        Ok(())
    }

    /// Replace a publication's payload without transmitting.
    ///
    /// # Errors
    /// [`Error::NoPub`] if `handle` is unknown, [`Error::Param`] on a length
    /// mismatch.
    pub fn put(&self, handle: PubHandle, data: &[u8]) -> Result<()> {
        let mut tx = self.tx.lock();
        let publication = tx.publications.iter_mut().find(|p| p.handle == handle).ok_or(Error::NoPub)?;
        publication.put(data)
    }

    /// Destroy a publication (`spec.md` §3, §5): detaches it from its socket
    /// slot, releasing the slot once no other publication or subscription is
    /// still using it, and frees its frame buffer.
    ///
    /// # Errors
    /// [`Error::NoPub`] if `handle` is unknown.
    pub fn unpublish(&self, handle: PubHandle) -> Result<()> {
        let mut tx = self.tx.lock();
        let index = tx.publications.iter().position(|p| p.handle == handle).ok_or(Error::NoPub)?;
        let publication = tx.publications.remove(index);
        drop(tx);

        self.sockets.lock().release(publication.socket_slot);
        self.arena.lock().free(publication.into_frame());
        Ok(())
    }

    /// Register a subscription.
    ///
    /// # Errors
    /// Propagates socket bind or arena allocation failures.
    pub fn subscribe(
        &self,
        addressing: AddressingTuple,
        timeout: Duration,
        timeout_behaviour: TimeoutBehaviour,
        max_len: usize,
    ) -> Result<SubHandle> {
        self.check_open()?;

        let handle = {
            let mut control = self.control.lock();
            let handle = SubHandle(control.next_sub_handle);
            control.next_sub_handle = control.next_sub_handle.wrapping_add(1);
            handle
        };

        let bind_addr = SocketAddrV4::new(
            addressing.destination.is_unspecified().then_some(self.local_ip).unwrap_or(addressing.destination),
            crate::config::PD_UDP_PORT,
        );
        let socket_slot = self.sockets.lock().request(SocketPurpose::PdUdp, bind_addr)?;
        if let Some(group) = addressing.multicast_group {
            self.sockets.lock().join_multicast(socket_slot, group, self.local_ip)?;
        }

        let now = Instant::now();
        let mut arena = self.arena.lock();
        let subscription = Subscription::new(
            handle,
            addressing,
            timeout,
            timeout_behaviour,
            self.config.pd.seqcount_initial_capacity,
            socket_slot,
            max_len,
            &mut arena,
            now,
        )?;
        drop(arena);

        self.rx.lock().subscriptions.push(subscription);
        Ok(handle)
    }

    /// Current cached payload for a subscription.
    ///
    /// # Errors
    /// [`Error::NoSub`] if `handle` is unknown.
    pub fn get(&self, handle: SubHandle) -> Result<Vec<u8>> {
        let rx = self.rx.lock();
        let sub = rx.subscriptions.iter().find(|s| s.handle == handle).ok_or(Error::NoSub)?;
        Ok(sub.data().to_vec())
    }

    /// Destroy a subscription (`spec.md` §5, §8): leaves its multicast group
    /// first if it had joined one — refcounted, so a sibling subscription
    /// sharing the same group keeps it joined — then detaches it from its
    /// socket slot, releasing the slot once no other subscription or
    /// publication is still using it, and frees its cache buffer.
    ///
    /// # Errors
    /// [`Error::NoSub`] if `handle` is unknown.
    pub fn unsubscribe(&self, handle: SubHandle) -> Result<()> {
        let mut rx = self.rx.lock();
        let index = rx.subscriptions.iter().position(|s| s.handle == handle).ok_or(Error::NoSub)?;
        let subscription = rx.subscriptions.remove(index);
        drop(rx);

        let mut sockets = self.sockets.lock();
        if let Some(group) = subscription.addressing.multicast_group {
            sockets.leave_multicast(subscription.socket_slot, group, self.local_ip)?;
        }
        sockets.release(subscription.socket_slot);
        drop(sockets);

        self.arena.lock().free(subscription.into_cache());
        Ok(())
    }

    /// Register a standing MD listener, matching inbound notify/request
    /// frames by addressing tuple.
    pub fn listen(&self, addressing: AddressingTuple, use_tcp: bool) -> Result<()> {
        self.check_open()?;
        let port = crate::config::MD_UDP_PORT;
        let purpose = if use_tcp { SocketPurpose::MdTcp } else { SocketPurpose::MdUdp };
        let bind_addr = SocketAddrV4::new(self.local_ip, port);
        let socket_slot = self.sockets.lock().request(purpose, bind_addr)?;
        let mut md = self.md.lock();
        if use_tcp && md.tcp_listener.is_none() {
            let listener = std::net::TcpListener::bind(bind_addr)?;
            listener.set_nonblocking(true)?;
            md.tcp_listener = Some(listener);
        }
        md.listeners.push(Listener::new(addressing, socket_slot));
        Ok(())
    }

    /// Send a fire-and-forget MD notify.
    ///
    /// # Errors
    /// Propagates socket bind or arena allocation failures.
    pub fn notify(&self, addressing: AddressingTuple, use_tcp: bool, data: &[u8]) -> Result<()> {
        self.check_open()?;
        let session_id = crate::md::uuid::generate();
        let purpose = if use_tcp { SocketPurpose::MdTcp } else { SocketPurpose::MdUdp };
        let bind_addr = SocketAddrV4::new(self.local_ip, crate::config::MD_UDP_PORT);
        let socket_slot = self.sockets.lock().request(purpose, bind_addr)?;

        let mut md = self.md.lock();
        let handle = md.table.alloc_handle();
        let mut arena = self.arena.lock();
        let session = crate::md::caller::build_notify(
            handle, addressing, socket_slot, use_tcp, session_id, "", "", data, &mut arena,
        )?;
        drop(arena);
        md.table.insert(session);
        Ok(())
    }

    /// Send an MD request, fanning out to `num_replies_expected` known
    /// repliers (`0` for an unconfirmed multicast fan-out).
    ///
    /// # Errors
    /// Propagates socket bind or arena allocation failures.
    pub fn request(
        &self,
        addressing: AddressingTuple,
        use_tcp: bool,
        data: &[u8],
        num_replies_expected: u32,
    ) -> Result<MdHandle> {
        self.check_open()?;
        let session_id = crate::md::uuid::generate();
        let purpose = if use_tcp { SocketPurpose::MdTcp } else { SocketPurpose::MdUdp };
        let bind_addr = SocketAddrV4::new(self.local_ip, crate::config::MD_UDP_PORT);
        let socket_slot = self.sockets.lock().request(purpose, bind_addr)?;

        let mut md = self.md.lock();
        let handle = md.table.alloc_handle();
        let mut arena = self.arena.lock();
        let session = crate::md::caller::build_request(
            handle,
            addressing,
            socket_slot,
            use_tcp,
            session_id,
            self.config.md.default_reply_timeout,
            num_replies_expected,
            self.config.md.num_retries_max,
            self.config.md.retry_interval,
            "",
            "",
            data,
            &mut arena,
        )?;
        drop(arena);
        md.table.insert(session);
        Ok(handle)
    }

    /// Build the final reply (no confirm requested) for a session created
    /// by an inbound request, replacing its table entry in place.
    ///
    /// # Errors
    /// [`Error::NoSession`] if `handle` names no live session, propagates
    /// arena allocation failures.
    pub fn reply(&self, handle: MdHandle, reply_status: i32, data: &[u8]) -> Result<()> {
        let mut md = self.md.lock();
        let existing = md.table.get_mut(handle).ok_or(Error::NoSession)?;
        let (addressing, session_id, socket_slot, use_tcp) =
            (existing.addressing, existing.session_id, existing.socket_slot, existing.use_tcp);

        let mut arena = self.arena.lock();
        let session = crate::md::replier::build_reply(
            handle, addressing, socket_slot, use_tcp, session_id, reply_status, "", "", data, &mut arena,
        )?;
        drop(arena);
        md.table.insert(session);
        Ok(())
    }

    /// Build a reply that requests a confirm from the caller, replacing the
    /// session's table entry in place.
    ///
    /// # Errors
    /// [`Error::NoSession`] if `handle` names no live session, propagates
    /// arena allocation failures.
    pub fn reply_query(&self, handle: MdHandle, reply_status: i32, data: &[u8]) -> Result<()> {
        let mut md = self.md.lock();
        let existing = md.table.get_mut(handle).ok_or(Error::NoSession)?;
        let (addressing, session_id, socket_slot, use_tcp) =
            (existing.addressing, existing.session_id, existing.socket_slot, existing.use_tcp);

        let mut arena = self.arena.lock();
        let session = crate::md::replier::build_reply_query(
            handle, addressing, socket_slot, use_tcp, session_id, reply_status, "", "", data, &mut arena,
        )?;
        drop(arena);
        md.table.insert(session);
        Ok(())
    }

    /// Build the confirm a caller sends back after a `replyQuery`, replacing
    /// the session's table entry in place.
    ///
    /// # Errors
    /// [`Error::NoSession`] if `handle` names no live session, propagates
    /// arena allocation failures.
    pub fn confirm(&self, handle: MdHandle, reply_status: i32) -> Result<()> {
        let mut md = self.md.lock();
        let existing = md.table.get_mut(handle).ok_or(Error::NoSession)?;
        let (addressing, session_id, socket_slot, use_tcp) =
            (existing.addressing, existing.session_id, existing.socket_slot, existing.use_tcp);

        let mut arena = self.arena.lock();
        let session = crate::md::caller::build_confirm(
            handle, addressing, socket_slot, use_tcp, session_id, reply_status, "", "", &mut arena,
        )?;
        drop(arena);
        md.table.insert(session);
        Ok(())
    }

    /// Abandon an in-flight MD session before it reaches its own terminal
    /// state (`spec.md` §5: "abandoned by `abortSession(sessionID)`"):
    /// removes it from the table immediately, discards any frame still
    /// queued for it on a TCP corner, and releases the socket slot it held.
    /// Fires no further [`crate::md::MdEvent`] for `handle`.
    ///
    /// # Errors
    /// [`Error::NoSession`] if `handle` names no live session.
    pub fn abort_session(&self, handle: MdHandle) -> Result<()> {
        let mut md = self.md.lock();
        let session = md.table.remove(handle).ok_or(Error::NoSession)?;
        if session.use_tcp {
            let dest = SocketAddr::V4(SocketAddrV4::new(session.addressing.destination, crate::config::MD_UDP_PORT));
            if let Some(corner) = md.tcp.get_mut(dest) {
                corner.discard(handle);
            }
        }
        drop(md);
        self.sockets.lock().release(session.socket_slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpublish_frees_the_handle() {
        let session = Session::open(SessionConfig::default()).unwrap();
        let handle = session.publish(AddressingTuple::any(1), Duration::from_millis(10), &[1, 2, 3, 4], None).unwrap();
        session.unpublish(handle).unwrap();
        assert!(matches!(session.put(handle, &[0, 0, 0, 0]), Err(Error::NoPub)));
        assert!(matches!(session.unpublish(handle), Err(Error::NoPub)));
    }

    #[test]
    fn unsubscribe_frees_the_handle() {
        let session = Session::open(SessionConfig::default()).unwrap();
        let handle = session.subscribe(AddressingTuple::any(2), Duration::ZERO, TimeoutBehaviour::ZeroOut, 4).unwrap();
        session.unsubscribe(handle).unwrap();
        assert!(matches!(session.get(handle), Err(Error::NoSub)));
        assert!(matches!(session.unsubscribe(handle), Err(Error::NoSub)));
    }

    #[test]
    fn unsubscribe_leaves_a_multicast_group_only_once_unreferenced() {
        let session = Session::open(SessionConfig::default()).unwrap();
        let mut addressing = AddressingTuple::any(3);
        addressing.multicast_group = Some(std::net::Ipv4Addr::new(239, 1, 1, 1));
        let first = session.subscribe(addressing, Duration::ZERO, TimeoutBehaviour::ZeroOut, 4).unwrap();
        let second = session.subscribe(addressing, Duration::ZERO, TimeoutBehaviour::ZeroOut, 4).unwrap();

        session.unsubscribe(first).unwrap();
        assert!(session.get(second).is_ok());
        session.unsubscribe(second).unwrap();
    }

    #[test]
    fn abort_session_retires_an_in_flight_request() {
        let session = Session::open(SessionConfig::default()).unwrap();
        let handle = session.request(AddressingTuple::any(4), false, &[1, 2], 1).unwrap();
        session.abort_session(handle).unwrap();
        assert!(matches!(session.abort_session(handle), Err(Error::NoSession)));
    }
}
