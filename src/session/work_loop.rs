// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The cooperative work loop a host drives `Session` with (`spec.md` §4.1).
//!
//! There is no internal thread: the host calls [`Session::process`] from
//! whatever scheduling context it likes (a dedicated thread, a timer tick,
//! an event-loop callback) and uses [`Session::get_interval`] to size its
//! next wait so sends and timeouts still happen close to on time.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::md::{self, MdSink};
use crate::pd::{self, PdSink};

use super::Session;

const PD_RECV_BUF_LEN: usize = 2048;

impl Session {
    /// Earliest deadline across every publication, subscription, and MD
    /// session, clamped to [`crate::config::SessionConfig::tick_resolution`].
    /// A host blocking on a timer/select should never wait longer than this.
    #[must_use]
    pub fn get_interval(&self, now: Instant) -> Duration {
        let mut deadline = crate::time::Deadline::Never;

        {
            let tx = self.tx.lock();
            for publication in &tx.publications {
                deadline = deadline.earliest(publication.next_deadline);
            }
        }
        {
            let rx = self.rx.lock();
            for subscription in &rx.subscriptions {
                deadline = deadline.earliest(subscription.next_deadline);
            }
        }
        {
            let md = self.md.lock();
            for session in md.table.sessions_iter() {
                deadline = deadline.earliest(session.deadline);
            }
        }

        deadline.remaining(now).unwrap_or(self.config.tick_resolution).max(self.config.tick_resolution)
    }

    /// Run one iteration of the work loop: send due publications, drain and
    /// dispatch inbound PD/MD datagrams, fire timeouts, resend MD retries,
    /// and reap sessions/corners with nothing left to do.
    ///
    /// # Errors
    /// Propagates a socket I/O failure other than `WouldBlock`.
    pub fn process(&self, now: Instant, pd_sink: &mut impl PdSink, md_sink: &mut impl MdSink) -> Result<()> {
        self.send_due_publications(now)?;
        self.drain_pd_inbound(now, pd_sink)?;
        {
            let mut rx = self.rx.lock();
            pd::poll_timeouts(&mut rx.subscriptions, now, pd_sink);
        }
        self.drain_md_inbound(now, md_sink)?;
        self.drain_md_tcp(now, md_sink)?;
        self.send_armed_md_frames(now)?;
        self.resend_md_retries(now, md_sink)?;
        self.reap_md();
        Ok(())
    }

    /// Transmit every MD session still waiting to send its built frame
    /// (notify, request, reply, replyQuery, confirm) and advance its state
    /// machine past the send (`spec.md` §4.4, §4.5).
    fn send_armed_md_frames(&self, now: Instant) -> Result<()> {
        use crate::md::session::MdState;

        let mut md = self.md.lock();
        let sockets = self.sockets.lock();
        let mut stats = self.stats.lock();
        let reply_timeout = self.config.md.default_reply_timeout;
        let confirm_timeout = self.config.md.default_confirm_timeout;
        let connect_timeout = self.config.md.default_connect_timeout;

        let armed: Vec<u32> = md
            .table
            .sessions_iter()
            .filter(|s| {
                matches!(
                    s.state,
                    MdState::TxNotifyArm
                        | MdState::TxRequestArm
                        | MdState::TxReplyArm
                        | MdState::TxReplyQueryArm
                        | MdState::TxConfirmArm
                )
            })
            .map(|s| s.handle.0)
            .collect();

        for key in armed {
            let handle = crate::md::session::MdHandle(key);
            let Some(session) = md.table.get_mut(handle) else { continue };
            let dest = SocketAddr::V4(SocketAddrV4::new(session.addressing.destination, crate::config::MD_UDP_PORT));
            let is_caller_leg = matches!(session.state, MdState::TxNotifyArm | MdState::TxRequestArm | MdState::TxConfirmArm);

            let sent = if session.use_tcp {
                match md.tcp.get_or_connect(dest, connect_timeout) {
                    Ok(corner) => {
                        corner.queue_write(handle, session.frame_bytes().to_vec());
                        true
                    }
                    Err(_) => false,
                }
            } else {
                match sockets.get(session.socket_slot) {
                    Some(slot) => slot.socket.send_to(session.frame_bytes(), dest).is_ok(),
                    None => false,
                }
            };

            if !sent {
                continue;
            }
            stats.num_send += 1;
            if is_caller_leg {
                crate::md::caller::on_sent(session, now, reply_timeout, confirm_timeout);
            } else {
                crate::md::replier::on_sent(session, now, confirm_timeout);
            }
        }
        Ok(())
    }

    /// Accept inbound MD-over-TCP corners, flush each corner's queued
    /// outbound frames, and dispatch every complete frame read from one.
    fn drain_md_tcp(&self, now: Instant, sink: &mut impl MdSink) -> Result<()> {
        let mut md = self.md.lock();

        if let Some(listener) = md.tcp_listener.as_ref() {
            loop {
                match listener.accept() {
                    Ok((stream, remote)) => {
                        let _ = md.tcp.accept(remote, stream);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }
        }

        let tcp_socket_slot = {
            let sockets = self.sockets.lock();
            md.listeners
                .iter()
                .find(|l| sockets.get(l.socket_slot).is_some_and(|s| s.purpose == crate::socket::SocketPurpose::MdTcp))
                .map(|l| l.socket_slot)
        };

        let mut frames = Vec::new();
        for corner in md.tcp.iter_mut() {
            let _ = corner.flush_writes();
            match corner.poll_frames() {
                Ok(mut new_frames) => frames.append(&mut new_frames),
                Err(_) => continue,
            }
        }
        drop(md);

        if frames.is_empty() {
            return Ok(());
        }

        let Some(socket_slot) = tcp_socket_slot else { return Ok(()) };
        let default_reply_timeout = self.config.md.default_reply_timeout;
        let default_confirm_timeout = self.config.md.default_confirm_timeout;
        let mut md = self.md.lock();
        let mut arena = self.arena.lock();
        let mut stats = self.stats.lock();
        for raw in frames {
            md::dispatch_inbound(
                &md.listeners,
                &mut md.table,
                &raw,
                now,
                default_reply_timeout,
                default_confirm_timeout,
                socket_slot,
                true,
                &mut arena,
                &mut stats,
                sink,
            );
        }
        Ok(())
    }

    fn send_due_publications(&self, now: Instant) -> Result<()> {
        let mut tx = self.tx.lock();
        let sockets = self.sockets.lock();
        let mut stats = self.stats.lock();

        for publication in &mut tx.publications {
            if !publication.next_deadline.has_elapsed(now) {
                continue;
            }
            let Some(slot) = sockets.get(publication.socket_slot) else {
                continue;
            };
            if !publication.flags.contains(crate::pd::PubFlags::REDUNDANCY_SUPPRESSED) {
                let dest = publication.addressing.multicast_group.unwrap_or(publication.addressing.destination);
                let dest_addr = SocketAddr::V4(SocketAddrV4::new(dest, crate::config::PD_UDP_PORT));
                let frame = publication.tick_frame();
                match slot.socket.send_to(frame, dest_addr) {
                    Ok(_) => {
                        publication.num_send += 1;
                        stats.num_send += 1;
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }
            publication.next_deadline = crate::time::Deadline::after(now, publication.interval);
        }
        Ok(())
    }

    fn drain_pd_inbound(&self, now: Instant, sink: &mut impl PdSink) -> Result<()> {
        let datagrams = self.recv_all(|_sockets| {
            let rx = self.rx.lock();
            rx.subscriptions.iter().map(|s| s.socket_slot).collect::<HashSet<_>>().into_iter().collect::<Vec<_>>()
        })?;

        let mut rx = self.rx.lock();
        let mut stats = self.stats.lock();
        for (_slot, raw, source, destination) in datagrams {
            let Some(src) = as_ipv4(source) else { continue };
            let dst = as_ipv4(destination).unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
            pd::dispatch_inbound(&mut rx.subscriptions, &raw, src, dst, now, &mut stats, sink);
        }
        Ok(())
    }

    fn drain_md_inbound(&self, now: Instant, sink: &mut impl MdSink) -> Result<()> {
        let datagrams = self.recv_all(|_| {
            let md = self.md.lock();
            let mut slots: HashSet<usize> = md.listeners.iter().map(|l| l.socket_slot).collect();
            slots.extend(md.table.sessions_iter().filter(|s| !s.use_tcp).map(|s| s.socket_slot));
            slots.into_iter().collect::<Vec<_>>()
        })?;

        let default_reply_timeout = self.config.md.default_reply_timeout;
        let default_confirm_timeout = self.config.md.default_confirm_timeout;
        let mut md = self.md.lock();
        let mut arena = self.arena.lock();
        let mut stats = self.stats.lock();
        for (socket_slot, raw, _source, _destination) in datagrams {
            md::dispatch_inbound(
                &md.listeners,
                &mut md.table,
                &raw,
                now,
                default_reply_timeout,
                default_confirm_timeout,
                socket_slot,
                false,
                &mut arena,
                &mut stats,
                sink,
            );
        }
        Ok(())
    }

    /// Drain every distinct socket slot returned by `slots_of` with a
    /// non-blocking `recv_from` loop, stopping at `WouldBlock`. Collected up
    /// front so the caller never needs to hold `sockets` and its own state
    /// lock (`rx`/`md`) at the same time.
    fn recv_all(
        &self,
        slots_of: impl Fn(&crate::socket::SocketPool) -> Vec<usize>,
    ) -> Result<Vec<(usize, Vec<u8>, SocketAddr, SocketAddr)>> {
        let sockets = self.sockets.lock();
        let slots = slots_of(&sockets);
        let mut out = Vec::new();
        let mut buf = [0u8; PD_RECV_BUF_LEN];
        for slot_index in slots {
            let Some(slot) = sockets.get(slot_index) else { continue };
            let local = SocketAddr::V4(slot.bind_addr);
            loop {
                match slot.socket.recv_from(&mut buf) {
                    Ok((len, source)) => out.push((slot_index, buf[..len].to_vec(), source, local)),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(out)
    }

    fn resend_md_retries(&self, now: Instant, sink: &mut impl MdSink) -> Result<()> {
        let mut md = self.md.lock();
        let resends = md::poll_timeouts(&mut md.table, now, sink);
        let sockets = self.sockets.lock();
        let mut stats = self.stats.lock();
        let connect_timeout = self.config.md.default_connect_timeout;
        for (handle, retry) in resends {
            if !retry {
                continue;
            }
            let Some(session) = md.table.get_mut(handle) else { continue };
            let dest = SocketAddr::V4(SocketAddrV4::new(session.addressing.destination, crate::config::MD_UDP_PORT));
            let sent = if session.use_tcp {
                match md.tcp.get_or_connect(dest, connect_timeout) {
                    Ok(corner) => {
                        corner.queue_write(handle, session.frame_bytes().to_vec());
                        true
                    }
                    Err(_) => false,
                }
            } else {
                sockets.get(session.socket_slot).is_some_and(|slot| slot.socket.send_to(session.frame_bytes(), dest).is_ok())
            };
            if sent {
                stats.num_send += 1;
            }
        }
        Ok(())
    }

    fn reap_md(&self) {
        let mut md = self.md.lock();
        let mut sockets = self.sockets.lock();
        for handle in md.table.terminal_handles() {
            if let Some(session) = md.table.remove(handle) {
                sockets.release(session.socket_slot);
            }
        }
        drop(sockets);
        md.tcp.reap();
    }
}

fn as_ipv4(addr: SocketAddr) -> Option<std::net::Ipv4Addr> {
    match addr {
        SocketAddr::V4(v4) => Some(*v4.ip()),
        SocketAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::AddressingTuple;
    use crate::config::{SessionConfig, TimeoutBehaviour};

    #[test]
    fn get_interval_reflects_publication_cadence() {
        let session = Session::open(SessionConfig::default()).unwrap();
        let now = Instant::now();
        session.publish(AddressingTuple::any(1), Duration::from_millis(20), &[1, 2, 3, 4], None).unwrap();
        let interval = session.get_interval(now);
        assert!(interval <= Duration::from_millis(20));
    }

    #[test]
    fn process_delivers_published_data_to_subscriber() {
        let session = Session::open(SessionConfig::default()).unwrap();
        let com_id = 777;
        let mut addressing = AddressingTuple::any(com_id);
        addressing.destination = std::net::Ipv4Addr::LOCALHOST;
        let sub = session.subscribe(addressing, Duration::from_secs(0), TimeoutBehaviour::ZeroOut, 4).unwrap();
        let data = [9u8, 8, 7, 6];
        session.publish(addressing, Duration::from_millis(0), &data, None).unwrap();

        let mut now = Instant::now();
        for _ in 0..50 {
            session.process(now, &mut |_| {}, &mut |_| {}).unwrap();
            if session.get(sub).unwrap() == data {
                break;
            }
            now += Duration::from_millis(2);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(session.get(sub).unwrap(), data);
    }
}
