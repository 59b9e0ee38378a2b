// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session-wide socket pool (`spec.md` §4.1).
//!
//! One pool per session, shared by every publication, subscription, and MD
//! listener/session. A UDP socket is identified by its `(purpose,
//! bind_addr)` pair; a request for a slot that already exists with the same
//! pair reuses it and bumps its refcount rather than binding a second
//! socket, matching `spec.md`'s "slot reuse via refcounting". Multicast
//! group membership is refcounted independently of the slot itself, since
//! one subscriber unsubscribing from a group must not affect sibling
//! subscribers sharing the same socket.

pub mod tcp;
pub mod udp;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use crate::error::{Error, Result};

/// What a socket slot is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketPurpose {
    PdUdp,
    MdUdp,
    MdTcp,
    /// Time-stamped/sequenced PD (safety-layer) traffic, kept on its own
    /// socket so it is never head-of-line blocked behind best-effort PD.
    PdTsn,
}

/// One pooled UDP socket plus its refcounting state.
pub struct SocketSlot {
    pub purpose: SocketPurpose,
    pub bind_addr: SocketAddrV4,
    pub socket: UdpSocket,
    refcount: u32,
    multicast_refs: HashMap<Ipv4Addr, u32>,
}

impl SocketSlot {
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    #[must_use]
    pub fn multicast_refcount(&self, group: Ipv4Addr) -> u32 {
        self.multicast_refs.get(&group).copied().unwrap_or(0)
    }
}

/// Session-lifetime pool of UDP socket slots, indexed by a stable handle
/// (`Vec` slot index, left `None` on release so later handles never shift).
#[derive(Default)]
pub struct SocketPool {
    slots: Vec<Option<SocketSlot>>,
}

impl SocketPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing slot for `(purpose, bind_addr)`, or bind a fresh
    /// one. Returns the slot's stable index and bumps its refcount.
    ///
    /// # Errors
    /// Propagates [`udp::bind`]'s I/O error as [`Error::Io`].
    pub fn request(&mut self, purpose: SocketPurpose, bind_addr: SocketAddrV4) -> Result<usize> {
        if let Some(index) = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.purpose == purpose && s.bind_addr == bind_addr))
        {
            self.slots[index].as_mut().expect("matched a Some slot").refcount += 1;
            return Ok(index);
        }

        let socket = udp::bind(bind_addr)?;
        let slot = SocketSlot {
            purpose,
            bind_addr,
            socket,
            refcount: 1,
            multicast_refs: HashMap::new(),
        };

        if let Some(index) = self.slots.iter().position(Option::is_none) {
            self.slots[index] = Some(slot);
            Ok(index)
        } else {
            self.slots.push(Some(slot));
            Ok(self.slots.len() - 1)
        }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SocketSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SocketSlot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Drop one reference to slot `index`; the slot (and its socket) is torn
    /// down once its refcount reaches zero.
    pub fn release(&mut self, index: usize) {
        let Some(Some(slot)) = self.slots.get_mut(index) else { return };
        slot.refcount -= 1;
        if slot.refcount == 0 {
            self.slots[index] = None;
        }
    }

    /// Join `group` on slot `index`'s socket. Refcounted so the Nth
    /// subscriber to a group does not attempt a redundant
    /// `IP_ADD_MEMBERSHIP`, and the group is left only once the last
    /// subscriber unsubscribes.
    ///
    /// # Errors
    /// [`Error::Sock`] if `index` names no live slot, or the underlying
    /// `setsockopt` fails.
    pub fn join_multicast(&mut self, index: usize, group: Ipv4Addr, iface: Ipv4Addr) -> Result<()> {
        let Some(Some(slot)) = self.slots.get_mut(index) else {
            return Err(Error::Sock("no such socket slot".to_string()));
        };
        let refs = slot.multicast_refs.entry(group).or_insert(0);
        if *refs == 0 {
            udp::join_multicast(&slot.socket, group, iface)?;
        }
        *refs += 1;
        Ok(())
    }

    /// Drop one reference to `group` on slot `index`; the group is left on
    /// the wire only once the last reference is dropped.
    ///
    /// # Errors
    /// [`Error::Sock`] wrapping the underlying `setsockopt` failure.
    pub fn leave_multicast(&mut self, index: usize, group: Ipv4Addr, iface: Ipv4Addr) -> Result<()> {
        let Some(Some(slot)) = self.slots.get_mut(index) else {
            return Ok(());
        };
        if let Some(refs) = slot.multicast_refs.get_mut(&group) {
            *refs -= 1;
            if *refs == 0 {
                slot.multicast_refs.remove(&group);
                udp::leave_multicast(&slot.socket, group, iface)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddrV4 {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn repeated_request_reuses_slot_and_bumps_refcount() {
        let mut pool = SocketPool::new();
        let bind_addr = loopback();
        let a = pool.request(SocketPurpose::PdUdp, bind_addr).unwrap();
        let b = pool.request(SocketPurpose::PdUdp, bind_addr).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.get(a).unwrap().refcount(), 2);
    }

    #[test]
    fn different_purpose_gets_its_own_slot() {
        let mut pool = SocketPool::new();
        let bind_addr = loopback();
        let a = pool.request(SocketPurpose::PdUdp, bind_addr).unwrap();
        let b = pool.request(SocketPurpose::MdUdp, bind_addr).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn release_to_zero_frees_the_slot() {
        let mut pool = SocketPool::new();
        let bind_addr = loopback();
        let index = pool.request(SocketPurpose::PdUdp, bind_addr).unwrap();
        pool.request(SocketPurpose::PdUdp, bind_addr).unwrap();
        pool.release(index);
        assert!(pool.get(index).is_some());
        pool.release(index);
        assert!(pool.get(index).is_none());
    }

    #[test]
    fn released_slot_index_is_recycled() {
        let mut pool = SocketPool::new();
        let a = pool.request(SocketPurpose::PdUdp, loopback()).unwrap();
        pool.release(a);
        let b = pool.request(SocketPurpose::MdUdp, loopback()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn multicast_join_is_refcounted() {
        let mut pool = SocketPool::new();
        let index = pool.request(SocketPurpose::PdUdp, loopback()).unwrap();
        let group = Ipv4Addr::new(239, 1, 1, 1);
        pool.join_multicast(index, group, Ipv4Addr::UNSPECIFIED).unwrap();
        pool.join_multicast(index, group, Ipv4Addr::UNSPECIFIED).unwrap();
        assert_eq!(pool.get(index).unwrap().multicast_refcount(group), 2);
        pool.leave_multicast(index, group, Ipv4Addr::UNSPECIFIED).unwrap();
        assert_eq!(pool.get(index).unwrap().multicast_refcount(group), 1);
        pool.leave_multicast(index, group, Ipv4Addr::UNSPECIFIED).unwrap();
        assert_eq!(pool.get(index).unwrap().multicast_refcount(group), 0);
    }
}
