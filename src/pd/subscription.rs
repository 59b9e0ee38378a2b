// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Subscription entries and the PD receive path (`spec.md` §3, §4.3).

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::addressing::AddressingTuple;
use crate::arena::{Arena, ArenaBuf};
use crate::config::TimeoutBehaviour;
use crate::error::{Error, Result};
use crate::pd::seqcount::{SeqCheck, SeqCountList};
use crate::time::Deadline;

/// Opaque handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubHandle(pub u32);

/// A subscription: cached last-good payload plus receive-supervision state.
///
/// Frame validation up through topology (`spec.md` §4.3 steps 1-3: length,
/// protocol version, header CRC, addressing match, topology match) happens
/// once per inbound datagram against the whole subscription table before a
/// candidate reaches a single `Subscription`; [`Subscription::accept`] only
/// ever sees frames already past that filter and performs the remaining
/// per-tuple steps (sequence counter, cache, deliver).
pub struct Subscription {
    pub handle: SubHandle,
    pub addressing: AddressingTuple,
    pub timeout: Duration,
    pub timeout_behaviour: TimeoutBehaviour,
    pub(crate) next_deadline: Deadline,
    pub(crate) socket_slot: usize,
    seqcounts: SeqCountList,
    cache: ArenaBuf,
    cache_len: usize,
    ever_received: bool,
    timeout_notified: bool,
    pub num_recv: u64,
}

impl Subscription {
    /// `max_len` sizes the cache buffer once, at subscribe time — the
    /// largest dataset this comId is ever expected to carry (`spec.md` §3:
    /// entries are sized once and reused for their lifetime, same as
    /// [`crate::pd::publication::Publication`]).
    ///
    /// # Errors
    /// [`Error::Mem`] if the arena has no bucket large enough for `max_len`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle: SubHandle,
        addressing: AddressingTuple,
        timeout: Duration,
        timeout_behaviour: TimeoutBehaviour,
        seqcount_initial_capacity: usize,
        socket_slot: usize,
        max_len: usize,
        arena: &mut Arena,
        now: Instant,
    ) -> Result<Self> {
        let cache = arena.alloc(max_len)?;
        Ok(Self {
            handle,
            addressing,
            timeout,
            timeout_behaviour,
            next_deadline: Deadline::after(now, timeout),
            socket_slot,
            seqcounts: SeqCountList::with_capacity(seqcount_initial_capacity),
            cache,
            cache_len: 0,
            ever_received: false,
            timeout_notified: false,
            num_recv: 0,
        })
    }

    /// Absorb a frame already past length/version/CRC/topology checks:
    /// sequence-counter dedup, cache update, and receive-deadline reset.
    ///
    /// Returns [`SeqCheck::Duplicate`] without touching the cache or
    /// deadline when the counter is not newer than the last accepted one for
    /// `(source, msg_type)`.
    ///
    /// # Errors
    /// [`Error::Packet`] if `payload` is longer than the buffer reserved at
    /// `subscribe` time.
    pub(crate) fn accept(
        &mut self,
        now: Instant,
        source: Ipv4Addr,
        msg_type: u16,
        seq: u32,
        payload: &[u8],
    ) -> Result<SeqCheck> {
        let check = self.seqcounts.check_and_update(source, msg_type, seq);
        if check == SeqCheck::Duplicate {
            return Ok(check);
        }
        if payload.len() > self.cache.len() {
            return Err(Error::Packet);
        }

        let buf = self.cache.as_mut_slice();
        buf[..payload.len()].copy_from_slice(payload);
        buf[payload.len()..].fill(0);
        self.cache_len = payload.len();
        self.ever_received = true;
        self.timeout_notified = false;
        self.next_deadline = Deadline::after(now, self.timeout);
        self.num_recv += 1;
        Ok(check)
    }

    /// Whether the receive-timeout deadline elapsed since the last frame (or
    /// since subscribe, if none has ever arrived) and has not already been
    /// reported. Fires at most once per elapsed deadline (`spec.md` §4.3).
    /// `ZeroOut` subscriptions have their cache cleared the moment this
    /// returns `true`; `KeepLast` subscriptions keep serving the stale value.
    pub(crate) fn check_timeout(&mut self, now: Instant) -> bool {
        if self.timeout_notified || !self.next_deadline.has_elapsed(now) {
            return false;
        }
        self.timeout_notified = true;
        if self.timeout_behaviour == TimeoutBehaviour::ZeroOut {
            self.cache.as_mut_slice().fill(0);
            self.cache_len = 0;
        }
        true
    }

    /// Current cached payload: all-zero after a `ZeroOut` timeout, unchanged
    /// after `KeepLast`, empty if no frame has ever been accepted.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.cache.as_slice()[..self.cache_len]
    }

    #[must_use]
    pub fn has_data(&self) -> bool {
        self.ever_received
    }

    pub(crate) fn into_cache(self) -> ArenaBuf {
        self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addressing() -> AddressingTuple {
        AddressingTuple::any(42)
    }

    fn sub(arena: &mut Arena, timeout: Duration, behaviour: TimeoutBehaviour, now: Instant) -> Subscription {
        Subscription::new(SubHandle(0), addressing(), timeout, behaviour, 4, 0, 16, arena, now).unwrap()
    }

    #[test]
    fn fresh_data_is_cached_and_delivered() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut s = sub(&mut arena, Duration::from_millis(0), TimeoutBehaviour::ZeroOut, now);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(s.accept(now, src, 1, 1, &[1, 2, 3]).unwrap(), SeqCheck::Fresh { gap: 0 });
        assert_eq!(s.data(), &[1, 2, 3]);
        assert!(s.has_data());
    }

    #[test]
    fn duplicate_does_not_overwrite_cache() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut s = sub(&mut arena, Duration::from_millis(0), TimeoutBehaviour::ZeroOut, now);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        s.accept(now, src, 1, 5, &[1, 2, 3]).unwrap();
        assert_eq!(s.accept(now, src, 1, 5, &[9, 9, 9]).unwrap(), SeqCheck::Duplicate);
        assert_eq!(s.data(), &[1, 2, 3]);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut s = sub(&mut arena, Duration::from_millis(0), TimeoutBehaviour::ZeroOut, now);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let big = vec![0u8; 17];
        assert!(matches!(s.accept(now, src, 1, 1, &big), Err(Error::Packet)));
    }

    #[test]
    fn zero_out_clears_cache_on_timeout() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut s = sub(&mut arena, Duration::from_millis(10), TimeoutBehaviour::ZeroOut, now);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        s.accept(now, src, 1, 1, &[1, 2, 3]).unwrap();
        let later = now + Duration::from_millis(11);
        assert!(s.check_timeout(later));
        assert_eq!(s.data(), &[] as &[u8]);
    }

    #[test]
    fn keep_last_preserves_cache_on_timeout() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut s = sub(&mut arena, Duration::from_millis(10), TimeoutBehaviour::KeepLast, now);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        s.accept(now, src, 1, 1, &[1, 2, 3]).unwrap();
        let later = now + Duration::from_millis(11);
        assert!(s.check_timeout(later));
        assert_eq!(s.data(), &[1, 2, 3]);
    }

    #[test]
    fn timeout_fires_exactly_once() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut s = sub(&mut arena, Duration::from_millis(10), TimeoutBehaviour::KeepLast, now);
        let later = now + Duration::from_millis(11);
        assert!(s.check_timeout(later));
        assert!(!s.check_timeout(later + Duration::from_millis(1)));
    }

    #[test]
    fn new_frame_clears_timeout_notified_flag() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut s = sub(&mut arena, Duration::from_millis(10), TimeoutBehaviour::KeepLast, now);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let later = now + Duration::from_millis(11);
        assert!(s.check_timeout(later));
        s.accept(later, src, 1, 1, &[4, 5, 6]).unwrap();
        let even_later = later + Duration::from_millis(20);
        assert!(s.check_timeout(even_later));
    }

    #[test]
    fn zero_timeout_never_supervised() {
        let mut arena = Arena::new();
        let now = Instant::now();
        let mut s = sub(&mut arena, Duration::from_millis(0), TimeoutBehaviour::ZeroOut, now);
        assert!(!s.check_timeout(now + Duration::from_secs(1_000_000)));
    }
}
