// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Publication entries and the PD send path (`spec.md` §3, §4.2).

use std::time::{Duration, Instant};

use crate::addressing::AddressingTuple;
use crate::arena::ArenaBuf;
use crate::error::{Error, Result};
use crate::pd::header::{self, PdHeader, PD_HEADER_LEN};
use crate::time::Deadline;

/// Opaque handle returned by `publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PubHandle(pub u32);

crate::bitflags_u8! {
    /// Publication flag set (`spec.md` §3).
    pub struct PubFlags {
        /// Time-stamped/sequenced PD with a TSN (safety) layer in front.
        const TSN = 0b0000_0001;
        /// Payload is passed through the pluggable marshaller before sending.
        const MARSHALLED = 0b0000_0010;
        /// This publication's socket slot has an active multicast join.
        const MULTICAST_JOINED = 0b0000_0100;
        /// Part of a redundancy group and this session is not the leader:
        /// transmission is suppressed but sequencing still advances.
        const REDUNDANCY_SUPPRESSED = 0b0000_1000;
        /// A PD Request is outstanding and awaiting a Pull reply.
        const REQUEST_PENDING = 0b0001_0000;
    }
}

/// A publication: an owned frame buffer plus scheduling state.
pub struct Publication {
    pub handle: PubHandle,
    pub addressing: AddressingTuple,
    pub interval: Duration,
    pub(crate) next_deadline: Deadline,
    pub(crate) socket_slot: usize,
    pub redundancy_group: Option<u32>,
    pub flags: PubFlags,
    frame: ArenaBuf,
    payload_start: usize,
    dataset_len: usize,
    seq_counter: u32,
    pub num_send: u64,
}

impl Publication {
    /// Build a publication's frame and entry. `seed_seq` is the sequence
    /// counter to start from — `0` for a fresh `(comId, msgType, srcIP)`
    /// tuple, or the current value of an existing publication sharing the
    /// tuple (redundancy group failover keeps sequencing continuous,
    /// `spec.md` §4.6).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle: PubHandle,
        addressing: AddressingTuple,
        interval: Duration,
        now: Instant,
        socket_slot: usize,
        redundancy_group: Option<u32>,
        mut frame: ArenaBuf,
        data: &[u8],
        flags: PubFlags,
        seed_seq: u32,
    ) -> Self {
        let header = PdHeader {
            sequence_counter: seed_seq,
            protocol_version: crate::config::PROTOCOL_VERSION_1_0,
            msg_type: crate::config::MsgType::PdData as u16,
            com_id: addressing.com_id,
            etb_topo_cnt: addressing.etb_topo_cnt,
            op_trn_topo_cnt: addressing.op_trn_topo_cnt,
            dataset_length: data.len() as u32,
            reserved: 0,
            reply_com_id: 0,
            reply_ip_addr: 0,
        };

        let mut bytes = Vec::with_capacity(frame.len());
        header.encode(&mut bytes);
        let payload_start = bytes.len();
        bytes.extend_from_slice(data);
        header::append_data_crc(&mut bytes, payload_start);
        frame.as_mut_slice()[..bytes.len()].copy_from_slice(&bytes);

        Self {
            handle,
            addressing,
            interval,
            next_deadline: Deadline::after(now, interval),
            socket_slot,
            redundancy_group,
            flags,
            frame,
            payload_start,
            dataset_len: data.len(),
            seq_counter: seed_seq,
            num_send: 0,
        }
    }

    /// Replace the payload without transmitting (`spec.md` §4.2).
    ///
    /// # Errors
    /// [`Error::Param`] if `data.len()` differs from the length given to
    /// `publish` (buffers are sized once, at publish time).
    pub fn put(&mut self, data: &[u8]) -> Result<()> {
        header::rewrite_payload(
            self.frame.as_mut_slice(),
            self.payload_start,
            self.dataset_len,
            data,
        )
    }

    /// Bytes to send on this tick: advances the sequence counter and
    /// recomputes the header CRC, returning the full frame. Caller still
    /// decides whether to actually transmit (redundancy suppression).
    pub(crate) fn tick_frame(&mut self) -> &[u8] {
        self.seq_counter = self.seq_counter.wrapping_add(1);
        header::rewrite_sequence_counter(self.frame.as_mut_slice(), self.seq_counter);
        self.frame.as_slice()
    }

    #[must_use]
    pub fn seq_counter(&self) -> u32 {
        self.seq_counter
    }

    pub(crate) fn into_frame(self) -> ArenaBuf {
        self.frame
    }

    #[must_use]
    pub fn dataset_len(&self) -> usize {
        self.dataset_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn addressing() -> AddressingTuple {
        AddressingTuple::any(42)
    }

    #[test]
    fn publish_seeds_sequence_counter() {
        let mut arena = Arena::new();
        let frame = arena.alloc(PD_HEADER_LEN + 8 + 4).unwrap();
        let now = Instant::now();
        let pubn = Publication::new(
            PubHandle(0),
            addressing(),
            Duration::from_millis(100),
            now,
            0,
            None,
            frame,
            &[1, 2, 3, 4],
            PubFlags::NONE,
            7,
        );
        assert_eq!(pubn.seq_counter(), 7);
    }

    #[test]
    fn tick_frame_advances_sequence_counter() {
        let mut arena = Arena::new();
        let frame = arena.alloc(PD_HEADER_LEN + 4 + 4).unwrap();
        let now = Instant::now();
        let mut pubn = Publication::new(
            PubHandle(0),
            addressing(),
            Duration::from_millis(100),
            now,
            0,
            None,
            frame,
            &[1, 2, 3, 4],
            PubFlags::NONE,
            0,
        );
        let _ = pubn.tick_frame();
        assert_eq!(pubn.seq_counter(), 1);
        let _ = pubn.tick_frame();
        assert_eq!(pubn.seq_counter(), 2);
    }

    #[test]
    fn put_rejects_length_change() {
        let mut arena = Arena::new();
        let frame = arena.alloc(PD_HEADER_LEN + 4 + 4).unwrap();
        let now = Instant::now();
        let mut pubn = Publication::new(
            PubHandle(0),
            addressing(),
            Duration::from_millis(100),
            now,
            0,
            None,
            frame,
            &[1, 2, 3, 4],
            PubFlags::NONE,
            0,
        );
        assert!(matches!(pubn.put(&[1, 2, 3]), Err(Error::Param(_))));
        assert!(pubn.put(&[9, 9, 9, 9]).is_ok());
    }
}
