// SPDX-License-Identifier: Apache-2.0 OR MIT

//! PD wire header: encode/decode plus header and data CRC.
//!
//! Field order and widths from `spec.md` §3, confirmed against
//! `PD_HEADER_T` in the original `trdp_private.h`. All multi-byte fields are
//! big-endian. The header CRC covers every field preceding it; the data CRC
//! trails the (possibly zero-padded to a 4-byte boundary) payload.
//!
//! Deliberately hand-written field-by-field (de)serialization rather than a
//! `#[repr(C, packed)]` cast over the buffer — the REDESIGN FLAG in
//! `spec.md` §9 is binding, and this is also the only way to stay correct on
//! alignment-strict targets.

use crate::crc::crc32;
use crate::error::{Error, Result};

/// Size of the fixed PD header, in bytes.
pub const PD_HEADER_LEN: usize = 40;

/// PD frame header (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdHeader {
    pub sequence_counter: u32,
    pub protocol_version: u16,
    pub msg_type: u16,
    pub com_id: u32,
    pub etb_topo_cnt: u32,
    pub op_trn_topo_cnt: u32,
    pub dataset_length: u32,
    pub reserved: u32,
    pub reply_com_id: u32,
    pub reply_ip_addr: u32,
}

impl PdHeader {
    /// Serialize the header (without the trailing data CRC) into `out`,
    /// appending the computed header CRC as the final four bytes. `out` must
    /// be empty or the header is appended; returns the number of bytes
    /// written.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&self.sequence_counter.to_be_bytes());
        out.extend_from_slice(&self.protocol_version.to_be_bytes());
        out.extend_from_slice(&self.msg_type.to_be_bytes());
        out.extend_from_slice(&self.com_id.to_be_bytes());
        out.extend_from_slice(&self.etb_topo_cnt.to_be_bytes());
        out.extend_from_slice(&self.op_trn_topo_cnt.to_be_bytes());
        out.extend_from_slice(&self.dataset_length.to_be_bytes());
        out.extend_from_slice(&self.reserved.to_be_bytes());
        out.extend_from_slice(&self.reply_com_id.to_be_bytes());
        out.extend_from_slice(&self.reply_ip_addr.to_be_bytes());
        let crc = crc32(&out[start..]);
        out.extend_from_slice(&crc.to_be_bytes());
    }

    /// Parse a header from the front of `buf`, validating the header CRC.
    ///
    /// # Errors
    /// [`Error::Wire`] if `buf` is shorter than [`PD_HEADER_LEN`],
    /// [`Error::Crc`] on header CRC mismatch.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PD_HEADER_LEN {
            return Err(Error::Wire("PD header truncated"));
        }

        let body = &buf[..PD_HEADER_LEN - 4];
        let expected_crc = u32::from_be_bytes(buf[PD_HEADER_LEN - 4..PD_HEADER_LEN].try_into().unwrap());
        if crc32(body) != expected_crc {
            return Err(Error::Crc);
        }

        let mut cur = buf;
        let sequence_counter = take_u32(&mut cur);
        let protocol_version = take_u16(&mut cur);
        let msg_type = take_u16(&mut cur);
        let com_id = take_u32(&mut cur);
        let etb_topo_cnt = take_u32(&mut cur);
        let op_trn_topo_cnt = take_u32(&mut cur);
        let dataset_length = take_u32(&mut cur);
        let reserved = take_u32(&mut cur);
        let reply_com_id = take_u32(&mut cur);
        let reply_ip_addr = take_u32(&mut cur);

        Ok(Self {
            sequence_counter,
            protocol_version,
            msg_type,
            com_id,
            etb_topo_cnt,
            op_trn_topo_cnt,
            dataset_length,
            reserved,
            reply_com_id,
            reply_ip_addr,
        })
    }
}

fn take_u32(cur: &mut &[u8]) -> u32 {
    let (head, tail) = cur.split_at(4);
    *cur = tail;
    u32::from_be_bytes(head.try_into().unwrap())
}

fn take_u16(cur: &mut &[u8]) -> u16 {
    let (head, tail) = cur.split_at(2);
    *cur = tail;
    u16::from_be_bytes(head.try_into().unwrap())
}

/// Pad `len` up to the next 4-byte boundary.
#[must_use]
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Append zero padding to align `buf` to a 4-byte boundary, then the CRC32
/// of the (now padded) payload starting at `payload_start`.
pub fn append_data_crc(buf: &mut Vec<u8>, payload_start: usize) {
    let pad = padded_len(buf.len()) - buf.len();
    buf.resize(buf.len() + pad, 0);
    let crc = crc32(&buf[payload_start..]);
    buf.extend_from_slice(&crc.to_be_bytes());
}

/// Validate the trailing data CRC of a received frame whose payload spans
/// `[payload_start, payload_start + padded_len(dataset_length))`.
///
/// # Errors
/// [`Error::Wire`] if the frame is too short, [`Error::Crc`] on mismatch.
pub fn verify_data_crc(buf: &[u8], payload_start: usize, dataset_length: usize) -> Result<()> {
    let padded = padded_len(dataset_length);
    let crc_at = payload_start + padded;
    if buf.len() < crc_at + 4 {
        return Err(Error::Wire("PD data/CRC truncated"));
    }
    let expected = u32::from_be_bytes(buf[crc_at..crc_at + 4].try_into().unwrap());
    let actual = crc32(&buf[payload_start..crc_at]);
    if actual != expected {
        return Err(Error::Crc);
    }
    Ok(())
}

/// Overwrite the payload of an already-built frame in place and recompute
/// the trailing data CRC, without touching the header or its sequence
/// counter. Used by `put`, which replaces a publication's payload without
/// transmitting (`spec.md` §4.2).
///
/// # Errors
/// [`Error::Param`] if `data.len()` does not match the space reserved at
/// `publish` time.
pub fn rewrite_payload(
    buf: &mut [u8],
    payload_start: usize,
    dataset_length: usize,
    data: &[u8],
) -> Result<()> {
    if data.len() != dataset_length {
        return Err(Error::Param("put() payload length must match publish() length"));
    }
    let padded = padded_len(dataset_length);
    let crc_at = payload_start + padded;
    if buf.len() < crc_at + 4 {
        return Err(Error::Wire("frame too short for rewrite"));
    }

    buf[payload_start..payload_start + dataset_length].copy_from_slice(data);
    let crc = crc32(&buf[payload_start..crc_at]);
    buf[crc_at..crc_at + 4].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// Overwrite just the `sequenceCounter` field (the first four bytes) of an
/// already-built frame and recompute the header CRC, used on each send tick.
pub fn rewrite_sequence_counter(buf: &mut [u8], sequence_counter: u32) {
    buf[0..4].copy_from_slice(&sequence_counter.to_be_bytes());
    let crc = crc32(&buf[..PD_HEADER_LEN - 4]);
    buf[PD_HEADER_LEN - 4..PD_HEADER_LEN].copy_from_slice(&crc.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PdHeader {
        PdHeader {
            sequence_counter: 42,
            protocol_version: crate::config::PROTOCOL_VERSION_1_0,
            msg_type: crate::config::MsgType::PdData as u16,
            com_id: 1001,
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
            dataset_length: 8,
            reserved: 0,
            reply_com_id: 0,
            reply_ip_addr: 0,
        }
    }

    #[test]
    fn round_trips_byte_for_byte() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PD_HEADER_LEN);
        let decoded = PdHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn corrupted_header_fails_crc() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.encode(&mut buf);
        buf[0] ^= 0xFF;
        assert!(matches!(PdHeader::decode(&buf), Err(Error::Crc)));
    }

    #[test]
    fn data_crc_round_trips_with_padding() {
        let mut buf = Vec::new();
        let header = sample_header();
        header.encode(&mut buf);
        let payload_start = buf.len();
        buf.extend_from_slice(b"abc"); // 3 bytes, needs 1 pad byte
        append_data_crc(&mut buf, payload_start);
        verify_data_crc(&buf, payload_start, 3).unwrap();
    }

    #[test]
    fn rewrite_payload_updates_data_crc() {
        let mut buf = Vec::new();
        let header = sample_header();
        header.encode(&mut buf);
        let payload_start = buf.len();
        buf.extend_from_slice(b"abcd");
        append_data_crc(&mut buf, payload_start);

        rewrite_payload(&mut buf, payload_start, 4, b"zzzz").unwrap();
        verify_data_crc(&buf, payload_start, 4).unwrap();
        assert_eq!(&buf[payload_start..payload_start + 4], b"zzzz");
    }

    #[test]
    fn rewrite_payload_rejects_length_mismatch() {
        let mut buf = Vec::new();
        let header = sample_header();
        header.encode(&mut buf);
        let payload_start = buf.len();
        buf.extend_from_slice(b"abcd");
        append_data_crc(&mut buf, payload_start);

        assert!(matches!(
            rewrite_payload(&mut buf, payload_start, 4, b"abc"),
            Err(Error::Param(_))
        ));
    }

    #[test]
    fn rewrite_sequence_counter_keeps_header_valid() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.encode(&mut buf);
        rewrite_sequence_counter(&mut buf, 99);
        let decoded = PdHeader::decode(&buf).unwrap();
        assert_eq!(decoded.sequence_counter, 99);
    }

    #[test]
    fn tampered_payload_fails_data_crc() {
        let mut buf = Vec::new();
        let header = sample_header();
        header.encode(&mut buf);
        let payload_start = buf.len();
        buf.extend_from_slice(b"abcd");
        append_data_crc(&mut buf, payload_start);
        buf[payload_start] ^= 0x01;
        assert!(matches!(
            verify_data_crc(&buf, payload_start, 4),
            Err(Error::Crc)
        ));
    }
}
