// SPDX-License-Identifier: Apache-2.0 OR MIT

//! MD wire header: encode/decode plus header and data CRC (`spec.md` §3).
//!
//! Same leading fields as [`crate::pd::header::PdHeader`] through
//! `datasetLength`, followed by the fields unique to a transactional
//! exchange: reply status, session UUID, reply timeout, and the two URIs.
//! Confirmed against `MD_HEADER_T` in the original `trdp_private.h`: 116
//! bytes total, big-endian, header CRC over everything preceding it.

use crate::crc::crc32;
use crate::error::{Error, Result};

/// Size of the fixed MD header, in bytes.
pub const MD_HEADER_LEN: usize = 116;

/// Length of a source/destination URI field, null-padded.
pub const URI_LEN: usize = 32;

/// MD frame header (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MdHeader {
    pub sequence_counter: u32,
    pub protocol_version: u16,
    pub msg_type: u16,
    pub com_id: u32,
    pub etb_topo_cnt: u32,
    pub op_trn_topo_cnt: u32,
    pub dataset_length: u32,
    pub reply_status: i32,
    pub session_id: u128,
    pub reply_timeout: u32,
    pub source_uri: [u8; URI_LEN],
    pub destination_uri: [u8; URI_LEN],
}

impl MdHeader {
    /// Serialize the header into `out`, appending the header CRC.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&self.sequence_counter.to_be_bytes());
        out.extend_from_slice(&self.protocol_version.to_be_bytes());
        out.extend_from_slice(&self.msg_type.to_be_bytes());
        out.extend_from_slice(&self.com_id.to_be_bytes());
        out.extend_from_slice(&self.etb_topo_cnt.to_be_bytes());
        out.extend_from_slice(&self.op_trn_topo_cnt.to_be_bytes());
        out.extend_from_slice(&self.dataset_length.to_be_bytes());
        out.extend_from_slice(&self.reply_status.to_be_bytes());
        out.extend_from_slice(&self.session_id.to_be_bytes()[..16]);
        out.extend_from_slice(&self.reply_timeout.to_be_bytes());
        out.extend_from_slice(&self.source_uri);
        out.extend_from_slice(&self.destination_uri);
        let crc = crc32(&out[start..]);
        out.extend_from_slice(&crc.to_be_bytes());
    }

    /// Parse a header from the front of `buf`, validating the header CRC.
    ///
    /// # Errors
    /// [`Error::Wire`] if `buf` is shorter than [`MD_HEADER_LEN`],
    /// [`Error::Crc`] on header CRC mismatch.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < MD_HEADER_LEN {
            return Err(Error::Wire("MD header truncated"));
        }

        let body = &buf[..MD_HEADER_LEN - 4];
        let expected_crc = u32::from_be_bytes(buf[MD_HEADER_LEN - 4..MD_HEADER_LEN].try_into().unwrap());
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
        let reply_status = i32::from_be_bytes(take_bytes::<4>(&mut cur));
        let session_id = u128::from_be_bytes(take_bytes::<16>(&mut cur));
        let reply_timeout = take_u32(&mut cur);
        let source_uri = take_bytes::<URI_LEN>(&mut cur);
        let destination_uri = take_bytes::<URI_LEN>(&mut cur);

        Ok(Self {
            sequence_counter,
            protocol_version,
            msg_type,
            com_id,
            etb_topo_cnt,
            op_trn_topo_cnt,
            dataset_length,
            reply_status,
            session_id,
            reply_timeout,
            source_uri,
            destination_uri,
        })
    }
}

fn take_u32(cur: &mut &[u8]) -> u32 {
    u32::from_be_bytes(take_bytes::<4>(cur))
}

fn take_u16(cur: &mut &[u8]) -> u16 {
    u16::from_be_bytes(take_bytes::<2>(cur))
}

fn take_bytes<const N: usize>(cur: &mut &[u8]) -> [u8; N] {
    let (head, tail) = cur.split_at(N);
    *cur = tail;
    head.try_into().unwrap()
}

/// Encode a URI string into a null-padded, truncated-if-needed fixed field.
#[must_use]
pub fn encode_uri(uri: &str) -> [u8; URI_LEN] {
    let mut field = [0u8; URI_LEN];
    let bytes = uri.as_bytes();
    let n = bytes.len().min(URI_LEN);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}

/// Decode a null-padded URI field back to a string, stopping at the first NUL.
#[must_use]
pub fn decode_uri(field: &[u8; URI_LEN]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(URI_LEN);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Append zero padding to align `buf` to a 4-byte boundary, then the CRC32
/// of the (now padded) payload starting at `payload_start`.
pub fn append_data_crc(buf: &mut Vec<u8>, payload_start: usize) {
    let pad = crate::pd::header::padded_len(buf.len()) - buf.len();
    buf.resize(buf.len() + pad, 0);
    let crc = crc32(&buf[payload_start..]);
    buf.extend_from_slice(&crc.to_be_bytes());
}

/// Validate the trailing data CRC of a received frame.
///
/// # Errors
/// [`Error::Wire`] if the frame is too short, [`Error::Crc`] on mismatch.
pub fn verify_data_crc(buf: &[u8], payload_start: usize, dataset_length: usize) -> Result<()> {
    let padded = crate::pd::header::padded_len(dataset_length);
    let crc_at = payload_start + padded;
    if buf.len() < crc_at + 4 {
        return Err(Error::Wire("MD data/CRC truncated"));
    }
    let expected = u32::from_be_bytes(buf[crc_at..crc_at + 4].try_into().unwrap());
    let actual = crc32(&buf[payload_start..crc_at]);
    if actual != expected {
        return Err(Error::Crc);
    }
    Ok(())
}
