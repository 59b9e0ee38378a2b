// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CRC-32 (IEEE 802.3, reflected, poly `0xEDB88320`) used for both the PD/MD
//! header CRC and the trailing data CRC.
//!
//! No external `crc`/`crc32fast` crate is pulled in: the table is 1 KiB and
//! computed once at process start via [`std::sync::OnceLock`], matching the
//! teacher's preference for small hand-rolled primitives over a dependency
//! when the algorithm is this well pinned down (compare
//! `hdds`'s own `core::rt::slabpool` bitmap allocator instead of reaching for
//! a pooling crate).

use std::sync::OnceLock;

const POLY: u32 = 0xEDB8_8320;

fn table() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ POLY
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    })
}

/// Compute the CRC-32 of `data`, starting from the standard initial value.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    crc32_update(0xFFFF_FFFF, data) ^ 0xFFFF_FFFF
}

/// Fold more bytes into an in-progress CRC computation.
///
/// `state` is the raw (non-inverted) running value; callers doing a single
/// pass should prefer [`crc32`]. Exposed for header/data CRCs computed over
/// non-contiguous buffers.
#[must_use]
pub fn crc32_update(state: u32, data: &[u8]) -> u32 {
    let table = table();
    data.iter().fold(state, |crc, &byte| {
        table[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value_matches_standard_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let whole = crc32(b"the quick brown fox");
        let mut state = 0xFFFF_FFFF;
        state = crc32_update(state, b"the quick ");
        state = crc32_update(state, b"brown fox");
        assert_eq!(state ^ 0xFFFF_FFFF, whole);
    }
}
