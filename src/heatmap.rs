// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The temperature/charge heatmap's packed storage format.
//!
//! The heatmap is [`LEN`] twelve-bit buckets. Each pair of buckets `(a, b)`
//! is stored as three bytes,
//!
//! ```text
//! a[11:4]  |  a[3:0] b[11:8]  |  b[7:0]
//! ```
//!
//! and the 32 resulting triples fill three pages back to back. Triples are
//! not aligned to pages: pair 10 and pair 21 straddle the page boundaries.

use crate::device::PAGE_LEN;

/// The number of buckets.
pub const LEN: usize = 64;

/// The largest value a bucket can hold.
pub const MAX: u16 = 0x0fff;

/// The packed size, in bytes.
pub const PACKED_LEN: usize = LEN / 2 * 3;

/// The packed heatmap, page by page.
pub type Packed = [[u8; PAGE_LEN]; 3];

/// Clamps `value` to [`MAX`].
pub fn clamp(value: u32) -> u16 {
    value.min(MAX as u32) as u16
}

/// Packs `values` into three pages, clamping each value first.
pub fn pack(values: &[u32; LEN]) -> Packed {
    let mut flat = [0; PACKED_LEN];
    for (pair, out) in values.chunks_exact(2).zip(flat.chunks_exact_mut(3)) {
        let a = clamp(pair[0]);
        let b = clamp(pair[1]);
        out[0] = (a >> 4) as u8;
        out[1] = ((a & 0xf) << 4) as u8 | (b >> 8) as u8;
        out[2] = b as u8;
    }

    let mut pages = [[0; PAGE_LEN]; 3];
    for (page, chunk) in pages.iter_mut().zip(flat.chunks_exact(PAGE_LEN)) {
        page.copy_from_slice(chunk);
    }
    pages
}

/// Unpacks three pages into buckets.
pub fn unpack(pages: &Packed) -> [u16; LEN] {
    let mut flat = [0; PACKED_LEN];
    for (chunk, page) in flat.chunks_exact_mut(PAGE_LEN).zip(pages) {
        chunk.copy_from_slice(page);
    }

    let mut values = [0; LEN];
    for (pair, b) in values.chunks_exact_mut(2).zip(flat.chunks_exact(3)) {
        pair[0] = (b[0] as u16) << 4 | (b[1] as u16) >> 4;
        pair[1] = (b[1] as u16 & 0xf) << 8 | b[2] as u16;
    }
    values
}
