// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! 1-Wire CRC8 and CRC16.
//!
//! Both checks are used the way Maxim parts use them: the receiver runs the
//! CRC over the data *and* the check bytes the sender appended, and accepts
//! the frame iff the register ends at a fixed residue.
//!
//! - The ROM CRC8 (polynomial `x^8 + x^5 + x^4 + 1`, reflected) ends at
//!   [`ROM_RESIDUE`] when run over all eight ROM bytes.
//! - The command CRC16 (polynomial `x^16 + x^15 + x^2 + 1`, reflected, zero
//!   initial value) ends at [`FRAME_RESIDUE`] when run over a frame followed
//!   by the inverted CRC the chip sends, least significant byte first.

use crc::Crc;
use crc::CRC_16_ARC;
use crc::CRC_8_MAXIM_DOW;

/// The Dallas/Maxim CRC8 used to protect ROM IDs.
pub static CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// The CRC16 used to protect extended command frames.
///
/// The chip transmits the one's complement of this CRC; see [`FRAME_RESIDUE`].
pub static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// The value [`CRC8`] takes over a ROM ID, including its check byte.
pub const ROM_RESIDUE: u8 = 0x00;

/// The value [`CRC16`] takes over a frame followed by its inverted check
/// bytes.
pub const FRAME_RESIDUE: u16 = 0xb001;

/// Computes the CRC8 of `bytes`.
pub fn crc8(bytes: &[u8]) -> u8 {
    CRC8.checksum(bytes)
}

/// Computes the CRC16 of `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Computes the two check bytes a chip appends to `bytes`, in wire order.
pub fn crc16_check_bytes(bytes: &[u8]) -> [u8; 2] {
    (!crc16(bytes)).to_le_bytes()
}

/// An incremental CRC16, for frames that are assembled one byte at a time
/// off the wire.
pub struct Crc16Digest {
    inner: crc::Digest<'static, u16>,
}

impl Crc16Digest {
    /// Starts a new digest.
    pub fn new() -> Self {
        Self {
            inner: CRC16.digest(),
        }
    }

    /// Feeds `bytes` into the digest.
    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Returns the final register value.
    pub fn finalize(self) -> u16 {
        self.inner.finalize()
    }

    /// Returns whether the bytes fed so far end at [`FRAME_RESIDUE`].
    pub fn is_residue(self) -> bool {
        self.finalize() == FRAME_RESIDUE
    }
}

impl Default for Crc16Digest {
    fn default() -> Self {
        Self::new()
    }
}
