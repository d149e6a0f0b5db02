// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The 1-Wire link layer.
//!
//! A [`Bus`] provides the three timed primitives (reset/presence, write
//! slot, read slot) plus a way to hold the line high while the chip draws
//! power from it. Everything byte-shaped is built on top of those by the
//! blanket [`Link`] extension: LSB-first bytes, Skip-ROM, and Read-ROM with
//! its CRC8 check.
//!
//! Presence pulses are flaky on bit-banged lines, so ROM selection is retried
//! [`RETRIES`] times before a caller sees a failure.

use static_assertions::assert_obj_safe;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::crc;

pub mod bitbang;

/// How many times ROM selection and presence detection are attempted.
pub const RETRIES: usize = 10;

/// ROM command addressing the only device on the bus.
pub const SKIP_ROM: u8 = 0xcc;

/// ROM command reading back the 8-byte ROM ID.
pub const READ_ROM: u8 = 0x33;

/// Errors from the link layer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// No device answered the reset with a presence pulse.
    NoPresence,
    /// The ROM ID failed its CRC8 check.
    RomCrc,
    /// The ROM ID passed its CRC8 check, but has a zero family code.
    BlankFamily,
}

/// A 1-Wire bus master.
///
/// Implementations own the line for as long as they exist. Slots must not be
/// interleaved with anything else talking on the same line.
pub trait Bus {
    /// Issues a reset pulse and returns whether a device answered with a
    /// presence pulse.
    fn reset(&mut self) -> bool;

    /// Generates a single write slot.
    fn write_bit(&mut self, bit: bool);

    /// Generates a single read slot and returns the sampled bit.
    fn read_bit(&mut self) -> bool;

    /// Drives the line high for `ms` milliseconds, powering the chip while it
    /// programs EEPROM or computes a signature.
    fn strong_pullup(&mut self, ms: u32);

    /// Writes a byte, least significant bit first.
    fn write_byte(&mut self, byte: u8) {
        for i in 0..8 {
            self.write_bit((byte >> i) & 1 == 1);
        }
    }

    /// Reads a byte, least significant bit first.
    fn read_byte(&mut self) -> u8 {
        let mut byte = 0;
        for i in 0..8 {
            if self.read_bit() {
                byte |= 1 << i;
            }
        }
        byte
    }
}
assert_obj_safe!(Bus);

impl<B: Bus + ?Sized> Bus for &'_ mut B {
    fn reset(&mut self) -> bool {
        B::reset(*self)
    }

    fn write_bit(&mut self, bit: bool) {
        B::write_bit(*self, bit)
    }

    fn read_bit(&mut self) -> bool {
        B::read_bit(*self)
    }

    fn strong_pullup(&mut self, ms: u32) {
        B::strong_pullup(*self, ms)
    }

    fn write_byte(&mut self, byte: u8) {
        B::write_byte(*self, byte)
    }

    fn read_byte(&mut self) -> u8 {
        B::read_byte(*self)
    }
}

/// An 8-byte 1-Wire ROM ID.
///
/// Byte 0 is the family code, bytes 1 through 6 are the serial number, and
/// byte 7 is the CRC8 of the rest.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RomId([u8; 8]);

impl RomId {
    /// The all-zero ROM ID, standing in for "not read yet".
    pub const BLANK: Self = Self([0; 8]);

    /// Parses a ROM ID, checking its CRC8 and family code.
    pub fn new(bytes: [u8; 8]) -> Result<Self, Error> {
        if crc::crc8(&bytes) != crc::ROM_RESIDUE {
            return Err(Error::RomCrc);
        }
        if bytes[0] == 0 {
            return Err(Error::BlankFamily);
        }
        Ok(Self(bytes))
    }

    /// Wraps `bytes` without checking them.
    pub const fn from_raw(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Returns the family code.
    pub fn family(&self) -> u8 {
        self.0[0]
    }

    /// Returns the 12-bit customer ID Maxim programs into the top of the
    /// serial number.
    pub fn customer_id(&self) -> u16 {
        ((self.0[6] as u16) << 4) | ((self.0[5] as u16 & 0xf0) >> 4)
    }

    /// Returns whether this is [`RomId::BLANK`].
    pub fn is_blank(&self) -> bool {
        self.0 == [0; 8]
    }
}

impl core::fmt::Debug for RomId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "RomId(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// Byte-level and ROM-level operations, available on every [`Bus`].
pub trait Link: Bus {
    /// Checks for a device, retrying the reset up to [`RETRIES`] times.
    fn detect(&mut self) -> bool {
        for attempt in 0..RETRIES {
            if self.reset() {
                trace!("presence detected on attempt {}", attempt);
                return true;
            }
        }
        warn!("no presence pulse after {} resets", RETRIES);
        false
    }

    /// Resets the bus and addresses the only device on it.
    fn skip_rom(&mut self) -> crate::Result<(), Error> {
        for _ in 0..RETRIES {
            if self.reset() {
                self.write_byte(SKIP_ROM);
                return Ok(());
            }
        }
        Err(fail!(Error::NoPresence))
    }

    /// Resets the bus and reads the ROM ID of the only device on it.
    ///
    /// Attempts whose ROM ID fails the CRC8 check are retried like missed
    /// presence pulses; the last failure is returned.
    fn read_rom(&mut self) -> crate::Result<RomId, Error> {
        let mut last = Error::NoPresence;
        for _ in 0..RETRIES {
            if !self.reset() {
                last = Error::NoPresence;
                continue;
            }
            self.write_byte(READ_ROM);

            let mut bytes = [0; 8];
            for b in &mut bytes {
                *b = self.read_byte();
            }
            match RomId::new(bytes) {
                Ok(rom) => return Ok(rom),
                Err(e) => {
                    warn!("read_rom: rejected {:02x?}: {:?}", bytes, e);
                    last = e;
                }
            }
        }
        Err(fail!(last))
    }
}

impl<B: Bus + ?Sized> Link for B {}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;

    /// A byte-level fake bus: records what the host writes and plays back a
    /// queue of bytes for reads, one queue per reset.
    #[derive(Default)]
    pub struct Bus {
        pub presence: VecDeque<bool>,
        pub replies: VecDeque<Vec<u8>>,
        pub written: Vec<u8>,
        pub resets: usize,
        pub pullups: Vec<u32>,
        tx: VecDeque<u8>,
        rx: u8,
        rx_bits: u8,
        tx_bits: u8,
    }

    impl super::Bus for Bus {
        fn reset(&mut self) -> bool {
            self.resets += 1;
            self.rx_bits = 0;
            self.tx_bits = 0;
            let present = self.presence.pop_front().unwrap_or(true);
            self.tx = if present {
                self.replies.pop_front().unwrap_or_default().into()
            } else {
                VecDeque::new()
            };
            present
        }

        fn write_bit(&mut self, bit: bool) {
            self.rx |= (bit as u8) << self.rx_bits;
            self.rx_bits += 1;
            if self.rx_bits == 8 {
                self.written.push(self.rx);
                self.rx = 0;
                self.rx_bits = 0;
            }
        }

        fn read_bit(&mut self) -> bool {
            let byte = match self.tx.front() {
                Some(b) => *b,
                None => return true,
            };
            let bit = (byte >> self.tx_bits) & 1 == 1;
            self.tx_bits += 1;
            if self.tx_bits == 8 {
                self.tx.pop_front();
                self.tx_bits = 0;
            }
            bit
        }

        fn strong_pullup(&mut self, ms: u32) {
            self.pullups.push(ms);
        }
    }
}
