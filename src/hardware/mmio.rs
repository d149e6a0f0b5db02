// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Register-mapped GPIO.
//!
//! Some platforms are too slow to bit-bang through their GPIO framework, so
//! the line is driven by poking the GPIO bank's control and data registers
//! directly. A bank is described by a [`Layout`]: the offsets of the two
//! registers from the bank base, and the bit position of this pin's field in
//! each.
//!
//! The control field is a 4-bit function selector (`0x0` input, `0x1`
//! output); the data field is a single bit.

use static_assertions::assert_obj_safe;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hardware::Direction;
use crate::hardware::Pin;

/// A window of 32-bit device registers.
pub trait Registers {
    /// Reads the register at byte offset `offset`.
    fn read(&mut self, offset: u32) -> u32;

    /// Writes `value` to the register at byte offset `offset`.
    fn write(&mut self, offset: u32, value: u32);
}
assert_obj_safe!(Registers);

/// Where a pin's control and data fields live within a GPIO bank.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Layout {
    /// Offset of the control (function select) register.
    pub control_offset: u32,
    /// Offset of the data register.
    pub data_offset: u32,
    /// Bit position of the low bit of this pin's control field.
    pub control_bit: u32,
    /// Bit position of this pin's data bit.
    pub data_bit: u32,
}

const FUNC_MASK: u32 = 0xf;
const FUNC_INPUT: u32 = 0x0;
const FUNC_OUTPUT: u32 = 0x1;

/// A [`Pin`] driven through a [`Registers`] window.
pub struct MmioPin<R> {
    regs: R,
    layout: Layout,
    direction: Direction,
}

impl<R: Registers> MmioPin<R> {
    /// Creates a new pin over `regs`, and switches it to an output.
    pub fn new(regs: R, layout: Layout) -> Self {
        let mut pin = Self {
            regs,
            layout,
            direction: Direction::Input,
        };
        pin.set_direction(Direction::Output);
        pin
    }

    /// Returns the layout this pin was created with.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    fn update(&mut self, offset: u32, mask: u32, value: u32) {
        let reg = self.regs.read(offset);
        self.regs.write(offset, (reg & !mask) | (value & mask));
    }
}

impl<R: Registers> Pin for MmioPin<R> {
    fn set_direction(&mut self, direction: Direction) {
        let func = match direction {
            Direction::Input => FUNC_INPUT,
            Direction::Output => FUNC_OUTPUT,
        };
        let shift = self.layout.control_bit;
        self.update(
            self.layout.control_offset,
            FUNC_MASK << shift,
            func << shift,
        );
        self.direction = direction;
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn write(&mut self, high: bool) {
        let bit = 1 << self.layout.data_bit;
        self.update(self.layout.data_offset, bit, if high { bit } else { 0 });
    }

    fn read(&mut self) -> bool {
        // While driving, the data register reflects the output latch rather
        // than the pad, which is still what the line is at.
        let bit = 1 << self.layout.data_bit;
        self.regs.read(self.layout.data_offset) & bit != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeRegs(HashMap<u32, u32>);

    impl Registers for FakeRegs {
        fn read(&mut self, offset: u32) -> u32 {
            self.0.get(&offset).copied().unwrap_or(0)
        }
        fn write(&mut self, offset: u32, value: u32) {
            self.0.insert(offset, value);
        }
    }

    const LAYOUT: Layout = Layout {
        control_offset: 0x20,
        data_offset: 0x24,
        control_bit: 8,
        data_bit: 2,
    };

    #[test]
    fn direction_touches_only_own_field() {
        let mut regs = FakeRegs::default();
        regs.0.insert(0x20, 0xffff_f0ff);
        let mut pin = MmioPin::new(regs, LAYOUT);
        assert_eq!(pin.direction(), Direction::Output);
        assert_eq!(pin.regs.0[&0x20], 0xffff_f1ff);

        pin.set_direction(Direction::Input);
        assert_eq!(pin.direction(), Direction::Input);
        assert_eq!(pin.regs.0[&0x20], 0xffff_f0ff);
    }

    #[test]
    fn data_bit() {
        let mut regs = FakeRegs::default();
        regs.0.insert(0x24, 0b1001);
        let mut pin = MmioPin::new(regs, LAYOUT);

        pin.write(true);
        assert_eq!(pin.regs.0[&0x24], 0b1101);
        assert!(pin.read());

        pin.write(false);
        assert_eq!(pin.regs.0[&0x24], 0b1001);
        assert!(!pin.read());
    }
}
