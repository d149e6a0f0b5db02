// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! A software 1-Wire master that toggles a GPIO line.
//!
//! Every slot runs inside a [`critical_section`], since the chip's timing
//! tolerances are a few microseconds and a preemption in the middle of a slot
//! corrupts the waveform. Millisecond-scale strong-pullup holds run outside
//! of it.
//!
//! Two timing profiles are provided, matching the two ways the line is
//! usually wired up:
//!
//! - [`Timing::GPIO`], for lines driven through a GPIO framework: a single
//!   sample per read slot.
//! - [`Timing::REGISTER`], for lines driven by poking bank registers
//!   directly (see [`hardware::mmio`]): tighter write slots and a seven-sample
//!   majority vote per read slot to reject glitches.
//!
//! Neither is assumed to be right for unknown hardware; both can be adjusted
//! with [`Timing::with_overrides()`].
//!
//! [`hardware::mmio`]: crate::hardware::mmio

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hardware::Delay;
use crate::hardware::Direction;
use crate::hardware::Pin;
use crate::onewire::Bus;

/// How a read slot samples the line.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Sampling {
    /// Sample once.
    Single,
    /// Sample `n` times in quick succession, and read a one only if most of
    /// the samples were high.
    Majority(u8),
}

/// Slot timing for a [`BitBang`] bus, in nanoseconds.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timing {
    /// How long the reset pulse holds the line low.
    pub reset_low_ns: u32,
    /// How long to wait after releasing the line before polling for
    /// presence.
    pub presence_wait_ns: u32,
    /// How many times to poll for a presence pulse.
    pub presence_polls: u32,
    /// Spacing between presence polls.
    pub presence_poll_ns: u32,
    /// How long to wait for the presence pulse to end before idling the line.
    pub reset_recovery_ns: u32,

    /// Width of the low pulse that opens a write slot.
    pub write_low_ns: u32,
    /// How long the data-dependent part of a write slot lasts.
    pub write_slot_ns: u32,
    /// Idle time after every write slot.
    pub write_recovery_ns: u32,

    /// Width of the low pulse that opens a read slot.
    pub read_low_ns: u32,
    /// How long to wait after releasing the line before sampling.
    pub read_sample_ns: u32,
    /// Spacing between samples, when sampling more than once.
    pub sample_interval_ns: u32,
    /// Idle time after every read slot.
    pub read_recovery_ns: u32,

    /// How read slots are sampled.
    pub sampling: Sampling,
}

impl Timing {
    /// Timing for lines driven through a GPIO framework.
    pub const GPIO: Self = Self {
        reset_low_ns: 54_000,
        presence_wait_ns: 1_000,
        presence_polls: 12,
        presence_poll_ns: 900,
        reset_recovery_ns: 40_000,

        write_low_ns: 1_000,
        write_slot_ns: 10_000,
        write_recovery_ns: 5_000,

        read_low_ns: 1_000,
        read_sample_ns: 1_000,
        sample_interval_ns: 0,
        read_recovery_ns: 10_000,

        sampling: Sampling::Single,
    };

    /// Timing for lines driven by writing GPIO bank registers directly.
    pub const REGISTER: Self = Self {
        reset_low_ns: 54_000,
        presence_wait_ns: 1_000,
        presence_polls: 12,
        presence_poll_ns: 900,
        reset_recovery_ns: 40_000,

        write_low_ns: 3_000,
        write_slot_ns: 8_000,
        write_recovery_ns: 6_000,

        read_low_ns: 1_000,
        read_sample_ns: 500,
        sample_interval_ns: 150,
        read_recovery_ns: 8_000,

        sampling: Sampling::Majority(7),
    };

    /// Applies the per-board read and write delay overrides.
    ///
    /// A zero leaves the corresponding value alone. `read_ns` replaces the
    /// wait before sampling a read slot; `write_ns` replaces the width of the
    /// low pulse opening a write slot.
    pub fn with_overrides(mut self, read_ns: u32, write_ns: u32) -> Self {
        if read_ns != 0 {
            self.read_sample_ns = read_ns;
        }
        if write_ns != 0 {
            self.write_low_ns = write_ns;
        }
        self
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::GPIO
    }
}

/// A [`Bus`] bit-banged over a [`Pin`].
pub struct BitBang<P, D> {
    pin: P,
    delay: D,
    timing: Timing,
}

impl<P: Pin, D: Delay> BitBang<P, D> {
    /// Creates a new bus over `pin`, idling the line high.
    pub fn new(pin: P, delay: D, timing: Timing) -> Self {
        let mut bus = Self { pin, delay, timing };
        bus.drive(true);
        bus
    }

    /// Returns the current timing profile.
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Replaces the timing profile.
    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    /// Returns the underlying line, for raw engineering access.
    pub fn pin_mut(&mut self) -> &mut P {
        &mut self.pin
    }

    /// Tears this bus down into its parts.
    pub fn into_inner(self) -> (P, D) {
        (self.pin, self.delay)
    }

    fn drive(&mut self, high: bool) {
        if self.pin.direction() != Direction::Output {
            self.pin.set_direction(Direction::Output);
        }
        self.pin.write(high);
    }

    fn release(&mut self) {
        self.pin.set_direction(Direction::Input);
    }

    fn sample(&mut self) -> bool {
        match self.timing.sampling {
            Sampling::Single => self.pin.read(),
            Sampling::Majority(n) => {
                let mut highs = 0;
                for i in 0..n {
                    if i != 0 {
                        self.delay.delay_ns(self.timing.sample_interval_ns);
                    }
                    if self.pin.read() {
                        highs += 1;
                    }
                }
                highs * 2 > n
            }
        }
    }
}

impl<P: Pin, D: Delay> Bus for BitBang<P, D> {
    fn reset(&mut self) -> bool {
        let t = self.timing;
        critical_section::with(|_| {
            self.drive(false);
            self.delay.delay_ns(t.reset_low_ns);
            self.release();
            self.delay.delay_ns(t.presence_wait_ns);

            let mut present = false;
            for _ in 0..t.presence_polls {
                if !self.pin.read() {
                    present = true;
                    break;
                }
                self.delay.delay_ns(t.presence_poll_ns);
            }

            self.delay.delay_ns(t.reset_recovery_ns);
            self.drive(true);
            present
        })
    }

    fn write_bit(&mut self, bit: bool) {
        let t = self.timing;
        critical_section::with(|_| {
            self.drive(false);
            self.delay.delay_ns(t.write_low_ns);
            if bit {
                self.drive(true);
            }
            self.delay.delay_ns(t.write_slot_ns);
            self.drive(true);
            self.delay.delay_ns(t.write_recovery_ns);
        })
    }

    fn read_bit(&mut self) -> bool {
        let t = self.timing;
        critical_section::with(|_| {
            self.drive(false);
            self.delay.delay_ns(t.read_low_ns);
            self.release();
            self.delay.delay_ns(t.read_sample_ns);
            let bit = self.sample();
            self.drive(true);
            self.delay.delay_ns(t.read_recovery_ns);
            bit
        })
    }

    fn strong_pullup(&mut self, ms: u32) {
        self.drive(true);
        self.delay.delay_ms(ms);
    }
}
