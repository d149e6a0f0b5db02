// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable hardware functionality
//!
//! This module provides traits for plugging in the platform pieces the 1-Wire
//! driver needs: a single open-drain GPIO line, a busy-wait delay source, a
//! monotonic clock, and the charger's current status.

use core::time::Duration;

use static_assertions::assert_obj_safe;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "std")]
pub mod host;
pub mod mmio;

/// The direction a GPIO line is configured for.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    /// The line is released and sampled.
    Input,
    /// The line is actively driven.
    Output,
}

/// A single GPIO line.
///
/// The 1-Wire bus is open-drain with an external pull-up: "releasing" the line
/// means switching it to [`Direction::Input`], after which it reads high
/// unless the chip pulls it low.
pub trait Pin {
    /// Switches the line direction.
    fn set_direction(&mut self, direction: Direction);

    /// Returns the direction the line was last switched to.
    fn direction(&self) -> Direction;

    /// Drives the line. Only meaningful while the line is an output.
    fn write(&mut self, high: bool);

    /// Samples the line level.
    fn read(&mut self) -> bool;
}
assert_obj_safe!(Pin);

impl<P: Pin + ?Sized> Pin for &'_ mut P {
    fn set_direction(&mut self, direction: Direction) {
        P::set_direction(*self, direction)
    }

    fn direction(&self) -> Direction {
        P::direction(*self)
    }

    fn write(&mut self, high: bool) {
        P::write(*self, high)
    }

    fn read(&mut self) -> bool {
        P::read(*self)
    }
}

/// A source of blocking delays.
///
/// Implementations are expected to busy-wait: bit slots are only a few
/// microseconds wide, far below any scheduler's resolution.
pub trait Delay {
    /// Blocks for at least `ns` nanoseconds.
    fn delay_ns(&mut self, ns: u32);

    /// Blocks for at least `us` microseconds.
    fn delay_us(&mut self, us: u32) {
        for _ in 0..us {
            self.delay_ns(1_000);
        }
    }

    /// Blocks for at least `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1_000);
        }
    }
}
assert_obj_safe!(Delay);

impl<D: Delay + ?Sized> Delay for &'_ mut D {
    fn delay_ns(&mut self, ns: u32) {
        D::delay_ns(*self, ns)
    }

    fn delay_us(&mut self, us: u32) {
        D::delay_us(*self, us)
    }

    fn delay_ms(&mut self, ms: u32) {
        D::delay_ms(*self, ms)
    }
}

/// A monotonic clock.
pub trait Clock {
    /// Returns the time elapsed since some fixed, unspecified origin.
    fn now(&self) -> Duration;
}
assert_obj_safe!(Clock);

/// What the charger is currently doing with the battery.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChargeState {
    /// The battery is being charged.
    Charging,
    /// The battery is full and held at top-of-charge.
    Full,
    /// The battery is discharging.
    Discharging,
    /// The charger is present but not charging.
    NotCharging,
    /// The charger did not report a state.
    Unknown,
}

impl ChargeState {
    /// Returns whether this state counts as "on the charger" for flush
    /// scheduling purposes.
    pub fn is_on_charger(self) -> bool {
        matches!(self, Self::Charging | Self::Full)
    }
}

/// Provides the charger status.
pub trait PowerSupply {
    /// Returns the charger's current state.
    fn charge_state(&self) -> ChargeState;
}
assert_obj_safe!(PowerSupply);
