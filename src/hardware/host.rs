// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Hosted implementations of [`Delay`] and [`Clock`].
//!
//! Requires the `std` feature flag to be enabled.

use std::thread;
use std::time::Duration;
use std::time::Instant;

use crate::hardware::Clock;
use crate::hardware::Delay;

/// A [`Delay`] that spins on [`Instant`] for sub-millisecond waits and
/// sleeps the calling thread for whole milliseconds.
///
/// Millisecond waits are only ever requested between bit slots, outside the
/// critical section, so giving up the CPU there does not disturb timing.
#[derive(Default)]
pub struct SpinDelay {
    _priv: (),
}

impl SpinDelay {
    /// Creates a new `SpinDelay`.
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl Delay for SpinDelay {
    fn delay_ns(&mut self, ns: u32) {
        let deadline = Instant::now() + Duration::from_nanos(ns as u64);
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }

    fn delay_us(&mut self, us: u32) {
        let deadline = Instant::now() + Duration::from_micros(us as u64);
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// A [`Clock`] backed by [`Instant`], counting from its own creation.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a new clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}
