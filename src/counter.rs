// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The chip's decrement counter, and its shadow.
//!
//! The counter is a 24-bit value stored least significant byte first in
//! [`page::DECREMENT_COUNTER`]. It can be programmed once and then only ever
//! counts down. The host keeps it in step with the battery's accumulated
//! discharge, one decrement per hundred discharge-level units.
//!
//! The shadow value only ever changes to a value the chip confirmed, and it
//! never increases.

use crate::device::page;
use crate::device::Ds28e30;
use crate::device::PAGE_LEN;
use crate::onewire::Bus;
use crate::xpc;

/// The value a blank counter is programmed with.
pub const FACTORY_DEFAULT: u32 = 100_000;

/// The ceiling assumed for counters reading above their configured maximum.
///
/// Early samples were programmed with the largest 17-bit value.
pub const CEILING: u32 = 0x1_ffff;

/// The most decrements issued by one [`DecrementCounter::sync()`].
pub const BATCH: u32 = 5;

/// Discharge-level units per decrement.
pub const LEVEL_PER_DECREMENT: u32 = 100;

/// Errors from counter operations.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// The chip reported an error.
    Device(xpc::Error),
    /// The shadow has not been loaded from the chip.
    NotInitialized,
    /// The chip never confirmed the decrement.
    Unconfirmed,
}

impl From<xpc::Error> for Error {
    fn from(e: xpc::Error) -> Self {
        Self::Device(e)
    }
}
debug_from!(Error => xpc::Error);

/// Decodes the counter page.
pub fn decode(page: &[u8; PAGE_LEN]) -> u32 {
    u32::from_le_bytes([page[0], page[1], page[2], 0])
}

/// Encodes a counter page programming `value`.
pub fn encode(value: u32) -> [u8; PAGE_LEN] {
    let mut page = [0; PAGE_LEN];
    page[..3].copy_from_slice(&value.to_le_bytes()[..3]);
    page
}

/// Reads the chip's counter.
pub fn read<B: Bus>(dev: &mut Ds28e30<B>) -> crate::Result<u32, Error> {
    Ok(decode(&dev.read_memory(page::DECREMENT_COUNTER)?))
}

/// Programs a blank counter with `default`.
///
/// A counter reads back as an error until it is programmed. Returns whether
/// anything was written.
pub fn program_if_blank<B: Bus>(
    dev: &mut Ds28e30<B>,
    default: u32,
) -> crate::Result<bool, Error> {
    if dev.read_memory(page::DECREMENT_COUNTER).is_ok() {
        info!("decrement counter already programmed");
        return Ok(false);
    }
    info!("programming blank decrement counter to {}", default);
    dev.write_memory(page::DECREMENT_COUNTER, &encode(default))?;
    Ok(true)
}

/// The host's shadow of the decrement counter.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DecrementCounter {
    value: Option<u32>,
    max: u32,
}

impl DecrementCounter {
    /// Creates an unloaded shadow for a counter programmed with `max`.
    pub fn new(max: u32) -> Self {
        Self { value: None, max }
    }

    /// Returns the last confirmed value.
    pub fn value(&self) -> Option<u32> {
        self.value
    }

    /// Returns the value the counter was programmed with.
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Returns how many decrements have been made, if loaded.
    pub fn cycles_used(&self) -> Option<u32> {
        self.value.map(|v| self.max.saturating_sub(v))
    }

    /// Loads the shadow from the chip.
    ///
    /// A chip reading above the configured maximum was programmed with
    /// [`CEILING`]. Loading a value above a previously confirmed one is
    /// refused, since the chip cannot count up.
    pub fn load<B: Bus>(
        &mut self,
        dev: &mut Ds28e30<B>,
    ) -> crate::Result<u32, Error> {
        let v = read(dev)?;
        if v > self.max {
            warn!("counter {} above max {}; assuming {}", v, self.max, CEILING);
            self.max = CEILING;
        }
        self.confirm(v);
        Ok(v)
    }

    fn confirm(&mut self, v: u32) {
        match self.value {
            Some(old) if v > old => {
                error!("chip counter {} above shadow {}; ignoring", v, old);
            }
            _ => self.value = Some(v),
        }
    }

    /// Decrements the counter once.
    ///
    /// The command is never blindly retried: a failed reply may still have
    /// decremented the counter. After a failure the chip is read back, and a
    /// value exactly one below the shadow counts as success.
    pub fn decrease<B: Bus>(
        &mut self,
        dev: &mut Ds28e30<B>,
    ) -> crate::Result<(), Error> {
        let current = match self.value {
            Some(v) => v,
            None => return Err(fail!(Error::NotInitialized)),
        };

        for attempt in 0..xpc::RETRIES {
            match dev.decrement_counter() {
                Ok(()) => {
                    self.confirm(current.saturating_sub(1));
                    return Ok(());
                }
                Err(e) => {
                    warn!("decrement attempt {}: {:?}", attempt, e);
                }
            }

            let chip = read(dev)?;
            if chip + 1 == current {
                trace!("decrement landed despite the failed reply");
                self.confirm(chip);
                return Ok(());
            }
            if chip < current {
                // Some other decrement landed; resynchronize, but do not
                // count it as this one.
                self.confirm(chip);
            }
        }
        Err(fail!(Error::Unconfirmed))
    }

    /// Decrements the counter toward the value implied by `discharge_level`.
    ///
    /// Nothing happens until `armed`, which callers set once the pack has
    /// left the factory. At most [`BATCH`] decrements are issued per call;
    /// any remainder is picked up by the next call, since the backlog is
    /// recomputed from the shadow every time. Returns the number of
    /// decrements confirmed.
    pub fn sync<B: Bus>(
        &mut self,
        dev: &mut Ds28e30<B>,
        discharge_level: u32,
        armed: bool,
    ) -> crate::Result<u32, Error> {
        let used = match self.cycles_used() {
            Some(u) => u,
            None => return Err(fail!(Error::NotInitialized)),
        };
        if !armed {
            trace!("counter sync skipped: first-use date not locked");
            return Ok(0);
        }

        let pending = (discharge_level / LEVEL_PER_DECREMENT).saturating_sub(used);
        let batch = pending.min(BATCH);
        info!("counter sync: {} pending, issuing {}", pending, batch);

        let mut done = 0;
        for _ in 0..batch {
            if self.value == Some(0) {
                warn!("decrement counter exhausted");
                break;
            }
            self.decrease(dev)?;
            done += 1;
        }
        Ok(done)
    }
}
