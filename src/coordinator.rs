// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Dual-battery coordination and periodic write-back.
//!
//! A [`Coordinator`] holds up to two probed [`Channel`]s, each behind its
//! own lock, and decides when their page shadows get flushed back to the
//! chips. A [`Poller`] runs that decision on a background thread.
//!
//! Requires the `std` feature flag to be enabled.

use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::channel::DeviceChannel;
use crate::crypto::Ciphers;
use crate::hardware::ChargeState;
use crate::hardware::Clock;
use crate::hardware::PowerSupply;
use crate::onewire::Bus;

/// When shadows are written back to the chips.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncPolicy {
    /// Seconds between flushes while the battery sits on a charger.
    pub on_charger_secs: u64,
    /// Seconds between flushes otherwise.
    pub idle_secs: u64,
    /// Seconds between polls of the policy.
    pub poll_secs: u64,
}

impl SyncPolicy {
    /// One hour on a charger, one day otherwise, checked every minute.
    pub const DEFAULT: Self = Self {
        on_charger_secs: 60 * 60,
        idle_secs: 24 * 60 * 60,
        poll_secs: 60,
    };

    /// Returns whether `elapsed` since the last flush warrants another one.
    pub fn is_due(&self, elapsed: Duration, state: ChargeState) -> bool {
        (state.is_on_charger()
            && elapsed > Duration::from_secs(self.on_charger_secs))
            || elapsed > Duration::from_secs(self.idle_secs)
    }

    /// Returns the poll period.
    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Up to two battery channels and their shared flush schedule.
pub struct Coordinator<B, C> {
    slots: [Option<Mutex<Channel<B, C>>>; 2],
    policy: SyncPolicy,
    last_sync: Mutex<Duration>,
}

impl<B: Bus, C: Ciphers> Coordinator<B, C> {
    /// Creates an empty coordinator. `now` counts as the last flush.
    pub fn new(policy: SyncPolicy, now: Duration) -> Self {
        Self {
            slots: [None, None],
            policy,
            last_sync: Mutex::new(now),
        }
    }

    /// Probes `channel` and, if a chip answered, takes ownership of it.
    ///
    /// An absent chip's channel is dropped, releasing its line. Returns
    /// whether the channel became active.
    pub fn attach(&mut self, mut channel: Channel<B, C>) -> bool {
        let id = channel.id();
        if let Err(e) = channel.probe() {
            info!("{:?}: left inactive: {:?}", id, e);
            self.slots[id.index()] = None;
            return false;
        }
        self.slots[id.index()] = Some(Mutex::new(channel));
        true
    }

    /// Removes a channel, handing it back.
    pub fn detach(&mut self, id: DeviceChannel) -> Option<Channel<B, C>> {
        self.slots[id.index()]
            .take()
            .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner))
    }

    /// Locks and returns an active channel.
    pub fn channel(
        &self,
        id: DeviceChannel,
    ) -> Option<MutexGuard<'_, Channel<B, C>>> {
        self.slots[id.index()]
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Returns the active channels.
    pub fn active(&self) -> impl Iterator<Item = DeviceChannel> + '_ {
        DeviceChannel::ALL
            .iter()
            .copied()
            .filter(move |id| self.slots[id.index()].is_some())
    }

    /// Returns the flush schedule.
    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Flushes every active channel now, regardless of schedule.
    ///
    /// Returns how many channels flushed cleanly.
    pub fn flush_all(&self) -> usize {
        let mut ok = 0;
        for id in self.active() {
            if let Some(mut ch) = self.channel(id) {
                match ch.flush_all() {
                    Ok(()) => ok += 1,
                    Err(e) => {
                        warn!("{:?}: flush failed: {:?}", id, e);
                    }
                }
            }
        }
        ok
    }

    /// Runs one scheduling decision at time `now`.
    ///
    /// If a flush is due, every channel is flushed and `now` becomes the
    /// last flush time, whether or not the flushes succeeded. Returns
    /// whether a flush ran.
    pub fn poll(&self, now: Duration, state: ChargeState) -> bool {
        let mut last = self.last_sync.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_sub(*last);
        trace!("poll: {:?} since last flush, {:?}", elapsed, state);
        if !self.policy.is_due(elapsed, state) {
            return false;
        }

        let flushed = self.flush_all();
        info!("periodic flush: {} channel(s) clean", flushed);
        *last = now;
        true
    }
}

/// A background thread calling [`Coordinator::poll()`] every poll period.
pub struct Poller {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Starts polling `coordinator`, reading time from `clock` and the
    /// charger state from `power`.
    pub fn spawn<B, C, K, P>(
        coordinator: Arc<Coordinator<B, C>>,
        clock: K,
        power: P,
    ) -> Self
    where
        B: Bus + Send + 'static,
        C: Ciphers + Send + 'static,
        K: Clock + Send + 'static,
        P: PowerSupply + Send + 'static,
    {
        let (stop, rx) = mpsc::channel();
        let period = coordinator.policy().poll_period();
        let handle = thread::spawn(move || loop {
            match rx.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {
                    coordinator.poll(clock.now(), power.charge_state());
                }
                _ => break,
            }
        });
        Self { stop, handle }
    }

    /// Stops the thread and waits for it to exit.
    ///
    /// A poll already in progress runs to completion first.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            error!("poller thread panicked");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::cell::Cell;

    use crate::channel::Options;
    use crate::crypto::ecdsa::Sign as _;
    use crate::crypto::ring;
    use crate::crypto::ring::ecdsa::Signer;
    use crate::device::fake;
    use crate::hardware::fake as hw;
    use crate::hardware::host::MonotonicClock;
    use crate::keys::KeyMaterial;
    use crate::keys::KeySets;
    use pretty_assertions::assert_eq;

    const CONSTANT: [u8; 16] = *b"BATTERY-PACK-v01";
    const HOUR: Duration = Duration::from_secs(60 * 60);

    type TestCoordinator = Coordinator<fake::Chip, ring::Ciphers>;

    fn channel(
        id: DeviceChannel,
        system: &mut Signer,
        present: bool,
    ) -> Channel<fake::Chip, ring::Ciphers> {
        let mut chip = fake::Chip::new();
        chip.provision(system, &CONSTANT);
        chip.absent = !present;
        let options = Options {
            keys: KeySets {
                vendor: Some(KeyMaterial {
                    system: system.public_key(),
                    authority: system.public_key(),
                    certificate_constant: CONSTANT,
                }),
                generic: None,
            },
            ..Options::default()
        };
        Channel::new(id, chip, ring::Ciphers::new(), options)
    }

    fn coordinator(policy: SyncPolicy, second: bool) -> TestCoordinator {
        let (mut system, _) = Signer::generate().unwrap();
        let mut coord = Coordinator::new(policy, Duration::ZERO);
        assert!(coord.attach(channel(DeviceChannel::Device1, &mut system, true)));
        assert_eq!(
            coord.attach(channel(DeviceChannel::Device2, &mut system, second)),
            second
        );
        coord
    }

    fn page2_writes(coord: &TestCoordinator, id: DeviceChannel) -> usize {
        let mut ch = coord.channel(id).unwrap();
        let chip = ch.bus_mut();
        chip.writes.iter().filter(|&&p| p == 2).count()
    }

    #[test]
    fn policy() {
        let p = SyncPolicy::DEFAULT;
        assert!(!p.is_due(HOUR, ChargeState::Charging));
        assert!(p.is_due(HOUR + Duration::from_secs(1), ChargeState::Full));
        assert!(!p.is_due(2 * HOUR, ChargeState::Discharging));
        assert!(!p.is_due(24 * HOUR, ChargeState::NotCharging));
        assert!(p.is_due(25 * HOUR, ChargeState::Unknown));
    }

    #[test]
    fn absent_second_battery() {
        let mut coord = coordinator(SyncPolicy::DEFAULT, false);
        assert_eq!(coord.active().collect::<Vec<_>>(), vec![DeviceChannel::Device1]);
        assert!(coord.channel(DeviceChannel::Device2).is_none());
        assert!(coord.detach(DeviceChannel::Device1).is_some());
        assert_eq!(coord.active().count(), 0);
    }

    #[test]
    fn poll_follows_charger_and_clock() {
        let coord = coordinator(SyncPolicy::DEFAULT, true);
        let clock = hw::Clock::default();
        let power = hw::PowerSupply(Cell::new(ChargeState::Discharging));
        let poll = || {
            coord.poll(
                crate::hardware::Clock::now(&clock),
                crate::hardware::PowerSupply::charge_state(&power),
            )
        };

        for id in DeviceChannel::ALL {
            coord.channel(id).unwrap().set_bsoh(90).unwrap();
        }

        clock.advance(HOUR / 2);
        power.0.set(ChargeState::Charging);
        assert!(!poll());

        clock.advance(HOUR);
        assert!(poll());
        for id in DeviceChannel::ALL {
            assert_eq!(page2_writes(&coord, id), 1);
            assert_eq!(coord.channel(id).unwrap().dirty_status()[2], false);
        }

        coord.channel(DeviceChannel::Device2).unwrap().set_asoc(50).unwrap();
        power.0.set(ChargeState::Discharging);
        clock.advance(2 * HOUR);
        assert!(!poll());

        clock.advance(23 * HOUR);
        assert!(poll());
        assert_eq!(page2_writes(&coord, DeviceChannel::Device1), 1);
        assert_eq!(page2_writes(&coord, DeviceChannel::Device2), 2);
    }

    #[test]
    fn failed_flush_still_resets_schedule() {
        let coord = coordinator(SyncPolicy::DEFAULT, false);
        {
            let mut ch = coord.channel(DeviceChannel::Device1).unwrap();
            ch.set_bsoh(1).unwrap();
            ch.bus_mut().absent = true;
        }
        assert!(coord.poll(25 * HOUR, ChargeState::Discharging));
        assert!(!coord.poll(26 * HOUR, ChargeState::Discharging));
        let ch = coord.channel(DeviceChannel::Device1).unwrap();
        assert_eq!(ch.dirty_status()[2], true);
    }

    #[test]
    fn poller_thread() {
        let policy = SyncPolicy {
            on_charger_secs: 0,
            idle_secs: 0,
            poll_secs: 0,
        };
        let coord = Arc::new(coordinator(policy, false));
        coord
            .channel(DeviceChannel::Device1)
            .unwrap()
            .set_bsoh(3)
            .unwrap();

        let poller = Poller::spawn(
            Arc::clone(&coord),
            MonotonicClock::new(),
            hw::PowerSupply(Cell::new(ChargeState::Discharging)),
        );
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while page2_writes(&coord, DeviceChannel::Device1) == 0 {
            assert!(std::time::Instant::now() < deadline, "poller never flushed");
            thread::sleep(Duration::from_millis(1));
        }
        poller.stop();
    }
}
