// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Board configuration.
//!
//! A [`Config`] describes which lines the batteries hang off of, how to time
//! them, which keys to check them against, and where telemetry lives in
//! their memory. It is meant to be loaded from JSON (or any other `serde`
//! format) and checked with [`Config::validate()`] before use.
//!
//! Requires the `std` and `serde` feature flags to be enabled.

use serde::{Deserialize, Serialize};

use crate::channel::DeviceChannel;
use crate::channel::Options;
use crate::coordinator::SyncPolicy;
use crate::counter;
use crate::fields;
use crate::fields::MemoryMap;
use crate::hardware::mmio::Layout;
use crate::keys::KeySets;
use crate::onewire::bitbang::Timing;

/// An error found while validating a [`Config`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// No channel is configured.
    NoChannels,
    /// A slot is configured twice.
    DuplicateSlot(DeviceChannel),
    /// Two slots share a line.
    SharedLine(DeviceChannel),
    /// The counter default does not fit the counter.
    CounterDefault,
    /// The memory map is inconsistent.
    Fields(fields::Error),
}

impl From<fields::Error> for Error {
    fn from(e: fields::Error) -> Self {
        Self::Fields(e)
    }
}

debug_from!(Error => fields::Error);

/// The GPIO line a battery's data pin is wired to.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Line {
    /// A line driven through the platform GPIO framework.
    Gpio {
        /// The line number.
        number: u32,
    },
    /// A line driven by writing the GPIO bank's registers directly.
    Mmio {
        /// The physical base address of the bank.
        #[serde(deserialize_with = "crate::serde::de_radix")]
        #[serde(serialize_with = "crate::serde::se_hex")]
        base: u64,
        /// Where the line's bits sit in the bank.
        layout: Layout,
    },
}

/// Which slot timing table to start from.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingProfile {
    /// Pick by line type.
    Auto,
    /// [`Timing::GPIO`].
    Gpio,
    /// [`Timing::REGISTER`].
    Register,
    /// A fully custom table.
    Custom(Timing),
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self::Auto
    }
}

/// One battery slot.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Which slot this is.
    pub id: DeviceChannel,
    /// The data line.
    pub line: Line,
    /// The timing table.
    #[serde(default)]
    pub timing: TimingProfile,
    /// Read and write delay overrides, in nanoseconds; zero keeps the
    /// table's value.
    #[serde(default)]
    pub rw_delay_ns: [u32; 2],
    /// Whether engineering operations are allowed on this slot.
    #[serde(default)]
    pub engineering: bool,
}

impl ChannelConfig {
    /// Resolves the slot timing, including overrides.
    pub fn timing(&self) -> Timing {
        let base = match (self.timing, self.line) {
            (TimingProfile::Custom(t), _) => t,
            (TimingProfile::Gpio, _) => Timing::GPIO,
            (TimingProfile::Register, _) => Timing::REGISTER,
            (TimingProfile::Auto, Line::Gpio { .. }) => Timing::GPIO,
            (TimingProfile::Auto, Line::Mmio { .. }) => Timing::REGISTER,
        };
        base.with_overrides(self.rw_delay_ns[0], self.rw_delay_ns[1])
    }
}

fn counter_default() -> u32 {
    counter::FACTORY_DEFAULT
}

/// The whole board.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Config {
    /// The battery slots, at most one per [`DeviceChannel`].
    pub channels: Vec<ChannelConfig>,
    /// Certificate keys.
    #[serde(default)]
    pub keys: KeySets,
    /// Telemetry layout.
    #[serde(default)]
    pub map: MemoryMap,
    /// Write-back schedule.
    #[serde(default)]
    pub sync: SyncPolicy,
    /// The value blank decrement counters are programmed with.
    #[serde(default = "counter_default")]
    pub counter_default: u32,
}

impl Config {
    /// Checks the configuration for consistency.
    pub fn validate(&self) -> crate::Result<(), Error> {
        check!(!self.channels.is_empty(), Error::NoChannels);
        for (i, a) in self.channels.iter().enumerate() {
            for b in &self.channels[..i] {
                check!(a.id != b.id, Error::DuplicateSlot(a.id));
                check!(a.line != b.line, Error::SharedLine(a.id));
            }
        }
        check!(
            self.counter_default > 0 && self.counter_default <= counter::CEILING,
            Error::CounterDefault
        );
        self.map.validate()?;
        Ok(())
    }

    /// Returns the slot configured as `id`.
    pub fn channel(&self, id: DeviceChannel) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Builds the channel options for `id`.
    pub fn options(&self, id: DeviceChannel) -> Option<Options> {
        let c = self.channel(id)?;
        Some(Options {
            keys: self.keys,
            map: self.map,
            counter_default: self.counter_default,
            engineering: c.engineering,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::onewire::bitbang::Sampling;
    use pretty_assertions::assert_eq;

    const TWO_SLOTS: &str = r#"{
        "channels": [
            {
                "id": "Device1",
                "line": { "gpio": { "number": 42 } },
                "rw_delay_ns": [0, 2000]
            },
            {
                "id": "Device2",
                "line": { "mmio": {
                    "base": "0x10830000",
                    "layout": {
                        "control_offset": 32,
                        "data_offset": 36,
                        "control_bit": 8,
                        "data_bit": 2
                    }
                } },
                "engineering": true
            }
        ],
        "keys": {
            "vendor": {
                "system": {
                    "x": "0101010101010101010101010101010101010101010101010101010101010101",
                    "y": "0202020202020202020202020202020202020202020202020202020202020202"
                },
                "authority": {
                    "x": "0303030303030303030303030303030303030303030303030303030303030303",
                    "y": "0404040404040404040404040404040404040404040404040404040404040404"
                },
                "certificate_constant": "424154544552592d5041434b2d763031"
            }
        },
        "sync": { "on_charger_secs": 600, "idle_secs": 3600, "poll_secs": 5 }
    }"#;

    fn two_slots() -> Config {
        serde_json::from_str(TWO_SLOTS).unwrap()
    }

    #[test]
    fn parse() {
        let config = two_slots();
        config.validate().unwrap();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.counter_default, counter::FACTORY_DEFAULT);
        assert_eq!(config.map, MemoryMap::DEFAULT);
        assert_eq!(config.sync.poll_secs, 5);
        assert!(config.keys.generic.is_none());

        let vendor = config.keys.vendor.unwrap();
        assert_eq!(vendor.system.x, [1; 32]);
        assert_eq!(&vendor.certificate_constant, b"BATTERY-PACK-v01");

        let d2 = config.channel(DeviceChannel::Device2).unwrap();
        match d2.line {
            Line::Mmio { base, layout } => {
                assert_eq!(base, 0x1083_0000);
                assert_eq!(layout.data_bit, 2);
            }
            other => panic!("unexpected line {:?}", other),
        }
        assert!(config.options(DeviceChannel::Device2).unwrap().engineering);
        assert!(!config.options(DeviceChannel::Device1).unwrap().engineering);
    }

    #[test]
    fn timing_resolution() {
        let config = two_slots();

        let d1 = config.channel(DeviceChannel::Device1).unwrap().timing();
        assert_eq!(d1.write_low_ns, 2_000);
        assert_eq!(d1.read_sample_ns, Timing::GPIO.read_sample_ns);

        let d2 = config.channel(DeviceChannel::Device2).unwrap().timing();
        assert_eq!(d2, Timing::REGISTER);
        assert_eq!(d2.sampling, Sampling::Majority(7));
    }

    #[test]
    fn invalid() {
        let mut config = two_slots();
        config.channels[1].id = DeviceChannel::Device1;
        assert_eq!(
            config.validate().unwrap_err().into_inner(),
            Error::DuplicateSlot(DeviceChannel::Device1)
        );

        let mut config = two_slots();
        config.channels[1].line = config.channels[0].line;
        assert_eq!(
            config.validate().unwrap_err().into_inner(),
            Error::SharedLine(DeviceChannel::Device2)
        );

        let mut config = two_slots();
        config.counter_default = counter::CEILING + 1;
        assert_eq!(
            config.validate().unwrap_err().into_inner(),
            Error::CounterDefault
        );

        let mut config = two_slots();
        config.map.heatmap = [3, 3, 7];
        assert!(matches!(
            config.validate().unwrap_err().into_inner(),
            Error::Fields(_)
        ));

        config.channels.clear();
        assert_eq!(
            config.validate().unwrap_err().into_inner(),
            Error::NoChannels
        );
    }
}
