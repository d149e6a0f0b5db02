// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! `ds28e30` is a host-side driver for the Maxim DS28E30 battery
//! authenticator, talking to the chip over a software bit-banged 1-Wire bus.
//!
//! The crate is layered leaf-first:
//!
//! - [`hardware`] abstracts the GPIO line and the delay source the bus is
//!   driven with.
//! - [`onewire`] generates reset, write-bit and read-bit slots, and builds
//!   bytes and ROM selection on top of them.
//! - [`xpc`] wraps command payloads in the chip's CRC16-checked extended
//!   command envelope.
//! - [`device`] is the typed command set built on the transport.
//! - [`crypto`] and [`cert`] verify P-256 ECDSA signatures and device
//!   certificates.
//! - [`auth`] runs the challenge/response and certificate check.
//! - [`pages`], [`counter`], [`heatmap`] and [`fields`] implement the
//!   write-back page shadow and the decrement counter.
//! - [`channel`] ties all of it together for one physical bus, and
//!   `coordinator` drives up to two channels and their periodic flush.
//! - `config` describes a board's slots, keys and memory map.
//!
//! Nothing in this crate holds global state: every operation is threaded
//! through an explicit [`channel::Channel`].

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

#[macro_use]
mod debug;

pub use debug::Error;

/// A `Result` whose error is wrapped in a logged [`Error`].
pub type Result<T, E> = core::result::Result<T, Error<E>>;

pub mod auth;
pub mod cert;
pub mod channel;
#[cfg(all(feature = "std", feature = "serde"))]
pub mod config;
#[cfg(feature = "std")]
pub mod coordinator;
pub mod counter;
pub mod crc;
pub mod crypto;
pub mod device;
pub mod fields;
pub mod hardware;
pub mod heatmap;
pub mod keys;
pub mod onewire;
pub mod pages;
pub mod xpc;

#[cfg(feature = "serde")]
mod serde;
