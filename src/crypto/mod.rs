// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable cryptography traits.
//!
//! Authenticating a chip needs exactly two primitives: SHA-256, to derive
//! challenges, and P-256 ECDSA verification, to check the chip's responses
//! and its certificate. This module provides object-safe traits that abstract
//! over those operations, so that integrations can plug in a hardware
//! accelerator or a certified library.
//!
//! It is recommended to not import the traits in this module directly, since
//! a lot of them have the same name. Instead, use imports like
//! `use ds28e30::crypto::ecdsa;` and partially-qualified names like
//! `ecdsa::Verify`.
//!
//! Software implementations of these traits are provided under the
//! [`ring` module], based on the [`ring`] crate. Their presence is controlled
//! by the `ring` feature flag; signing requires `std` as well.
//!
//! [`ring` module]: ring/index.html

use static_assertions::assert_obj_safe;

pub mod ecdsa;
pub mod sha256;

#[cfg(feature = "ring")]
pub mod ring;

/// A provider of every primitive the authentication flow uses.
pub trait Ciphers {
    /// Returns a SHA-256 engine.
    fn sha256(&mut self) -> &mut dyn sha256::Hash;

    /// Returns a verifier primed with `key`, or `None` if this provider
    /// cannot verify at all.
    ///
    /// A `key` that is not a valid curve point is not caught here; it makes
    /// every [`ecdsa::Verify::verify()`] call fail.
    fn verifier<'a>(
        &'a mut self,
        key: &ecdsa::PublicKey,
    ) -> Option<&'a mut dyn ecdsa::Verify>;
}
assert_obj_safe!(Ciphers);

impl<C: Ciphers + ?Sized> Ciphers for &'_ mut C {
    fn sha256(&mut self) -> &mut dyn sha256::Hash {
        C::sha256(*self)
    }

    fn verifier<'a>(
        &'a mut self,
        key: &ecdsa::PublicKey,
    ) -> Option<&'a mut dyn ecdsa::Verify> {
        C::verifier(*self, key)
    }
}
